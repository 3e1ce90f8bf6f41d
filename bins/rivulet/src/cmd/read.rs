use std::io::Write;

use rivulet_api::{SpikeRecord, StreamSchema};
use rivulet_conn_file::{StreamReader, list_streams};

use crate::config::ReadArgs;
use crate::error::RivuletError;

pub fn run(args: &ReadArgs) -> Result<(), RivuletError> {
    let mut out = std::io::BufWriter::new(std::io::stdout().lock());

    let Some(stream) = &args.stream else {
        for name in list_streams(&args.data_dir)? {
            writeln!(out, "{name}")?;
        }
        out.flush()?;
        return Ok(());
    };

    let reader = StreamReader::open(&args.data_dir, stream)?;
    for (key, value) in reader.metadata() {
        tracing::info!(stream = %stream, key = %key, value = %value, "metadata");
    }
    print_records(reader, args.limit, &mut out)?;
    out.flush()?;
    Ok(())
}

fn print_records(mut reader: StreamReader, limit: Option<usize>, out: &mut impl Write) -> Result<(), RivuletError> {
    let schema = reader.schema().clone();
    let spike = schema == StreamSchema::spike();
    let limit = limit.unwrap_or(usize::MAX);

    let mut printed = 0;
    while printed < limit {
        let Some(record) = reader.next_record()? else {
            break;
        };
        writeln!(out, "{}", format_record(&schema, spike, &record)?)?;
        printed += 1;
    }
    Ok(())
}

fn format_record(schema: &StreamSchema, spike: bool, record: &[u8]) -> Result<String, RivuletError> {
    if spike {
        if let Some(s) = SpikeRecord::from_bytes(record) {
            return Ok(format!(
                "Spike on electrode {} unit {} at {}",
                s.channel_index, s.unit_index, s.sample_number
            ));
        }
    }
    let values = schema.decode_row(record)?;
    let fields: Vec<String> = schema
        .field_definitions()
        .iter()
        .zip(values)
        .map(|(field, value)| format!("{}={value}", field.name))
        .collect();
    Ok(fields.join(" "))
}
