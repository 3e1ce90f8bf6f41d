use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use rivulet_api::{FieldType, FieldValue, RecordShape, SpikeRecord, StreamSchema};
use rivulet_conn_file::FileConnectionFactory;
use rivulet_engine::{HostInfo, Rng, SessionController};

use crate::config::{Effective, GenArgs};
use crate::error::RivuletError;

// ═══════════════════════════════════════════════════════════════
//  Synthetic records
// ═══════════════════════════════════════════════════════════════

const UNITS: usize = 3;

fn random_row(schema: &StreamSchema, rng: &mut Rng, sample: i64) -> Vec<FieldValue> {
    schema
        .field_definitions()
        .iter()
        .map(|field| match field.field_type {
            FieldType::Int64 => FieldValue::Int64(sample),
            FieldType::Int32 => FieldValue::Int32(rng.next_intn(1000) as i32),
            FieldType::Double => FieldValue::Double(rng.next_f64()),
            FieldType::Float => FieldValue::Float(rng.next_f64() as f32 * 2.0 - 1.0),
            FieldType::FixedWidthBytes | FieldType::VariableWidthBytes => {
                FieldValue::Bytes((0..field.byte_width).map(|_| rng.next_u64() as u8).collect())
            }
        })
        .collect()
}

/// Append one synthetic record of `shape` to `out`.
fn make_record(
    shape: &RecordShape,
    rng: &mut Rng,
    channels: usize,
    sample: i64,
    out: &mut Vec<u8>,
) -> Result<(), RivuletError> {
    match shape {
        RecordShape::Spike => {
            let spike = SpikeRecord::new(
                rng.next_intn(channels.max(1)) as i32,
                rng.next_intn(UNITS) as i32,
                sample,
            );
            out.extend_from_slice(spike.as_bytes());
        }
        RecordShape::Event(schema) => {
            schema.encode_row_into(&random_row(schema, rng, sample), out)?;
        }
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════
//  Main loop
// ═══════════════════════════════════════════════════════════════

pub async fn run(args: &GenArgs) -> Result<(), RivuletError> {
    if args.rate <= 0.0 {
        return Err(RivuletError::Config("--rate must be positive".into()));
    }
    let eff = Effective::new(&args.sink)?;

    let factory = Arc::new(FileConnectionFactory::new(&eff.data_dir));
    let mut controller = SessionController::from_settings(factory, &eff.settings);
    controller.set_host_info(HostInfo {
        spike_channels: args.channels,
        sampling_rate: args.sampling_rate,
        ..HostInfo::default()
    });
    controller.start().await?;

    let stream = controller.stream_name().unwrap_or_default().to_string();
    let shape = controller.schema_state().active().clone();
    let mut rng = Rng::new(args.seed);
    let mut record = Vec::with_capacity(shape.record_len());
    let mut tick = tokio::time::interval(Duration::from_millis(1));

    let start = Instant::now();
    let deadline = (args.duration_ms > 0).then(|| start + Duration::from_millis(args.duration_ms));
    let mut produced = 0u64;
    let mut accepted = 0u64;

    println!("Generating into {stream} (Ctrl+C to stop)");

    let outcome: Result<(), RivuletError> = 'generate: loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break Ok(());
            }
            _ = tick.tick() => {
                let now = Instant::now();
                if deadline.is_some_and(|d| now >= d) {
                    break Ok(());
                }
                let elapsed = (now - start).as_secs_f64();
                let due = (elapsed * args.rate) as u64;
                let sample = (elapsed * args.sampling_rate) as i64;
                while produced < due {
                    record.clear();
                    if let Err(e) = make_record(&shape, &mut rng, args.channels, sample, &mut record) {
                        break 'generate Err(e);
                    }
                    match controller.submit(&record) {
                        Ok(n) => accepted += n as u64,
                        Err(e) => tracing::warn!(error = %e, "submit failed"),
                    }
                    produced += 1;
                }
            }
        }
    };

    controller.stop().await?;
    outcome?;

    let dropped = controller.writer_stats().map_or(0, |s| s.records_dropped);
    let written = controller.total_records_written();
    let elapsed = start.elapsed();
    tracing::info!(
        stream = %stream,
        produced,
        accepted,
        written,
        dropped,
        elapsed_s = format_args!("{:.1}", elapsed.as_secs_f64()),
        "generation complete"
    );
    println!("  stopped: {produced} generated, {written} written, {dropped} dropped");
    Ok(())
}
