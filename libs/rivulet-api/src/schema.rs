use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════
//  Errors
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    /// Malformed schema document or unknown field type.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("field '{name}': {field_type} must be {expected} bytes wide, got {actual}")]
    WidthMismatch {
        name: String,
        field_type: FieldType,
        expected: u32,
        actual: u32,
    },

    #[error("field '{name}': {field_type} has no fixed record width")]
    Unsupported { name: String, field_type: FieldType },

    #[error("schema has no fields")]
    Empty,

    #[error("row does not match schema: {0}")]
    ValueMismatch(String),
}

// ═══════════════════════════════════════════════════════════════
//  FieldType
// ═══════════════════════════════════════════════════════════════

/// Wire type of one field.
///
/// Serialized by name (`"INT32"`). Deserialization also accepts the numeric
/// code (declaration order, `DOUBLE = 0`) used by older schema documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", try_from = "TypeRepr")]
pub enum FieldType {
    Double,
    Float,
    Int32,
    Int64,
    FixedWidthBytes,
    VariableWidthBytes,
}

impl FieldType {
    const ALL: [FieldType; 6] = [
        FieldType::Double,
        FieldType::Float,
        FieldType::Int32,
        FieldType::Int64,
        FieldType::FixedWidthBytes,
        FieldType::VariableWidthBytes,
    ];

    /// Canonical width for the numeric types, `None` for byte fields.
    pub fn canonical_width(self) -> Option<u32> {
        match self {
            FieldType::Double => Some(8),
            FieldType::Float => Some(4),
            FieldType::Int32 => Some(4),
            FieldType::Int64 => Some(8),
            FieldType::FixedWidthBytes | FieldType::VariableWidthBytes => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::Double => "DOUBLE",
            FieldType::Float => "FLOAT",
            FieldType::Int32 => "INT32",
            FieldType::Int64 => "INT64",
            FieldType::FixedWidthBytes => "FIXED_WIDTH_BYTES",
            FieldType::VariableWidthBytes => "VARIABLE_WIDTH_BYTES",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| SchemaError::InvalidSchema(format!("unknown field type '{s}'")))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TypeRepr {
    Name(String),
    Code(u64),
}

impl TryFrom<TypeRepr> for FieldType {
    type Error = SchemaError;

    fn try_from(repr: TypeRepr) -> Result<Self, Self::Error> {
        match repr {
            TypeRepr::Name(name) => name.parse(),
            TypeRepr::Code(code) => usize::try_from(code)
                .ok()
                .and_then(|i| FieldType::ALL.get(i).copied())
                .ok_or_else(|| SchemaError::InvalidSchema(format!("unknown field type code {code}"))),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  FieldDefinition
// ═══════════════════════════════════════════════════════════════

/// A single named, fixed-width field. Position in the schema determines
/// its byte offset in a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(rename = "size")]
    pub byte_width: u32,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, field_type: FieldType, byte_width: u32) -> Self {
        Self { name: name.into(), field_type, byte_width }
    }

    /// Numeric field with its canonical width. Byte fields get width 0 and
    /// are rejected by `StreamSchema::new`; use `new` for those.
    pub fn numeric(name: impl Into<String>, field_type: FieldType) -> Self {
        Self::new(name, field_type, field_type.canonical_width().unwrap_or(0))
    }

    fn validate(&self) -> Result<(), SchemaError> {
        match self.field_type {
            FieldType::VariableWidthBytes => Err(SchemaError::Unsupported {
                name: self.name.clone(),
                field_type: self.field_type,
            }),
            FieldType::FixedWidthBytes if self.byte_width == 0 => Err(SchemaError::Unsupported {
                name: self.name.clone(),
                field_type: self.field_type,
            }),
            FieldType::FixedWidthBytes => Ok(()),
            numeric => {
                let expected = numeric.canonical_width().unwrap_or(0);
                if self.byte_width == expected {
                    Ok(())
                } else {
                    Err(SchemaError::WidthMismatch {
                        name: self.name.clone(),
                        field_type: numeric,
                        expected,
                        actual: self.byte_width,
                    })
                }
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  FieldValue
// ═══════════════════════════════════════════════════════════════

/// One typed value of a record row. Used by producers that build custom
/// event records and by readers that print them.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Double(f64),
    Float(f32),
    Int32(i32),
    Int64(i64),
    Bytes(Vec<u8>),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Double(v) => write!(f, "{v}"),
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Int32(v) => write!(f, "{v}"),
            FieldValue::Int64(v) => write!(f, "{v}"),
            FieldValue::Bytes(b) => {
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  StreamSchema
// ═══════════════════════════════════════════════════════════════

#[derive(Clone, Serialize, Deserialize)]
struct SchemaDocument {
    field_definitions: Vec<FieldDefinition>,
}

/// Ordered field list describing the byte layout of one record.
///
/// Fields are packed back to back in declaration order with no padding,
/// so `record_size` is the plain sum of the field widths. A schema can only
/// be built through validation: every field has a fixed width.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SchemaDocument", into = "SchemaDocument")]
pub struct StreamSchema {
    field_definitions: Vec<FieldDefinition>,
    record_size: u32,
}

impl StreamSchema {
    pub fn new(field_definitions: Vec<FieldDefinition>) -> Result<Self, SchemaError> {
        if field_definitions.is_empty() {
            return Err(SchemaError::Empty);
        }
        let mut record_size: u32 = 0;
        for field in &field_definitions {
            field.validate()?;
            record_size = record_size.checked_add(field.byte_width).ok_or_else(|| {
                SchemaError::InvalidSchema(format!("record size overflows at field '{}'", field.name))
            })?;
        }
        Ok(Self { field_definitions, record_size })
    }

    /// Built-in spike layout: `channel_index: INT32, unit_index: INT32,
    /// sample_number: INT64` (16 bytes).
    pub fn spike() -> Self {
        Self {
            field_definitions: vec![
                FieldDefinition::numeric("channel_index", FieldType::Int32),
                FieldDefinition::numeric("unit_index", FieldType::Int32),
                FieldDefinition::numeric("sample_number", FieldType::Int64),
            ],
            record_size: 16,
        }
    }

    pub fn field_definitions(&self) -> &[FieldDefinition] {
        &self.field_definitions
    }

    pub fn record_size(&self) -> u32 {
        self.record_size
    }

    /// `record_size` as a buffer length.
    pub fn record_len(&self) -> usize {
        self.record_size as usize
    }

    pub fn to_json(&self) -> Result<String, SchemaError> {
        serde_json::to_string(self).map_err(|e| SchemaError::InvalidSchema(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        serde_json::from_str(json).map_err(|e| SchemaError::InvalidSchema(e.to_string()))
    }

    /// Pack `values` into one record, appending to `out`.
    pub fn encode_row_into(&self, values: &[FieldValue], out: &mut Vec<u8>) -> Result<(), SchemaError> {
        if values.len() != self.field_definitions.len() {
            return Err(SchemaError::ValueMismatch(format!(
                "expected {} values, got {}",
                self.field_definitions.len(),
                values.len()
            )));
        }
        out.reserve(self.record_len());
        for (field, value) in self.field_definitions.iter().zip(values) {
            match (field.field_type, value) {
                (FieldType::Double, FieldValue::Double(v)) => out.extend_from_slice(&v.to_ne_bytes()),
                (FieldType::Float, FieldValue::Float(v)) => out.extend_from_slice(&v.to_ne_bytes()),
                (FieldType::Int32, FieldValue::Int32(v)) => out.extend_from_slice(&v.to_ne_bytes()),
                (FieldType::Int64, FieldValue::Int64(v)) => out.extend_from_slice(&v.to_ne_bytes()),
                (FieldType::FixedWidthBytes, FieldValue::Bytes(b)) if b.len() == field.byte_width as usize => {
                    out.extend_from_slice(b)
                }
                (ty, v) => {
                    return Err(SchemaError::ValueMismatch(format!(
                        "field '{}' ({ty}, {} bytes) cannot hold {v:?}",
                        field.name, field.byte_width
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn encode_row(&self, values: &[FieldValue]) -> Result<Vec<u8>, SchemaError> {
        let mut out = Vec::with_capacity(self.record_len());
        self.encode_row_into(values, &mut out)?;
        Ok(out)
    }

    /// Split one record into typed values, in field order.
    pub fn decode_row(&self, record: &[u8]) -> Result<Vec<FieldValue>, SchemaError> {
        if record.len() != self.record_len() {
            return Err(SchemaError::ValueMismatch(format!(
                "expected {} bytes, got {}",
                self.record_size,
                record.len()
            )));
        }
        let mut values = Vec::with_capacity(self.field_definitions.len());
        let mut offset = 0;
        for field in &self.field_definitions {
            let end = offset + field.byte_width as usize;
            let bytes = &record[offset..end];
            let value = match field.field_type {
                FieldType::Double => FieldValue::Double(f64::from_ne_bytes(fixed(bytes)?)),
                FieldType::Float => FieldValue::Float(f32::from_ne_bytes(fixed(bytes)?)),
                FieldType::Int32 => FieldValue::Int32(i32::from_ne_bytes(fixed(bytes)?)),
                FieldType::Int64 => FieldValue::Int64(i64::from_ne_bytes(fixed(bytes)?)),
                FieldType::FixedWidthBytes | FieldType::VariableWidthBytes => FieldValue::Bytes(bytes.to_vec()),
            };
            values.push(value);
            offset = end;
        }
        Ok(values)
    }
}

fn fixed<const N: usize>(bytes: &[u8]) -> Result<[u8; N], SchemaError> {
    bytes
        .try_into()
        .map_err(|_| SchemaError::ValueMismatch(format!("expected {N} bytes, got {}", bytes.len())))
}

impl TryFrom<SchemaDocument> for StreamSchema {
    type Error = SchemaError;

    fn try_from(doc: SchemaDocument) -> Result<Self, Self::Error> {
        StreamSchema::new(doc.field_definitions)
    }
}

impl From<StreamSchema> for SchemaDocument {
    fn from(schema: StreamSchema) -> Self {
        SchemaDocument { field_definitions: schema.field_definitions }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Spike event enriched with waveform PC scores, 19 fields of mixed types.
    fn pc_score_schema() -> StreamSchema {
        let mut fields = vec![
            FieldDefinition::numeric("sample_number", FieldType::Int64),
            FieldDefinition::numeric("channel_index", FieldType::Int32),
            FieldDefinition::numeric("unit_index", FieldType::Int32),
        ];
        for i in 0..12 {
            fields.push(FieldDefinition::numeric(format!("pc_{i}"), FieldType::Float));
        }
        fields.push(FieldDefinition::numeric("amplitude", FieldType::Double));
        fields.push(FieldDefinition::new("electrode", FieldType::FixedWidthBytes, 16));
        fields.push(FieldDefinition::numeric("x_um", FieldType::Float));
        fields.push(FieldDefinition::numeric("y_um", FieldType::Float));
        StreamSchema::new(fields).unwrap()
    }

    #[test]
    fn spike_schema_is_sixteen_bytes() {
        let schema = StreamSchema::spike();
        assert_eq!(schema.record_size(), 16);
        let names: Vec<_> = schema.field_definitions().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["channel_index", "unit_index", "sample_number"]);
    }

    #[test]
    fn record_size_is_sum_of_widths() {
        let schema = pc_score_schema();
        let declared: u32 = schema.field_definitions().iter().map(|f| f.byte_width).sum();
        assert_eq!(schema.record_size(), declared);
        assert_eq!(schema.record_size(), 8 + 4 + 4 + 12 * 4 + 8 + 16 + 4 + 4);
    }

    #[test]
    fn json_round_trip_preserves_fields_and_size() {
        let schema = pc_score_schema();
        assert_eq!(schema.field_definitions().len(), 19);

        let json = schema.to_json().unwrap();
        let back = StreamSchema::from_json(&json).unwrap();

        assert_eq!(back.field_definitions(), schema.field_definitions());
        assert_eq!(back.record_size(), schema.record_size());
    }

    #[test]
    fn json_uses_named_types() {
        let json = StreamSchema::spike().to_json().unwrap();
        assert!(json.contains(r#""type":"INT32""#), "{json}");
        assert!(json.contains(r#""size":8"#), "{json}");
    }

    #[test]
    fn numeric_type_codes_are_accepted() {
        let json = r#"{"field_definitions":[{"name":"a","type":2,"size":4},{"name":"b","type":0,"size":8}]}"#;
        let schema = StreamSchema::from_json(json).unwrap();
        assert_eq!(schema.field_definitions()[0].field_type, FieldType::Int32);
        assert_eq!(schema.field_definitions()[1].field_type, FieldType::Double);
        assert_eq!(schema.record_size(), 12);
    }

    #[test]
    fn unknown_type_is_invalid_schema() {
        let json = r#"{"field_definitions":[{"name":"a","type":"INT128","size":16}]}"#;
        assert!(matches!(StreamSchema::from_json(json), Err(SchemaError::InvalidSchema(_))));

        let json = r#"{"field_definitions":[{"name":"a","type":9,"size":4}]}"#;
        assert!(matches!(StreamSchema::from_json(json), Err(SchemaError::InvalidSchema(_))));
    }

    #[test]
    fn malformed_json_is_invalid_schema() {
        assert!(matches!(StreamSchema::from_json("{not json"), Err(SchemaError::InvalidSchema(_))));
        assert!(matches!(StreamSchema::from_json(r#"{"fields":[]}"#), Err(SchemaError::InvalidSchema(_))));
    }

    #[test]
    fn width_must_match_canonical_size() {
        let err = StreamSchema::new(vec![FieldDefinition::new("x", FieldType::Int64, 4)]).unwrap_err();
        assert_eq!(
            err,
            SchemaError::WidthMismatch {
                name: "x".into(),
                field_type: FieldType::Int64,
                expected: 8,
                actual: 4
            }
        );
    }

    #[test]
    fn variable_width_and_empty_are_rejected() {
        let err = StreamSchema::new(vec![FieldDefinition::new("blob", FieldType::VariableWidthBytes, 0)]).unwrap_err();
        assert!(matches!(err, SchemaError::Unsupported { .. }));
        assert_eq!(StreamSchema::new(vec![]).unwrap_err(), SchemaError::Empty);
    }

    #[test]
    fn encode_then_decode_row() {
        let schema = StreamSchema::new(vec![
            FieldDefinition::numeric("t", FieldType::Int64),
            FieldDefinition::numeric("v", FieldType::Float),
            FieldDefinition::new("tag", FieldType::FixedWidthBytes, 2),
        ])
        .unwrap();
        let row = vec![FieldValue::Int64(-7), FieldValue::Float(1.5), FieldValue::Bytes(vec![0xab, 0xcd])];

        let bytes = schema.encode_row(&row).unwrap();
        assert_eq!(bytes.len(), 14);
        assert_eq!(&bytes[..8], &(-7i64).to_ne_bytes());
        assert_eq!(schema.decode_row(&bytes).unwrap(), row);
    }

    #[test]
    fn encode_rejects_wrong_value_types() {
        let schema = StreamSchema::spike();
        let err = schema
            .encode_row(&[FieldValue::Int32(1), FieldValue::Double(2.0), FieldValue::Int64(3)])
            .unwrap_err();
        assert!(matches!(err, SchemaError::ValueMismatch(_)));
        assert!(schema.encode_row(&[FieldValue::Int32(1)]).is_err());
    }
}
