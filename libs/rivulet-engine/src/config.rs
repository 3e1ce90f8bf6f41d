use std::path::Path;

use serde::{Deserialize, Serialize};

use rivulet_api::{ConnectionParams, RecordShape, StreamSchema};

use crate::error::EngineError;
use crate::session::BatchSettings;

fn default_hostname() -> String {
    "127.0.0.1".into()
}

fn default_port() -> i32 {
    6379
}

fn default_max_latency_ms() -> i64 {
    5
}

fn default_max_batch_size() -> i64 {
    4096
}

/// Persisted sink configuration (TOML).
///
/// ```toml
/// hostname = "127.0.0.1"
/// port = 6379
/// password = ""
/// max_latency_ms = 5
/// max_batch_size = 4096
/// stream_name = "Blue-17"
/// event_schema_json = '{"field_definitions":[{"name":"v","type":"DOUBLE","size":8}]}'
/// ```
///
/// `max_latency_ms` and `max_batch_size` at or below zero select synchronous
/// delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkSettings {
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: i32,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_max_latency_ms")]
    pub max_latency_ms: i64,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_schema_json: Option<String>,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            port: default_port(),
            password: String::new(),
            max_latency_ms: default_max_latency_ms(),
            max_batch_size: default_max_batch_size(),
            stream_name: None,
            event_schema_json: None,
        }
    }
}

impl SinkSettings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Settings(format!("cannot read {}: {e}", path.display())))?;
        Self::parse(&content).map_err(|e| e.with_context(path.display()))
    }

    pub fn parse(content: &str) -> Result<Self, EngineError> {
        toml::from_str(content).map_err(|e| EngineError::Settings(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String, EngineError> {
        toml::to_string(self).map_err(|e| EngineError::Settings(e.to_string()))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), EngineError> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn connection_params(&self) -> ConnectionParams {
        ConnectionParams::new(self.hostname.clone(), self.port, self.password.clone())
    }

    pub fn batch(&self) -> BatchSettings {
        BatchSettings::from_limits(self.max_batch_size, self.max_latency_ms)
    }

    /// The custom event schema, if one is stored and parses. A malformed
    /// document is logged and treated as absent.
    pub fn event_schema(&self) -> Option<StreamSchema> {
        let json = self.event_schema_json.as_deref()?;
        match StreamSchema::from_json(json) {
            Ok(schema) => Some(schema),
            Err(e) => {
                tracing::warn!(error = %e, "stored event schema is invalid, falling back to spike records");
                None
            }
        }
    }

    pub fn record_shape(&self) -> RecordShape {
        RecordShape::from_event_schema(self.event_schema())
    }

    pub fn set_event_schema(&mut self, schema: Option<&StreamSchema>) -> Result<(), EngineError> {
        self.event_schema_json = schema.map(StreamSchema::to_json).transpose()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rivulet_api::{FieldDefinition, FieldType};

    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let settings = SinkSettings::parse("").unwrap();
        assert_eq!(settings, SinkSettings::default());
        assert_eq!(settings.connection_params().address(), "127.0.0.1:6379");
        assert_eq!(settings.batch(), BatchSettings::new(4096, 5));
        assert!(settings.record_shape().is_spike());
    }

    #[test]
    fn non_positive_limits_mean_synchronous() {
        let settings = SinkSettings::parse("max_latency_ms = 0\nmax_batch_size = -3").unwrap();
        assert!(!settings.batch().is_enabled());
    }

    #[test]
    fn malformed_schema_falls_back_to_spike() {
        let settings = SinkSettings::parse(r#"event_schema_json = '{"field_definitions":[{"name":"x","type":"NOPE","size":8}]}'"#)
            .unwrap();
        assert!(settings.event_schema().is_none());
        assert!(settings.record_shape().is_spike());
    }

    #[test]
    fn bad_toml_is_a_settings_error() {
        assert!(matches!(SinkSettings::parse("port = \"x\""), Err(EngineError::Settings(_))));
    }

    #[test]
    fn save_and_load_keep_event_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rivulet.toml");

        let schema = StreamSchema::new(vec![
            FieldDefinition::numeric("ts", FieldType::Int64),
            FieldDefinition::numeric("value", FieldType::Double),
        ])
        .unwrap();
        let mut settings = SinkSettings {
            hostname: "store.lab".into(),
            port: 7000,
            stream_name: Some("rig-3".into()),
            ..SinkSettings::default()
        };
        settings.set_event_schema(Some(&schema)).unwrap();
        settings.save(&path).unwrap();

        let loaded = SinkSettings::load(&path).unwrap();
        assert_eq!(loaded, settings);
        assert_eq!(loaded.record_shape(), RecordShape::Event(schema));
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = SinkSettings::load("/nonexistent/rivulet.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/rivulet.toml"));
    }
}
