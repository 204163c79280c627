//! Runtime protobuf schemas: load a descriptor pool, resolve message types
//! by name, and encode/decode through serde.
//!
//! Structured values cross the codec as `serde_json::Value`, so any
//! `Serialize` type whose field names match the `.proto` field names (or
//! their JSON names) can be encoded, and decoded payloads can land in any
//! `DeserializeOwned` type.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use prost::Message;
use prost_reflect::{
    DescriptorPool, DeserializeOptions, DynamicMessage, MessageDescriptor, SerializeOptions,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ConnectorError, Result};

/// Descriptor set of `proto/malos/driver.proto`, compiled by `build.rs`.
static BUNDLED_DESCRIPTOR_SET: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/malos_driver.bin"));

/// Where message types are loaded from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaSource {
    /// The MALOS driver schema shipped with this crate.
    #[default]
    Bundled,
    /// A `.proto` file compiled at load time.  When `includes` is empty the
    /// file's own directory is the include root.
    ProtoFile {
        path: PathBuf,
        #[serde(default)]
        includes: Vec<PathBuf>,
    },
    /// A binary `FileDescriptorSet` (e.g. `protoc --include_imports -o`).
    DescriptorSet { path: PathBuf },
}

/// Schema source plus the two message types a service speaks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaBinding {
    #[serde(default)]
    pub source: SchemaSource,
    /// Fully-qualified name of the configuration message.
    pub config_message: String,
    /// Fully-qualified name of the data message.
    pub data_message: String,
}

impl SchemaBinding {
    /// Load the source and resolve both types as `(config, data)`.
    pub fn resolve(&self) -> Result<(MessageCodec, MessageCodec)> {
        let schema = MessageSchema::load(&self.source)?;
        let config = schema.resolve(&self.config_message)?;
        let data = schema.resolve(&self.data_message)?;
        Ok((config, data))
    }
}

/// A loaded set of message definitions.
#[derive(Debug, Clone)]
pub struct MessageSchema {
    pool: DescriptorPool,
}

impl MessageSchema {
    pub fn load(source: &SchemaSource) -> Result<Self> {
        let pool = match source {
            SchemaSource::Bundled => DescriptorPool::decode(BUNDLED_DESCRIPTOR_SET)
                .map_err(|e| ConnectorError::SchemaLoad(format!("bundled schema: {e}")))?,
            SchemaSource::ProtoFile { path, includes } => compile_proto(path, includes)?,
            SchemaSource::DescriptorSet { path } => {
                let raw = std::fs::read(path).map_err(|e| {
                    ConnectorError::SchemaLoad(format!("reading {}: {e}", path.display()))
                })?;
                DescriptorPool::decode(raw.as_slice()).map_err(|e| {
                    ConnectorError::SchemaLoad(format!("decoding {}: {e}", path.display()))
                })?
            }
        };

        tracing::debug!(
            source = ?source,
            messages = pool.all_messages().count(),
            "schema loaded"
        );
        Ok(Self { pool })
    }

    /// Look up a message type by its fully-qualified name.
    pub fn resolve(&self, name: &str) -> Result<MessageCodec> {
        self.pool
            .get_message_by_name(name)
            .map(MessageCodec::new)
            .ok_or_else(|| ConnectorError::TypeResolution { name: name.into() })
    }

    /// Fully-qualified names of every message type, sorted.
    pub fn message_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .pool
            .all_messages()
            .map(|m| m.full_name().to_owned())
            .collect();
        names.sort();
        names
    }
}

fn compile_proto(path: &Path, includes: &[PathBuf]) -> Result<DescriptorPool> {
    // protox matches files to include roots by path prefix, so compare
    // canonical forms.
    let file = path.canonicalize().map_err(|e| schema_load_error(path, e))?;
    let roots: Vec<PathBuf> = if includes.is_empty() {
        file.parent().map(Path::to_path_buf).into_iter().collect()
    } else {
        includes
            .iter()
            .map(|dir| dir.canonicalize().map_err(|e| schema_load_error(dir, e)))
            .collect::<Result<_>>()?
    };

    let descriptor_set = protox::compile([&file], &roots).map_err(|e| schema_load_error(path, e))?;
    DescriptorPool::from_file_descriptor_set(descriptor_set).map_err(|e| schema_load_error(path, e))
}

fn schema_load_error(what: &Path, e: impl std::fmt::Display) -> ConnectorError {
    ConnectorError::SchemaLoad(format!("{}: {e}", what.display()))
}

/// Encoder/decoder for one resolved message type.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    descriptor: MessageDescriptor,
}

impl MessageCodec {
    fn new(descriptor: MessageDescriptor) -> Self {
        Self { descriptor }
    }

    pub fn full_name(&self) -> &str {
        self.descriptor.full_name()
    }

    pub fn descriptor(&self) -> &MessageDescriptor {
        &self.descriptor
    }

    /// Encode `value` to canonical protobuf bytes.  Fields the message does
    /// not define are ignored; fields of the wrong type are an error.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes> {
        let json = serde_json::to_value(value).map_err(|e| self.encoding_error(e))?;
        let options = DeserializeOptions::new().deny_unknown_fields(false);
        let message =
            DynamicMessage::deserialize_with_options(self.descriptor.clone(), json, &options)
                .map_err(|e| self.encoding_error(e))?;
        Ok(Bytes::from(message.encode_to_vec()))
    }

    /// Decode `payload` into `T`.  Every field is present in the
    /// intermediate value, defaults included, keyed by its `.proto` name.
    pub fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T> {
        let message = DynamicMessage::decode(self.descriptor.clone(), payload)
            .map_err(|e| self.decoding_error(e))?;

        let options = SerializeOptions::new()
            .use_proto_field_name(true)
            .skip_default_fields(false)
            .stringify_64_bit_integers(false);
        let json = message
            .serialize_with_options(serde_json::value::Serializer, &options)
            .map_err(|e| self.decoding_error(e))?;

        serde_json::from_value(json).map_err(|e| self.decoding_error(e))
    }

    fn encoding_error(&self, e: impl std::fmt::Display) -> ConnectorError {
        ConnectorError::Encoding {
            message: self.full_name().to_owned(),
            reason: e.to_string(),
        }
    }

    fn decoding_error(&self, e: impl std::fmt::Display) -> ConnectorError {
        ConnectorError::Decoding {
            message: self.full_name().to_owned(),
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const SENSOR_PROTO: &str = r#"
syntax = "proto3";
package lab;

message SamplerConfig {
  uint32 rate_hz = 1;
  string label = 2;
}

message Sample {
  int64 seq = 1;
  double value = 2;
  repeated string tags = 3;
}
"#;

    fn bundled() -> MessageSchema {
        MessageSchema::load(&SchemaSource::Bundled).unwrap()
    }

    #[test]
    fn bundled_schema_has_driver_messages() {
        let names = bundled().message_names();
        for expected in [
            "matrix_malos.DriverConfig",
            "matrix_malos.Imu",
            "matrix_malos.Humidity",
            "matrix_malos.Pressure",
            "matrix_malos.UV",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}: {names:?}");
        }
    }

    #[test]
    fn unknown_type_is_resolution_error() {
        let err = bundled().resolve("matrix_malos.Nope").unwrap_err();
        match err {
            ConnectorError::TypeResolution { name } => assert_eq!(name, "matrix_malos.Nope"),
            other => panic!("expected TypeResolution, got {other:?}"),
        }
    }

    #[test]
    fn config_round_trips() {
        let codec = bundled().resolve("matrix_malos.DriverConfig").unwrap();
        let config = json!({ "delay_between_updates": 0.5, "timeout_after_last_ping": 6.0 });

        let bytes = codec.encode(&config).unwrap();
        let back: serde_json::Value = codec.decode(&bytes).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn extra_fields_are_ignored() {
        let codec = bundled().resolve("matrix_malos.DriverConfig").unwrap();
        let with_extra = codec
            .encode(&json!({ "delay_between_updates": 1.0, "led_color": "red" }))
            .unwrap();
        let plain = codec.encode(&json!({ "delay_between_updates": 1.0 })).unwrap();
        assert_eq!(with_extra, plain);
    }

    #[test]
    fn wrong_field_type_is_encoding_error() {
        let codec = bundled().resolve("matrix_malos.DriverConfig").unwrap();
        let err = codec
            .encode(&json!({ "delay_between_updates": { "seconds": 1 } }))
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Encoding { .. }), "got {err:?}");
    }

    #[test]
    fn truncated_payload_is_decoding_error() {
        let codec = bundled().resolve("matrix_malos.Imu").unwrap();
        // Field 1 (yaw, fixed32) with only two of its four bytes.
        let err = codec.decode::<serde_json::Value>(&[0x0d, 0x00, 0x00]).unwrap_err();
        assert!(matches!(err, ConnectorError::Decoding { .. }), "got {err:?}");

        // Unterminated varint tag.
        let err = codec.decode::<serde_json::Value>(&[0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, ConnectorError::Decoding { .. }), "got {err:?}");
    }

    #[test]
    fn empty_payload_decodes_to_defaults() {
        let codec = bundled().resolve("matrix_malos.Pressure").unwrap();
        let value: serde_json::Value = codec.decode(&[]).unwrap();
        assert_eq!(
            value,
            json!({ "pressure": 0.0, "altitude": 0.0, "temperature": 0.0 })
        );
    }

    #[test]
    fn proto_file_source_compiles_at_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lab.proto");
        std::fs::write(&path, SENSOR_PROTO).unwrap();

        let schema = MessageSchema::load(&SchemaSource::ProtoFile {
            path,
            includes: vec![],
        })
        .unwrap();
        let sample = schema.resolve("lab.Sample").unwrap();

        let bytes = sample
            .encode(&json!({ "seq": 42, "value": 1.25, "tags": ["a", "b"] }))
            .unwrap();
        let back: serde_json::Value = sample.decode(&bytes).unwrap();
        assert_eq!(back, json!({ "seq": 42, "value": 1.25, "tags": ["a", "b"] }));
    }

    #[test]
    fn descriptor_set_source_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("driver.bin");
        std::fs::write(&path, BUNDLED_DESCRIPTOR_SET).unwrap();

        let schema = MessageSchema::load(&SchemaSource::DescriptorSet { path }).unwrap();
        assert!(schema.resolve("matrix_malos.Imu").is_ok());
    }

    #[test]
    fn unreadable_sources_are_schema_load_errors() {
        let missing = MessageSchema::load(&SchemaSource::ProtoFile {
            path: PathBuf::from("/definitely/not/here.proto"),
            includes: vec![],
        })
        .unwrap_err();
        assert!(matches!(missing, ConnectorError::SchemaLoad(_)));

        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("broken.proto");
        std::fs::write(&broken, "syntax = \"proto3\"; message {").unwrap();
        let err = MessageSchema::load(&SchemaSource::ProtoFile {
            path: broken,
            includes: vec![],
        })
        .unwrap_err();
        assert!(matches!(err, ConnectorError::SchemaLoad(_)));

        let garbage = dir.path().join("garbage.bin");
        std::fs::write(&garbage, [0xffu8, 0xff, 0xff]).unwrap();
        let err = MessageSchema::load(&SchemaSource::DescriptorSet { path: garbage }).unwrap_err();
        assert!(matches!(err, ConnectorError::SchemaLoad(_)));
    }

    #[test]
    fn binding_resolves_both_types() {
        let binding = SchemaBinding {
            source: SchemaSource::Bundled,
            config_message: "matrix_malos.DriverConfig".into(),
            data_message: "matrix_malos.UV".into(),
        };
        let (config, data) = binding.resolve().unwrap();
        assert_eq!(config.full_name(), "matrix_malos.DriverConfig");
        assert_eq!(data.full_name(), "matrix_malos.UV");
    }

    #[test]
    fn source_parses_from_toml() {
        let source: SchemaSource = toml::from_str(
            r#"
kind = "proto_file"
path = "/etc/malos/driver.proto"
includes = ["/etc/malos"]
"#,
        )
        .unwrap();
        assert_eq!(
            source,
            SchemaSource::ProtoFile {
                path: "/etc/malos/driver.proto".into(),
                includes: vec!["/etc/malos".into()],
            }
        );
    }
}
