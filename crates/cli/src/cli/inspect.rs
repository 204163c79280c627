//! `malos endpoints` and `malos schema`.

use std::path::Path;

use anyhow::Context;
use malos_connector::{ConnectorConfig, MessageSchema, SchemaSource};

use super::TargetArgs;

pub fn endpoints(mut config: ConnectorConfig, target: &TargetArgs) -> anyhow::Result<()> {
    target.apply(&mut config);
    let options = config.resolve();
    let descriptor = options.descriptor().context("invalid service address")?;

    println!("{} service at {descriptor}", config.family);
    for endpoint in descriptor.endpoints() {
        println!(
            "  {:<7} {:<10} {}",
            endpoint.role.as_str(),
            format!("{:?}", endpoint.role.direction()).to_lowercase(),
            endpoint.zmq_url()
        );
    }
    Ok(())
}

pub fn schema(config: &ConnectorConfig, proto: Option<&Path>) -> anyhow::Result<()> {
    let source = match proto {
        Some(path) => SchemaSource::ProtoFile {
            path: path.to_path_buf(),
            includes: Vec::new(),
        },
        None => config.resolve().schema.source,
    };

    let schema = MessageSchema::load(&source).context("loading schema")?;
    for name in schema.message_names() {
        println!("{name}");
    }
    Ok(())
}
