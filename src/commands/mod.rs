mod query;
mod serve;
mod stats;
mod zettel;

pub use query::cmd_query;
pub use serve::cmd_serve;
pub use stats::cmd_stats;
pub use zettel::{CreateOptions, cmd_create, cmd_delete, cmd_get};

use std::sync::Arc;

use serde_json::{Map, Value, json};

use crate::boxes::BoxRegistry;
use crate::config::Config;
use crate::error::Result;
use crate::index::MemoryIndex;
use crate::manager::Manager;
use crate::meta::Meta;

/// Connect and start the boxes named in `config`.
pub async fn open_manager(config: &Config) -> Result<Manager> {
    let manager = Manager::connect(
        &config.boxes,
        &BoxRegistry::with_defaults(),
        config.box_defaults(),
        Arc::new(MemoryIndex::new()),
    )?;
    manager.start().await?;
    Ok(manager)
}

pub fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Metadata as a JSON object, identifier first.
pub fn meta_to_json(meta: &Meta) -> Value {
    let mut map = Map::new();
    map.insert("id".to_string(), json!(meta.zid.to_string()));
    for (key, value) in meta.iter() {
        map.insert(key.to_string(), json!(value));
    }
    Value::Object(map)
}
