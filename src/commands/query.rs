use owo_colors::OwoColorize;
use serde_json::Value;

use super::{meta_to_json, open_manager, print_json};
use crate::config::Config;
use crate::error::Result;
use crate::meta::keys::KEY_TITLE;
use crate::query::Query;

/// List zettel whose metadata matches `text`
pub async fn cmd_query(config: &Config, text: &str, output_json: bool) -> Result<()> {
    let query = Query::parse(text)?;
    let manager = open_manager(config).await?;
    let result = manager.select_meta(&query).await;
    manager.stop().await;
    let metas = result?;

    if output_json {
        return print_json(&Value::Array(metas.iter().map(meta_to_json).collect()));
    }
    for meta in &metas {
        println!(
            "{} {}",
            meta.zid.to_string().cyan(),
            meta.get(KEY_TITLE).unwrap_or_default()
        );
    }
    if metas.is_empty() {
        println!("{}", "No matching zettel".dimmed());
    }
    Ok(())
}
