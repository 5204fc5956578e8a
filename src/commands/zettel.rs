use owo_colors::OwoColorize;
use serde_json::json;

use super::{meta_to_json, open_manager, print_json};
use crate::config::Config;
use crate::error::Result;
use crate::id::Zid;
use crate::meta::Meta;
use crate::meta::keys::{KEY_ROLE, KEY_SYNTAX, KEY_TAGS, KEY_TITLE};
use crate::zettel::Zettel;

/// Options for creating a zettel from the command line
pub struct CreateOptions {
    pub title: String,
    pub role: Option<String>,
    pub tags: Vec<String>,
    pub syntax: Option<String>,
    pub content: String,
}

pub async fn cmd_create(config: &Config, options: CreateOptions) -> Result<()> {
    let mut meta = Meta::new(Zid::INVALID);
    meta.set(KEY_TITLE, &options.title);
    if let Some(role) = &options.role {
        meta.set(KEY_ROLE, role);
    }
    if !options.tags.is_empty() {
        let tags: Vec<String> = options
            .tags
            .iter()
            .map(|t| format!("#{}", t.trim_start_matches('#')))
            .collect();
        meta.set(KEY_TAGS, &tags.join(" "));
    }
    if let Some(syntax) = &options.syntax {
        meta.set(KEY_SYNTAX, syntax);
    }

    let manager = open_manager(config).await?;
    let result = manager
        .create_zettel(Zettel::new(meta, options.content))
        .await;
    manager.stop().await;
    println!("{}", result?);
    Ok(())
}

/// Show metadata and content of a zettel
pub async fn cmd_get(config: &Config, zid: &str, output_json: bool) -> Result<()> {
    let zid = Zid::parse(zid)?;
    let manager = open_manager(config).await?;
    let result = manager.get_zettel(zid).await;
    manager.stop().await;
    let zettel = result?;

    if output_json {
        let mut value = meta_to_json(&zettel.meta);
        if let Some(text) = zettel.text() {
            value["content"] = json!(text);
        }
        return print_json(&value);
    }
    print!("{}", zettel.meta.to_text().dimmed());
    println!();
    match zettel.text() {
        Some(text) => print!("{text}"),
        None => println!("{}", format!("<{} bytes binary>", zettel.content.len()).dimmed()),
    }
    Ok(())
}

pub async fn cmd_delete(config: &Config, zid: &str) -> Result<()> {
    let zid = Zid::parse(zid)?;
    let manager = open_manager(config).await?;
    let result = manager.delete_zettel(zid).await;
    manager.stop().await;
    result?;
    println!("Deleted {zid}");
    Ok(())
}
