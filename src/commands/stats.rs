use serde_json::json;

use super::{open_manager, print_json};
use crate::config::Config;
use crate::error::Result;

pub async fn cmd_stats(config: &Config, output_json: bool) -> Result<()> {
    let manager = open_manager(config).await?;
    let locations = manager.location();
    let stats = manager.read_stats();
    manager.stop().await;

    if output_json {
        let boxes: Vec<_> = locations
            .iter()
            .zip(&stats.boxes)
            .map(|(location, b)| {
                json!({
                    "location": location,
                    "read_only": b.read_only,
                    "zettel": b.zettel_count,
                })
            })
            .collect();
        return print_json(&json!({
            "read_only": stats.read_only,
            "zettel": stats.zettel_count,
            "boxes": boxes,
            "index": {
                "zettel": stats.index.zettel,
                "words": stats.index.words,
                "urls": stats.index.urls,
            },
        }));
    }

    println!("Boxes:");
    for (i, (location, b)) in locations.iter().zip(&stats.boxes).enumerate() {
        let mode = if b.read_only { " (read-only)" } else { "" };
        println!("  {}. {location}{mode}: {} zettel", i + 1, b.zettel_count);
    }
    println!(
        "Index: {} zettel, {} words, {} URLs",
        stats.index.zettel, stats.index.words, stats.index.urls
    );
    Ok(())
}
