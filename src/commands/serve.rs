use std::sync::Arc;

use super::open_manager;
use crate::boxes::{UpdateInfo, UpdateReason};
use crate::config::Config;
use crate::error::Result;

/// Keep the boxes running and log every change until interrupted
pub async fn cmd_serve(config: &Config) -> Result<()> {
    let manager = open_manager(config).await?;
    manager.register_observer(Arc::new(|info: UpdateInfo| match info.reason {
        UpdateReason::Reload => tracing::info!("box {} reloaded", info.box_number),
        reason => tracing::info!("box {}: zettel {} {reason:?}", info.box_number, info.zid),
    }));
    for (i, location) in manager.location().iter().enumerate() {
        tracing::info!("box {}: {location}", i + 1);
    }

    let signal = tokio::signal::ctrl_c().await;
    manager.stop().await;
    signal?;
    Ok(())
}
