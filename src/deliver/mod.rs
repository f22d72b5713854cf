// src/deliver/mod.rs
use anyhow::Result;
use async_trait::async_trait;
use tracing::{error, info};

use crate::process::{Artifact, MergedRow};

pub mod email;
pub mod local;
pub mod relay;

pub use email::{BatchEmailDispatcher, SendGridClient};
pub use local::LocalFileDispatcher;
pub use relay::AttachmentRelay;

/// What a finished batch hands to its dispatchers.
pub struct Delivery<'a> {
    pub artifact: &'a Artifact,
    pub rows: &'a [MergedRow],
}

/// A delivery channel run after the workbook is produced.
///
/// Returns a human-readable success line; errors are reported by
/// [`dispatch_all`] and never undo the artifact.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, delivery: &Delivery<'_>) -> Result<String>;
}

/// Run each dispatcher in turn and collect one status line per dispatcher.
pub async fn dispatch_all(dispatchers: &[Box<dyn Dispatcher>], delivery: &Delivery<'_>) -> Vec<String> {
    let mut status = Vec::with_capacity(dispatchers.len());
    for d in dispatchers {
        match d.deliver(delivery).await {
            Ok(line) => {
                info!(dispatcher = d.name(), "delivered");
                status.push(line);
            }
            Err(e) => {
                error!(dispatcher = d.name(), error = ?e, "delivery failed");
                status.push(format!("Failed to {}: {:#}", d.name(), e));
            }
        }
    }
    status
}
