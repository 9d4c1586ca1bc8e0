//! `replica_server`
//!
//! The authoritative side as far as reconciliation cares:
//! - Authoritative entity table with significance-gated outbound deltas
//! - Scripted scene standing in for the real simulation
//! - Fixed-rate async feed loop producing encoded frames

pub mod feed;
pub mod scene;

use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

pub use feed::AuthoritativeFeed;
pub use scene::ScriptedScene;

/// Totals from one [`run_feed`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeedSummary {
    pub ticks: u32,
    pub frames: u64,
    pub suppressed: u64,
}

/// Runs `scene` for `ticks` steps at `hz`, sending every queued event as a
/// frame on `tx`. Stops early if the receiver goes away.
pub async fn run_feed(
    mut feed: AuthoritativeFeed,
    mut scene: ScriptedScene,
    tx: mpsc::Sender<Bytes>,
    hz: u32,
    ticks: u32,
) -> anyhow::Result<FeedSummary> {
    let dt = 1.0 / hz.max(1) as f32;
    let mut interval = tokio::time::interval(Duration::from_secs_f32(dt));
    let mut summary = FeedSummary::default();

    scene.setup(&mut feed)?;
    'outer: for _ in 0..ticks {
        interval.tick().await;
        scene.step(&mut feed, dt)?;
        summary.ticks += 1;
        for frame in feed.encode_outbox()? {
            if tx.send(frame).await.is_err() {
                debug!("Feed receiver dropped");
                break 'outer;
            }
            summary.frames += 1;
        }
    }
    summary.suppressed = feed.suppressed();
    info!(?summary, "Feed finished");
    Ok(summary)
}
