//! Network-to-frame mailbox.
//!
//! When frames arrive on a network task and the registry is ticked on the
//! render loop, validated events cross over through a channel. One channel
//! per source keeps the add/change/remove order of each id intact; the frame
//! loop drains it without blocking before each tick.

use async_trait::async_trait;
use bytes::Bytes;
use replica_shared::{
    net::{decode_event, ReplicaEvent},
    render::RenderSurface,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::registry::EntityRegistry;

/// Creates a connected sender/mailbox pair.
pub fn mailbox() -> (MailboxSender, Mailbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MailboxSender { tx }, Mailbox { rx })
}

/// Network side of the mailbox.
#[derive(Debug, Clone)]
pub struct MailboxSender {
    tx: mpsc::UnboundedSender<ReplicaEvent>,
}

impl MailboxSender {
    pub fn send(&self, event: ReplicaEvent) -> anyhow::Result<()> {
        self.tx
            .send(event)
            .map_err(|_| anyhow::anyhow!("mailbox closed"))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Frame side of the mailbox.
#[derive(Debug)]
pub struct Mailbox {
    rx: mpsc::UnboundedReceiver<ReplicaEvent>,
}

impl Mailbox {
    /// Applies everything queued so far. Never waits.
    pub fn drain_into<S: RenderSurface>(&mut self, registry: &mut EntityRegistry<S>) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.rx.try_recv() {
            registry.apply(event);
            applied += 1;
        }
        applied
    }

    /// Waits for the next event; `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<ReplicaEvent> {
        self.rx.recv().await
    }
}

/// Source of encoded frames (socket reader, test script, ...).
#[async_trait]
pub trait EventSource: Send {
    /// Next frame, or `None` when the source is exhausted.
    async fn next_frame(&mut self) -> Option<Bytes>;
}

#[async_trait]
impl EventSource for mpsc::Receiver<Bytes> {
    async fn next_frame(&mut self) -> Option<Bytes> {
        self.recv().await
    }
}

#[async_trait]
impl EventSource for std::vec::IntoIter<Bytes> {
    async fn next_frame(&mut self) -> Option<Bytes> {
        self.next()
    }
}

/// Counters from one [`pump`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub forwarded: u64,
    pub undecodable: u64,
    pub rejected: u64,
}

/// Decodes and validates frames from `source` and forwards them until the
/// source ends. Bad frames are logged and skipped.
pub async fn pump<E: EventSource>(mut source: E, sender: MailboxSender) -> anyhow::Result<PumpStats> {
    let mut stats = PumpStats::default();
    while let Some(frame) = source.next_frame().await {
        let event = match decode_event(&frame) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, len = frame.len(), "Dropping undecodable frame");
                stats.undecodable += 1;
                continue;
            }
        };
        let event = match event.validate() {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Dropping malformed event");
                stats.rejected += 1;
                continue;
            }
        };
        sender.send(event)?;
        stats.forwarded += 1;
    }
    debug!(?stats, "Event source exhausted");
    Ok(stats)
}
