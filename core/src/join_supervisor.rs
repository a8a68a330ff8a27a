//! Join-retry timers
//!
//! Each join attempt gets a one-shot timer. If the server has not echoed the
//! join back before it fires, the join command is re-issued once. A confirmed
//! join cancels the timer; a part does not, since a late fire only re-issues
//! an already-obsolete join.

use crate::connection::OutboundSink;
use dashmap::DashMap;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

/// Per-channel join-retry supervisor
pub struct JoinSupervisor {
    /// Pending retry timers by channel
    pending: DashMap<String, JoinHandle<()>>,
    /// How long to wait for a join confirmation
    delay: Duration,
}

impl JoinSupervisor {
    /// Create a supervisor with the given confirmation timeout
    pub fn new(delay: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            delay,
        }
    }

    /// Start the retry timer for a channel that was just joined.
    ///
    /// Must be called from within a tokio runtime. The timer fires once; it
    /// does not reschedule itself.
    pub fn watch(&self, channel: &str, outbound: OutboundSink) {
        let delay = self.delay;
        let channel_name = channel.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            warn!(
                "No join confirmation for {} after {:?}, re-issuing join",
                channel_name, delay
            );
            outbound.send_line(&format!("JOIN {}", channel_name));
        });

        if let Some(previous) = self.pending.insert(channel.to_string(), handle) {
            previous.abort();
        }
    }

    /// Cancel the timer for a channel whose join was confirmed
    pub fn confirm(&self, channel: &str) {
        if let Some((_, handle)) = self.pending.remove(channel) {
            handle.abort();
        }
    }

    /// Cancel all pending timers (on disconnect)
    pub fn clear(&self) {
        self.pending.retain(|_, handle| {
            handle.abort();
            false
        });
    }

    /// Number of channels still awaiting confirmation
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn sink() -> (OutboundSink, mpsc::UnboundedReceiver<String>) {
        let sink = OutboundSink::new();
        let (tx, rx) = mpsc::unbounded_channel();
        sink.bind(tx);
        (sink, rx)
    }

    #[tokio::test]
    async fn test_unconfirmed_join_is_reissued() {
        let supervisor = JoinSupervisor::new(Duration::from_millis(30));
        let (outbound, mut rx) = sink();

        supervisor.watch("#channel", outbound);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(rx.try_recv().unwrap(), "JOIN #channel");
        // One-shot: no further retries
        assert!(rx.try_recv().is_err());
        assert_eq!(supervisor.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_confirmed_join_cancels_timer() {
        let supervisor = JoinSupervisor::new(Duration::from_millis(30));
        let (outbound, mut rx) = sink();

        supervisor.watch("#channel", outbound);
        supervisor.confirm("#channel");
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(supervisor.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_clear_cancels_all_timers() {
        let supervisor = JoinSupervisor::new(Duration::from_millis(30));
        let (outbound, mut rx) = sink();

        supervisor.watch("#one", outbound.clone());
        supervisor.watch("#two", outbound);
        supervisor.clear();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(supervisor.pending_count(), 0);
    }
}
