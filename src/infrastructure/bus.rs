use crate::domain::events::WalletEvent;
use crate::domain::ports::EventBus;
use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

/// In-process event bus over a tokio broadcast channel.
///
/// Listeners (notifications, analytics) subscribe at startup; publishing
/// never fails just because nobody is listening.
pub struct BroadcastBus {
    sender: broadcast::Sender<WalletEvent>,
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl EventBus for BroadcastBus {
    async fn publish(&self, event: WalletEvent) -> Result<()> {
        // A send error only means there are no subscribers right now.
        let _ = self.sender.send(event);
        Ok(())
    }
}
