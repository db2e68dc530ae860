use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Per-reactor change feed. Every applied event is broadcast to the
/// subscribers of its reactor; slow receivers observe `Lagged`.
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a reactor's events. Creates the channel if needed, so a
    /// subscription may precede the reactor's creation.
    pub fn subscribe(&self, serial: &str) -> broadcast::Receiver<Event> {
        if let Some(sender) = self.channels.get(serial) {
            return sender.subscribe();
        }
        self.channels
            .entry(serial.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, serial: &str, event: &Event) {
        if let Some(sender) = self.channels.get(serial) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop a reactor's channel. Open receivers see the stream close.
    pub fn remove(&self, serial: &str) {
        self.channels.remove(serial);
    }

    pub fn subscriber_count(&self, serial: &str) -> usize {
        self.channels
            .get(serial)
            .map_or(0, |sender| sender.receiver_count())
    }
}
