use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;

/// One registered channel, seen from the sending side
trait ChannelHandle: Send + Sync {
    fn depth(&self) -> usize;
    fn close(&self);
}

struct SenderHandle<T>(Mutex<Option<mpsc::Sender<T>>>);

impl<T: Send + 'static> ChannelHandle for SenderHandle<T> {
    fn depth(&self) -> usize {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, |tx| tx.max_capacity() - tx.capacity())
    }

    fn close(&self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

/// Named stage channels, recorded for queue-depth observability
///
/// The registry holds a sender of every channel, so a depth stays accurate
/// after the producers are gone and items are still buffered. That also keeps
/// the channels open until [`ChannelRegistry::close`] releases them; every
/// depth reads zero from then on.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: Mutex<BTreeMap<String, Box<dyn ChannelHandle>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bounded channel and records it under `name`
    pub fn channel<T: Send + 'static>(
        &self,
        name: &str,
        capacity: usize,
    ) -> (mpsc::Sender<T>, mpsc::Receiver<T>) {
        let (tx, rx) = mpsc::channel(capacity);
        self.register(name, &tx);
        (tx, rx)
    }

    /// Records an existing channel under `name`
    pub fn register<T: Send + 'static>(&self, name: &str, sender: &mpsc::Sender<T>) {
        let handle = SenderHandle(Mutex::new(Some(sender.clone())));
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), Box::new(handle));
    }

    /// Items buffered (or reserved for sending) in each named channel
    pub fn depths(&self) -> BTreeMap<String, usize> {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, handle)| (name.clone(), handle.depth()))
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Drops the registry's senders so receivers see the channels close
    pub fn close(&self) {
        for handle in self
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
        {
            handle.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_depths_track_buffered_items() {
        let registry = ChannelRegistry::new();
        let (tx, mut rx) = registry.channel::<u32>("archiver", 4);

        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();
        assert_eq!(registry.depths()["archiver"], 2);

        rx.recv().await.unwrap();
        assert_eq!(registry.depths()["archiver"], 1);
    }

    #[tokio::test]
    async fn test_depth_survives_dropped_producers() {
        let registry = ChannelRegistry::new();
        let (tx, mut rx) = registry.channel::<u32>("finish", 2);
        tx.send(7).await.unwrap();

        drop(tx);
        assert_eq!(registry.depths()["finish"], 1);
        assert_eq!(registry.names(), vec!["finish".to_string()]);

        assert_eq!(rx.recv().await, Some(7));
        assert_eq!(registry.depths()["finish"], 0);
    }

    #[tokio::test]
    async fn test_close_releases_channels() {
        let registry = ChannelRegistry::new();
        let (tx, mut rx) = registry.channel::<u32>("outlinks", 2);
        tx.send(1).await.unwrap();
        drop(tx);

        registry.close();
        assert_eq!(registry.depths()["outlinks"], 0);
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, None);
    }
}
