//! Stop signal shared by the accept loop, connection tasks and the cache sweeper.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;

/// One-shot, latched stop signal.
///
/// Long-lived tasks hold a [`broadcast::Receiver`] from [`Shutdown::subscribe`];
/// tasks spawned after the trigger can still call [`Shutdown::wait`] and return
/// immediately because the flag is latched.
#[derive(Debug)]
pub struct Shutdown {
    notify: broadcast::Sender<()>,
    fired: AtomicBool,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            notify: broadcast::channel(1).0,
            fired: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.notify.subscribe()
    }

    /// Latch the flag, then wake every subscriber. Idempotent.
    pub fn trigger(&self) {
        if !self.fired.swap(true, Ordering::SeqCst) {
            // No receivers is not an error here.
            let _ = self.notify.send(());
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        // Subscribe before reading the flag so a concurrent trigger is seen either way.
        let mut rx = self.notify.subscribe();
        if !self.is_triggered() {
            let _ = rx.recv().await;
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
