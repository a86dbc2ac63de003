//! Broadcast channel and its dispatcher
//!
//! Every line meant for the whole room goes through a single unbounded FIFO.
//! Exactly one dispatcher task drains it: for each line it copies the set of
//! live session outboxes under the registry lock, releases the lock, then
//! hands the line to each outbox. Outboxes are unbounded, so a slow or dead
//! recipient never holds up delivery to the others.

use crate::registry::{Outbound, Outbox, SessionId, SharedRegistry};
use log::{debug, error};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Producer side of the broadcast queue
#[derive(Debug, Clone)]
pub struct Broadcaster {
    tx: mpsc::UnboundedSender<String>,
}

impl Broadcaster {
    /// Creates the queue, returning the producer handle and the receiver
    /// that must be given to exactly one dispatcher.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueues a line for every live session. Never blocks.
    pub fn send(&self, line: impl Into<String>) {
        if let Err(e) = self.tx.send(line.into()) {
            error!("Failed to queue broadcast line: {}", e);
        }
    }
}

/// Spawns the dispatcher task that fans queued lines out to live sessions
pub fn spawn_dispatcher(
    registry: SharedRegistry,
    rx: mpsc::UnboundedReceiver<String>,
) -> JoinHandle<()> {
    tokio::spawn(run_dispatcher(registry, rx))
}

async fn run_dispatcher(registry: SharedRegistry, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = rx.recv().await {
        let recipients = {
            let registry = registry.read().await;
            registry.outboxes()
        };

        deliver(&recipients, &line);
    }

    error!("Broadcast queue closed, dispatcher stopping");
}

/// Hands one line to every recipient, returning how many accepted it
fn deliver(recipients: &[(SessionId, Outbox)], line: &str) -> usize {
    let mut delivered = 0;

    for (session_id, outbox) in recipients {
        match outbox.send(Outbound::Line(line.to_string())) {
            Ok(()) => delivered += 1,
            Err(_) => debug!("Session {} is gone, skipping broadcast", session_id),
        }
    }

    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SessionRegistry;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::RwLock;
    use tokio::time::timeout;

    fn addr(port: u16) -> std::net::SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    async fn next_line(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> String {
        match timeout(Duration::from_secs(1), rx.recv()).await {
            Ok(Some(Outbound::Line(line))) => line,
            other => panic!("expected a line, got {:?}", other),
        }
    }

    #[test]
    fn test_deliver_skips_closed_outboxes() {
        let (open_tx, mut open_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        drop(closed_rx);

        let recipients = vec![(1, closed_tx), (2, open_tx)];
        let delivered = deliver(&recipients, "hello");

        assert_eq!(delivered, 1);
        match open_rx.try_recv() {
            Ok(Outbound::Line(line)) => assert_eq!(line, "hello"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dispatcher_preserves_order_for_every_recipient() {
        let (broadcaster, rx) = Broadcaster::channel();
        let registry = Arc::new(RwLock::new(SessionRegistry::new(broadcaster.clone())));

        let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
        let (bob_tx, mut bob_rx) = mpsc::unbounded_channel();
        {
            let mut registry = registry.write().await;
            registry.register("alice", addr(5000), alice_tx).unwrap();
            registry.register("bob", addr(5001), bob_tx).unwrap();
        }

        spawn_dispatcher(Arc::clone(&registry), rx);

        for i in 0..20 {
            broadcaster.send(format!("m{}", i));
        }

        // Join notices come first, in registration order
        assert_eq!(next_line(&mut alice_rx).await, "* `alice` has joined the chat!");
        assert_eq!(next_line(&mut alice_rx).await, "* `bob` has joined the chat!");
        assert_eq!(next_line(&mut bob_rx).await, "* `alice` has joined the chat!");
        assert_eq!(next_line(&mut bob_rx).await, "* `bob` has joined the chat!");

        for i in 0..20 {
            assert_eq!(next_line(&mut alice_rx).await, format!("m{}", i));
            assert_eq!(next_line(&mut bob_rx).await, format!("m{}", i));
        }
    }

    #[tokio::test]
    async fn test_unregistered_session_receives_nothing_further() {
        let (broadcaster, rx) = Broadcaster::channel();
        let registry = Arc::new(RwLock::new(SessionRegistry::new(broadcaster.clone())));

        let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
        let (bob_tx, mut bob_rx) = mpsc::unbounded_channel();
        let bob_id = {
            let mut registry = registry.write().await;
            registry.register("alice", addr(5000), alice_tx).unwrap();
            let bob_id = registry.register("bob", addr(5001), bob_tx).unwrap();
            registry.unregister(bob_id);
            bob_id
        };
        assert!(!registry.read().await.is_live(bob_id));

        spawn_dispatcher(Arc::clone(&registry), rx);
        broadcaster.send("after");

        assert_eq!(next_line(&mut alice_rx).await, "* `alice` has joined the chat!");
        assert_eq!(next_line(&mut alice_rx).await, "* `bob` has joined the chat!");
        assert_eq!(next_line(&mut alice_rx).await, "* `bob` has left the chat.");
        assert_eq!(next_line(&mut alice_rx).await, "after");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(bob_rx.try_recv().is_err());
    }
}
