use std::collections::HashMap;

use tokio::select;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub mod message;
pub mod session;

pub use message::Egress;

/// Outbound queue depth per session; a session that falls this far behind
/// is considered too slow and is dropped
const SESSION_BUFFER: usize = 16;

/// Handle to the hub task owning the set of connected sessions.
///
/// All membership changes and fan-out go through the task's channels; no
/// other component touches the session set.
#[derive(Clone)]
pub struct Hub {
    broadcast: mpsc::Sender<Egress>,
    register: mpsc::Sender<(Uuid, mpsc::Sender<Egress>)>,
    unregister: mpsc::Sender<Uuid>,
}

impl Hub {
    /// Create and start a new session hub
    pub fn new(shutdown: CancellationToken) -> Hub {
        let (broadcast, broadcast_rx) = mpsc::channel(SESSION_BUFFER);
        let (register, register_rx) = mpsc::channel(1);
        let (unregister, unregister_rx) = mpsc::channel(1);

        tokio::spawn(run(broadcast_rx, register_rx, unregister_rx, shutdown));

        Hub {
            broadcast,
            register,
            unregister,
        }
    }

    /// Deliver a message to every connected session
    pub async fn broadcast(&self, message: Egress) {
        let _ = self.broadcast.send(message).await;
    }

    /// Add a session's outbound queue to the set
    pub(crate) async fn register(&self, id: Uuid, tx: mpsc::Sender<Egress>) {
        let _ = self.register.send((id, tx)).await;
    }

    /// Remove a session, closing its outbound queue
    pub(crate) async fn unregister(&self, id: Uuid) {
        let _ = self.unregister.send(id).await;
    }
}

/// The hub task: processes registration and fans broadcasts out
async fn run(
    mut broadcast: mpsc::Receiver<Egress>,
    mut register: mpsc::Receiver<(Uuid, mpsc::Sender<Egress>)>,
    mut unregister: mpsc::Receiver<Uuid>,
    shutdown: CancellationToken,
) {
    info!("started hub");
    let mut sessions: HashMap<Uuid, mpsc::Sender<Egress>> = HashMap::new();

    loop {
        select! {
            biased;

            _ = shutdown.cancelled() => break,

            Some((id, tx)) = register.recv() => {
                debug!(session = %id, "registered new session");
                sessions.insert(id, tx);
            }

            Some(id) = unregister.recv() => {
                debug!(session = %id, "unregistered session, if it exists");
                sessions.remove(&id);
            }

            Some(message) = broadcast.recv() => {
                // Slow peers are disconnected rather than blocking the hub
                sessions.retain(|id, tx| match tx.try_send(message.clone()) {
                    Ok(()) => true,
                    Err(_) => {
                        debug!(session = %id, "dropping unresponsive session");
                        false
                    }
                });
            }
        }
    }

    // Dropping the senders closes every session's outbound queue
    info!("hub shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcasts_reach_every_session() {
        let hub = Hub::new(CancellationToken::new());

        let (first_tx, mut first_rx) = mpsc::channel(SESSION_BUFFER);
        let (second_tx, mut second_rx) = mpsc::channel(SESSION_BUFFER);
        hub.register(Uuid::new_v4(), first_tx).await;
        hub.register(Uuid::new_v4(), second_tx).await;

        hub.broadcast(Egress::Brightness(42)).await;

        assert_eq!(first_rx.recv().await.unwrap(), Egress::Brightness(42));
        assert_eq!(second_rx.recv().await.unwrap(), Egress::Brightness(42));
    }

    #[tokio::test]
    async fn slow_sessions_are_dropped() {
        let hub = Hub::new(CancellationToken::new());

        let (tx, mut rx) = mpsc::channel(1);
        hub.register(Uuid::new_v4(), tx).await;

        // The first message fills the queue; the second finds it full and
        // the session is dropped, closing the queue
        hub.broadcast(Egress::State(true)).await;
        hub.broadcast(Egress::State(false)).await;

        assert_eq!(rx.recv().await, Some(Egress::State(true)));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn unregistered_sessions_stop_receiving() {
        let hub = Hub::new(CancellationToken::new());
        let id = Uuid::new_v4();

        let (tx, mut rx) = mpsc::channel(SESSION_BUFFER);
        hub.register(id, tx).await;
        hub.unregister(id).await;
        hub.broadcast(Egress::Brightness(10)).await;

        assert_eq!(rx.recv().await, None);
    }
}
