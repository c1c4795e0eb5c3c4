//! Best-effort fan-out of domain events to connected observers.
//!
//! Publishers hand events to a single distribution task over an unbounded
//! command channel and never wait on subscribers. Each subscriber owns a
//! bounded queue; when it is full the event is dropped for that subscriber
//! only. Delivery is at-most-once and nothing is replayed.

use std::collections::HashMap;
use thoughtmates_core::{BroadcastConfig, BroadcastEvent};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

enum Command {
    Subscribe {
        id: Uuid,
        sender: mpsc::Sender<BroadcastEvent>,
    },
    Unsubscribe(Uuid),
    Publish(BroadcastEvent),
    SubscriberCount(oneshot::Sender<usize>),
}

#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    commands: mpsc::UnboundedSender<Command>,
    subscriber_buffer: usize,
}

impl EventBroadcaster {
    /// Starts the distribution task. It exits once every handle is dropped.
    pub fn spawn(config: &BroadcastConfig) -> (Self, JoinHandle<()>) {
        let (commands, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_fan_out(receiver));

        let broadcaster = Self {
            commands,
            subscriber_buffer: config.subscriber_buffer.max(1),
        };
        (broadcaster, handle)
    }

    /// Registers an observer. Events published after this call are delivered.
    pub fn subscribe(&self) -> Subscription {
        let id = Uuid::new_v4();
        let (sender, receiver) = mpsc::channel(self.subscriber_buffer);
        self.send(Command::Subscribe { id, sender });

        Subscription {
            id,
            receiver,
            broadcaster: self.clone(),
        }
    }

    /// Events published after this call are not delivered to `id`.
    pub fn unsubscribe(&self, id: Uuid) {
        self.send(Command::Unsubscribe(id));
    }

    pub fn publish(&self, event: BroadcastEvent) {
        debug!("Publishing {}", event.name());
        self.send(Command::Publish(event));
    }

    pub async fn subscriber_count(&self) -> usize {
        let (reply, response) = oneshot::channel();
        self.send(Command::SubscriberCount(reply));
        response.await.unwrap_or(0)
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("Broadcast task has stopped, command discarded");
        }
    }
}

async fn run_fan_out(mut commands: mpsc::UnboundedReceiver<Command>) {
    let mut subscribers: HashMap<Uuid, mpsc::Sender<BroadcastEvent>> = HashMap::new();

    while let Some(command) = commands.recv().await {
        match command {
            Command::Subscribe { id, sender } => {
                subscribers.insert(id, sender);
                debug!("Subscriber {} connected ({} total)", id, subscribers.len());
            }
            Command::Unsubscribe(id) => {
                if subscribers.remove(&id).is_some() {
                    debug!("Subscriber {} disconnected", id);
                }
            }
            Command::Publish(event) => {
                subscribers.retain(|id, sender| match sender.try_send(event.clone()) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!("Subscriber {} is behind, dropped {}", id, event.name());
                        true
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                });
            }
            Command::SubscriberCount(reply) => {
                let _ = reply.send(subscribers.len());
            }
        }
    }

    info!("Event broadcaster stopped");
}

/// Receiving end for one observer. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: Uuid,
    receiver: mpsc::Receiver<BroadcastEvent>,
    broadcaster: EventBroadcaster,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// `None` once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<BroadcastEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<BroadcastEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn deleted(content_id: i64) -> BroadcastEvent {
        BroadcastEvent::ContentDeleted { content_id }
    }

    fn broadcaster(buffer: usize) -> EventBroadcaster {
        EventBroadcaster::spawn(&BroadcastConfig {
            subscriber_buffer: buffer,
        })
        .0
    }

    #[tokio::test]
    async fn test_delivers_to_every_subscriber() {
        let broadcaster = broadcaster(8);
        let mut first = broadcaster.subscribe();
        let mut second = broadcaster.subscribe();

        broadcaster.publish(deleted(7));

        assert_eq!(first.recv().await, Some(deleted(7)));
        assert_eq!(second.recv().await, Some(deleted(7)));
    }

    #[tokio::test]
    async fn test_unsubscribed_observer_misses_later_events() {
        let broadcaster = broadcaster(8);
        let mut stays = broadcaster.subscribe();
        let mut leaves = broadcaster.subscribe();

        broadcaster.publish(deleted(1));
        broadcaster.unsubscribe(leaves.id());
        broadcaster.publish(deleted(2));

        assert_eq!(stays.recv().await, Some(deleted(1)));
        assert_eq!(stays.recv().await, Some(deleted(2)));

        assert_eq!(leaves.recv().await, Some(deleted(1)));
        assert_eq!(leaves.recv().await, None);
    }

    #[tokio::test]
    async fn test_full_subscriber_does_not_block_others() {
        let broadcaster = broadcaster(1);
        let mut slow = broadcaster.subscribe();
        let mut fast = broadcaster.subscribe();

        broadcaster.publish(deleted(1));
        assert_eq!(fast.recv().await, Some(deleted(1)));
        broadcaster.publish(deleted(2));
        assert_eq!(fast.recv().await, Some(deleted(2)));

        // slow never read, so only the first event fit
        assert_eq!(slow.recv().await, Some(deleted(1)));
        assert!(timeout(Duration::from_millis(50), slow.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_dropping_subscription_unsubscribes() {
        let broadcaster = broadcaster(4);
        let subscription = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count().await, 1);

        drop(subscription);
        assert_eq!(broadcaster.subscriber_count().await, 0);
    }
}
