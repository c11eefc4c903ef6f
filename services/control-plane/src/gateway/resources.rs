//! Resource change feed for UI subscribers.
//!
//! Changes are coalesced per resource id: a later change replaces the pending
//! one but keeps its place in line. A worker flushes the pending changes to
//! every subscriber on a fixed cadence.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::{
    extract::{ws::Message, ws::WebSocket, ws::WebSocketUpgrade, State},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use testlib_events::ChangeKind;
use testlib_id::ResourceId;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::resources::Resource;
use crate::state::AppState;

/// Outbound frame on the resources channel.
#[derive(Debug, Clone, Serialize)]
pub struct FeedFrame {
    pub event: String,
    pub data: FeedPayload,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedPayload {
    #[serde(rename = "type")]
    pub event_type: String,
    pub resource: Resource,
}

impl FeedFrame {
    fn new(kind: ChangeKind, resource: Resource) -> Self {
        let event = format!("resource:{kind}");
        Self {
            event: event.clone(),
            data: FeedPayload {
                event_type: event,
                resource,
            },
        }
    }
}

#[derive(Default)]
struct FeedInner {
    order: Vec<ResourceId>,
    pending: HashMap<ResourceId, (ChangeKind, Resource)>,
    subscribers: HashMap<Uuid, mpsc::UnboundedSender<String>>,
}

/// Coalescing queue of resource changes plus its subscribers.
#[derive(Clone, Default)]
pub struct ResourceFeed {
    inner: Arc<Mutex<FeedInner>>,
}

impl ResourceFeed {
    fn lock(&self) -> MutexGuard<'_, FeedInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queues a change, replacing any pending change to the same resource.
    pub fn push(&self, kind: ChangeKind, resource: &Resource) {
        let mut inner = self.lock();
        if !inner.pending.contains_key(&resource.id) {
            inner.order.push(resource.id.clone());
        }
        inner
            .pending
            .insert(resource.id.clone(), (kind, resource.clone()));
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Removes and returns pending changes in first-seen order.
    pub fn drain(&self) -> Vec<FeedFrame> {
        let mut inner = self.lock();
        let order = std::mem::take(&mut inner.order);
        let mut pending = std::mem::take(&mut inner.pending);
        order
            .into_iter()
            .filter_map(|id| pending.remove(&id))
            .map(|(kind, resource)| FeedFrame::new(kind, resource))
            .collect()
    }

    pub fn subscribe(&self) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.lock().subscribers.insert(id, tx);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: &Uuid) {
        self.lock().subscribers.remove(id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Sends every pending change to every subscriber. Changes are dropped
    /// when nobody listens. Returns the number of frames sent per subscriber.
    pub fn flush(&self) -> usize {
        let frames = self.drain();
        if frames.is_empty() {
            return 0;
        }

        let mut encoded = Vec::with_capacity(frames.len());
        for frame in &frames {
            match serde_json::to_string(frame) {
                Ok(text) => encoded.push(text),
                Err(e) => warn!(error = %e, resource_id = %frame.data.resource.id, "Failed to encode resource frame"),
            }
        }

        let mut inner = self.lock();
        inner.subscribers.retain(|id, tx| {
            let open = encoded.iter().all(|text| tx.send(text.clone()).is_ok());
            if !open {
                debug!(subscriber = %id, "Dropping closed resource subscriber");
            }
            open
        });
        encoded.len()
    }
}

/// Flushes the feed on a fixed cadence.
pub struct FeedWorker {
    feed: ResourceFeed,
    interval: Duration,
}

impl FeedWorker {
    pub fn new(feed: ResourceFeed, interval: Duration) -> Self {
        Self { feed, interval }
    }

    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            "Starting resource feed worker"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let sent = self.feed.flush();
                    if sent > 0 {
                        debug!(frames = sent, subscribers = self.feed.subscriber_count(), "Flushed resource changes");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Resource feed worker shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Upgrades a UI client onto the resources channel.
pub async fn resources_channel(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_subscriber(socket, state.feed().clone()))
}

async fn handle_subscriber(socket: WebSocket, feed: ResourceFeed) {
    let (id, mut rx) = feed.subscribe();
    info!(subscriber = %id, total = feed.subscriber_count(), "Resource subscriber connected");

    let (mut sender, mut receiver) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if let Err(e) = sender.send(Message::Text(text.into())).await {
                debug!(error = %e, "Failed to send resource frame");
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, subscriber = %id, "Resource channel error");
                break;
            }
        }
    }

    feed.unsubscribe(&id);
    writer.abort();
    info!(subscriber = %id, total = feed.subscriber_count(), "Resource subscriber disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{Network, NetworkParams, NetworkState, ResourceKind};

    fn resource(id: &str, name: &str) -> Resource {
        Resource::new(
            ResourceId::parse(id).unwrap(),
            "lab-01",
            name,
            ResourceKind::Network(Network {
                params: NetworkParams::default(),
                state: NetworkState::default(),
            }),
            1,
        )
    }

    #[test]
    fn test_coalesces_to_latest_change_in_first_seen_order() {
        let feed = ResourceFeed::default();
        feed.push(ChangeKind::Created, &resource("tid_10aaaa", "a"));
        feed.push(ChangeKind::Created, &resource("tid_10bbbb", "b"));
        feed.push(ChangeKind::Updated, &resource("tid_10aaaa", "a2"));
        assert_eq!(feed.pending_len(), 2);

        let frames = feed.drain();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event, "resource:updated");
        assert_eq!(frames[0].data.resource.name, "a2");
        assert_eq!(frames[1].event, "resource:created");
        assert!(feed.drain().is_empty());
    }

    #[tokio::test]
    async fn test_flush_reaches_subscribers() {
        let feed = ResourceFeed::default();
        let (_, mut rx) = feed.subscribe();
        let (closed, closed_rx) = feed.subscribe();
        drop(closed_rx);

        feed.push(ChangeKind::Deleted, &resource("tid_10aaaa", "a"));
        assert_eq!(feed.flush(), 1);

        let text = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["event"], "resource:deleted");
        assert_eq!(value["data"]["type"], "resource:deleted");
        assert_eq!(value["data"]["resource"]["id"], "tid_10aaaa");

        assert_eq!(feed.subscriber_count(), 1);
        feed.unsubscribe(&closed);
        assert_eq!(feed.flush(), 0);
    }
}
