//! Minimal Phoenix-channel client for the Realtime websocket.
//!
//! One socket is shared by every channel, and subscribers on the same topic
//! share one join. A writer task owns the sink, a reader task fans
//! `postgres_changes` frames out to a topic's subscribers and resolves
//! pending `phx_reply`s, and a heartbeat task keeps the
//! socket alive.

use futures::{ SinkExt, StreamExt };
use log::{ debug, error, info, warn };
use std::collections::HashMap;
use std::sync::atomic::{ AtomicBool, AtomicU64, Ordering };
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{ mpsc, oneshot, Mutex };
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use url::Url;

use crate::backend::{ ChangeEvent, Scope };
use crate::error::BackendError;
use crate::models::realtime::{
    PhoenixFrame,
    PostgresChangesFilter,
    EVENT_CLOSE,
    EVENT_ERROR,
    EVENT_POSTGRES_CHANGES,
    EVENT_REPLY,
};

const MAX_FRAME_SIZE: usize = 1024 * 1024;
const OUTBOUND_BUFFER: usize = 64;
const CHANNEL_BUFFER: usize = 64;
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Identifies one subscriber among those sharing a topic.
pub type SubscriberId = u64;

struct Subscriber {
    id: SubscriberId,
    events: mpsc::Sender<ChangeEvent>,
}

type Routes = Arc<Mutex<HashMap<String, Vec<Subscriber>>>>;
type PendingReplies = Arc<Mutex<HashMap<String, oneshot::Sender<PhoenixFrame>>>>;

/// Builds `wss://<host>/realtime/v1/websocket?apikey=..&vsn=1.0.0` from the
/// project's HTTP URL.
pub fn websocket_url(project_url: &str, api_key: &str) -> Result<Url, BackendError> {
    let mut url = Url::parse(project_url)?.join("realtime/v1/websocket")?;
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => {
            return Err(BackendError::Other(format!("Unsupported URL scheme: {}", other)));
        }
    };
    url.set_scheme(scheme).map_err(|_| BackendError::Other("Cannot set websocket scheme".into()))?;
    url.query_pairs_mut().append_pair("apikey", api_key).append_pair("vsn", "1.0.0");
    Ok(url)
}

pub fn topic_for(scope: &Scope) -> String {
    format!("realtime:{}", scope.channel_name())
}

/// A subscriber's share of a joined topic.
pub struct Joined {
    pub subscriber: SubscriberId,
    pub events: mpsc::Receiver<ChangeEvent>,
}

pub struct RealtimeClient {
    outbound: mpsc::Sender<PhoenixFrame>,
    routes: Routes,
    pending: PendingReplies,
    alive: Arc<AtomicBool>,
    next_ref: AtomicU64,
    next_subscriber: AtomicU64,
    tasks: Vec<JoinHandle<()>>,
}

impl RealtimeClient {
    pub async fn connect(url: Url, heartbeat_interval: Duration) -> Result<Self, BackendError> {
        info!("Connecting to realtime endpoint {}", url.host_str().unwrap_or("<unknown>"));
        let (socket, _) = connect_async(url.as_str()).await?;
        let (mut tx, mut rx) = socket.split();

        let (outbound, mut outbound_rx) = mpsc::channel::<PhoenixFrame>(OUTBOUND_BUFFER);
        let mut client = Self::with_outbound(outbound.clone());

        let writer_alive = client.alive.clone();
        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let json = match serde_json::to_string(&frame) {
                    Ok(json) => json,
                    Err(e) => {
                        error!("Failed to encode realtime frame: {}", e);
                        continue;
                    }
                };
                if let Err(e) = tx.send(Message::Text(json)).await {
                    error!("Realtime socket write failed: {}", e);
                    break;
                }
            }
            writer_alive.store(false, Ordering::SeqCst);
            let _ = tx.close().await;
        });

        let reader_routes = client.routes.clone();
        let reader_pending = client.pending.clone();
        let reader_alive = client.alive.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = rx.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if text.len() > MAX_FRAME_SIZE {
                            warn!("Dropping oversized realtime frame ({} bytes)", text.len());
                            continue;
                        }
                        match serde_json::from_str::<PhoenixFrame>(&text) {
                            Ok(frame) => {
                                dispatch(frame, &reader_routes, &reader_pending).await;
                            }
                            Err(e) => {
                                warn!("Failed to parse realtime frame: {}", e);
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        info!("Realtime socket closed by server");
                        break;
                    }
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                    Ok(Message::Binary(_)) | Ok(Message::Frame(_)) => {
                        debug!("Ignoring non-text realtime frame");
                    }
                    Err(e) => {
                        error!("Realtime socket read failed: {}", e);
                        break;
                    }
                }
            }
            shut_down(&reader_routes, &reader_pending, &reader_alive).await;
        });

        let heartbeat_ref = Arc::new(AtomicU64::new(1_000_000));
        let heartbeat = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let reference = heartbeat_ref.fetch_add(1, Ordering::SeqCst).to_string();
                if outbound.send(PhoenixFrame::heartbeat(reference)).await.is_err() {
                    break;
                }
            }
        });

        client.tasks = vec![writer, reader, heartbeat];
        Ok(client)
    }

    fn with_outbound(outbound: mpsc::Sender<PhoenixFrame>) -> Self {
        Self {
            outbound,
            routes: Arc::new(Mutex::new(HashMap::new())),
            pending: Arc::new(Mutex::new(HashMap::new())),
            alive: Arc::new(AtomicBool::new(true)),
            next_ref: AtomicU64::new(1),
            next_subscriber: AtomicU64::new(1),
            tasks: Vec::new(),
        }
    }

    /// `false` once the socket has failed or been closed by the server.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn make_ref(&self) -> String {
        self.next_ref.fetch_add(1, Ordering::SeqCst).to_string()
    }

    async fn send(&self, frame: PhoenixFrame) -> Result<(), BackendError> {
        if !self.is_alive() {
            return Err(BackendError::Unavailable("realtime socket is closed".to_string()));
        }
        self.outbound
            .send(frame).await
            .map_err(|_| BackendError::Unavailable("realtime socket is closed".to_string()))
    }

    /// Adds a subscriber to the topic for `scope`. Only the first subscriber
    /// of a topic sends `phx_join`; later ones share its change events.
    pub async fn join(&self, scope: &Scope) -> Result<Joined, BackendError> {
        let topic = topic_for(scope);
        let subscriber = self.next_subscriber.fetch_add(1, Ordering::SeqCst);
        let (events_tx, events) = mpsc::channel(CHANNEL_BUFFER);

        let first = {
            let mut routes = self.routes.lock().await;
            let subscribers = routes.entry(topic.clone()).or_default();
            let first = subscribers.is_empty();
            subscribers.push(Subscriber { id: subscriber, events: events_tx });
            first
        };
        if !first {
            debug!("Sharing realtime topic {} with subscriber {}", topic, subscriber);
            return Ok(Joined { subscriber, events });
        }

        let reference = self.make_ref();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().await.insert(reference.clone(), reply_tx);

        let filter = PostgresChangesFilter::all_events(scope.table(), scope.filter());
        let frame = PhoenixFrame::join(topic.clone(), &filter, reference.clone());
        let result = match self.send(frame).await {
            Err(e) => Err(e),
            Ok(()) =>
                match tokio::time::timeout(JOIN_TIMEOUT, reply_rx).await {
                    Ok(Ok(reply)) if reply.is_ok_reply() => Ok(()),
                    Ok(Ok(reply)) =>
                        Err(BackendError::ChannelRejected {
                            topic: topic.clone(),
                            reason: reply.payload.to_string(),
                        }),
                    Ok(Err(_)) =>
                        Err(BackendError::Unavailable("realtime socket closed during join".into())),
                    Err(_) =>
                        Err(BackendError::ChannelRejected {
                            topic: topic.clone(),
                            reason: "join timed out".to_string(),
                        }),
                }
        };

        if let Err(e) = result {
            self.pending.lock().await.remove(&reference);
            // Subscribers that arrived while the join was in flight lose
            // their stream too; the topic was never joined.
            self.routes.lock().await.remove(&topic);
            return Err(e);
        }

        info!("Joined realtime topic {}", topic);
        Ok(Joined { subscriber, events })
    }

    /// Drops one subscriber. The topic is left once nobody is subscribed.
    pub async fn leave(&self, scope: &Scope, subscriber: SubscriberId) -> Result<(), BackendError> {
        let topic = topic_for(scope);
        {
            let mut routes = self.routes.lock().await;
            let Some(subscribers) = routes.get_mut(&topic) else {
                return Ok(());
            };
            subscribers.retain(|s| s.id != subscriber);
            if !subscribers.is_empty() {
                return Ok(());
            }
            routes.remove(&topic);
        }
        let reference = self.make_ref();
        self.send(PhoenixFrame::leave(topic.clone(), reference)).await?;
        info!("Left realtime topic {}", topic);
        Ok(())
    }

    pub async fn joined_topics(&self) -> usize {
        self.routes.lock().await.len()
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Ends every subscriber's stream and fails every join still waiting.
async fn shut_down(routes: &Routes, pending: &PendingReplies, alive: &AtomicBool) {
    alive.store(false, Ordering::SeqCst);
    routes.lock().await.clear();
    pending.lock().await.clear();
}

async fn dispatch(frame: PhoenixFrame, routes: &Routes, pending: &PendingReplies) {
    match frame.event.as_str() {
        EVENT_REPLY => {
            let Some(reference) = frame.reference.clone() else {
                return;
            };
            if let Some(waiter) = pending.lock().await.remove(&reference) {
                let _ = waiter.send(frame);
            }
        }
        EVENT_POSTGRES_CHANGES => {
            let kind = frame.payload
                .get("data")
                .and_then(|d| d.get("type"))
                .and_then(|t| t.as_str())
                .unwrap_or("*")
                .to_string();
            let table = frame.payload
                .get("data")
                .and_then(|d| d.get("table"))
                .and_then(|t| t.as_str())
                .unwrap_or_default()
                .to_string();
            let senders: Vec<mpsc::Sender<ChangeEvent>> = routes
                .lock().await
                .get(&frame.topic)
                .map(|subscribers| subscribers.iter().map(|s| s.events.clone()).collect())
                .unwrap_or_default();
            for sender in senders {
                let event = ChangeEvent { table: table.clone(), kind: kind.clone() };
                if sender.send(event).await.is_err() {
                    debug!("A subscriber for {} is gone", frame.topic);
                }
            }
        }
        EVENT_ERROR | EVENT_CLOSE => {
            warn!("Realtime topic {} reported {}", frame.topic, frame.event);
            routes.lock().await.remove(&frame.topic);
        }
        other => {
            debug!("Ignoring realtime event {} on {}", other, frame.topic);
        }
    }
}
