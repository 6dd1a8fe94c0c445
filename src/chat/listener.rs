use log::{ debug, info, warn };
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::backend::{ BackendHandle, ChannelId, Scope };
use crate::error::ChatError;

const INVALIDATION_BUFFER: usize = 64;

/// "Something in this scope changed; re-fetch it."
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invalidated(pub Scope);

struct Subscription {
    channel: ChannelId,
    forwarder: JoinHandle<()>,
}

/// Holds the live-update channels of one view and merges their change
/// events into a single stream of invalidations.
pub struct LiveUpdateListener {
    backend: BackendHandle,
    subscriptions: HashMap<Scope, Subscription>,
    tx: mpsc::Sender<Invalidated>,
    rx: mpsc::Receiver<Invalidated>,
}

impl LiveUpdateListener {
    pub fn new(backend: BackendHandle) -> Self {
        let (tx, rx) = mpsc::channel(INVALIDATION_BUFFER);
        Self {
            backend,
            subscriptions: HashMap::new(),
            tx,
            rx,
        }
    }

    pub async fn subscribe(&mut self, scope: Scope) -> Result<(), ChatError> {
        if self.is_subscribed(&scope) {
            return Ok(());
        }
        if let Some(dead) = self.subscriptions.remove(&scope) {
            info!("Reopening live updates for {}", scope);
            self.backend.close(&dead.channel).await;
        }
        let mut stream = self.backend
            .open(scope.clone()).await
            .map_err(|e| ChatError::fetch("live updates", e))?;

        let tx = self.tx.clone();
        let forward_scope = scope.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = stream.events.recv().await {
                debug!("{} change on {} received for {}", event.kind, event.table, forward_scope);
                if tx.send(Invalidated(forward_scope.clone())).await.is_err() {
                    return;
                }
            }
            warn!("Live updates for {} stopped", forward_scope);
        });

        info!("Subscribed to live updates for {}", scope);
        self.subscriptions.insert(scope, Subscription { channel: stream.id, forwarder });
        Ok(())
    }

    pub async fn unsubscribe(&mut self, scope: &Scope) {
        if let Some(subscription) = self.subscriptions.remove(scope) {
            subscription.forwarder.abort();
            self.backend.close(&subscription.channel).await;
            info!("Unsubscribed from live updates for {}", scope);
        }
    }

    pub async fn unsubscribe_all(&mut self) {
        let scopes: Vec<Scope> = self.subscriptions.keys().cloned().collect();
        for scope in &scopes {
            self.unsubscribe(scope).await;
        }
    }

    /// `false` once the backend has ended the scope's stream, so the next
    /// [`subscribe`](Self::subscribe) reopens it.
    pub fn is_subscribed(&self, scope: &Scope) -> bool {
        self.subscriptions
            .get(scope)
            .map(|s| !s.forwarder.is_finished())
            .unwrap_or(false)
    }

    pub fn active_scopes(&self) -> Vec<Scope> {
        self.subscriptions
            .iter()
            .filter(|(_, s)| !s.forwarder.is_finished())
            .map(|(scope, _)| scope.clone())
            .collect()
    }

    /// Next invalidation for a scope that is still subscribed. Invalidations
    /// queued before an unsubscribe are dropped here.
    pub async fn next(&mut self) -> Option<Invalidated> {
        loop {
            let invalidated = self.rx.recv().await?;
            if self.subscriptions.contains_key(&invalidated.0) {
                return Some(invalidated);
            }
            debug!("Dropping stale invalidation for {}", invalidated.0);
        }
    }

    /// Like [`next`](Self::next) but returns `None` instead of waiting.
    pub fn try_next(&mut self) -> Option<Invalidated> {
        while let Ok(invalidated) = self.rx.try_recv() {
            if self.subscriptions.contains_key(&invalidated.0) {
                return Some(invalidated);
            }
        }
        None
    }
}

impl Drop for LiveUpdateListener {
    fn drop(&mut self) {
        if self.subscriptions.is_empty() {
            return;
        }
        let channels: Vec<ChannelId> = self.subscriptions
            .drain()
            .map(|(_, subscription)| {
                subscription.forwarder.abort();
                subscription.channel
            })
            .collect();
        let backend = self.backend.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                for channel in &channels {
                    backend.close(channel).await;
                }
            });
        }
    }
}
