// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0

use super::event::{parse_event, TopologyEvent, CHANNELS};
use super::transport::{Notification, NotificationStream, SentinelTransport};
use crate::connection_pool::NodeConnector;
use crate::endpoint::Endpoint;
use crate::topology::TopologyStore;
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Connecting,
    Subscribed,
    Disconnected,
    Shutdown,
}

/// Subscribes to one sentinel and applies its topology notifications to the
/// shared store. Holds only immutable startup parameters; reconnect state is
/// local to [`run`](TopologyListener::run).
pub struct TopologyListener<C: NodeConnector, T: SentinelTransport> {
    sentinel: Endpoint,
    groups: Arc<HashSet<String>>,
    store: Arc<TopologyStore<C>>,
    transport: Arc<T>,
    retry_wait: Duration,
}

enum Session {
    Lost,
    ShutdownRequested,
}

impl<C: NodeConnector, T: SentinelTransport> TopologyListener<C, T> {
    pub fn new(
        sentinel: Endpoint,
        groups: Arc<HashSet<String>>,
        store: Arc<TopologyStore<C>>,
        transport: Arc<T>,
        retry_wait: Duration,
    ) -> Self {
        Self {
            sentinel,
            groups,
            store,
            transport,
            retry_wait,
        }
    }

    /// Runs the listener on the tokio runtime until `parent` (or the
    /// returned handle) asks it to stop.
    pub fn spawn(self, parent: &CancellationToken) -> ListenerHandle {
        let shutdown = parent.child_token();
        let (state_tx, state_rx) = watch::channel(ListenerState::Connecting);
        let sentinel = self.sentinel.clone();
        let task = tokio::spawn(self.run(shutdown.clone(), state_tx));
        ListenerHandle {
            sentinel,
            state: state_rx,
            shutdown,
            task,
        }
    }

    async fn run(self, shutdown: CancellationToken, state: watch::Sender<ListenerState>) {
        while !shutdown.is_cancelled() {
            state.send_replace(ListenerState::Connecting);
            let subscribed = tokio::select! {
                _ = shutdown.cancelled() => break,
                subscribed = self.transport.subscribe(&self.sentinel, &CHANNELS) => subscribed,
            };

            match subscribed {
                Ok(stream) => {
                    state.send_replace(ListenerState::Subscribed);
                    info!(sentinel = %self.sentinel, "subscribed to sentinel");
                    if let Session::ShutdownRequested = self.consume(stream, &shutdown).await {
                        info!(sentinel = %self.sentinel, "unsubscribing from sentinel");
                        break;
                    }
                    warn!(sentinel = %self.sentinel, "lost connection to sentinel");
                }
                Err(err) => {
                    warn!(sentinel = %self.sentinel, error = %err, "cannot subscribe to sentinel");
                }
            }

            state.send_replace(ListenerState::Disconnected);
            debug!(
                sentinel = %self.sentinel,
                retry_ms = self.retry_wait.as_millis() as u64,
                "sleeping before resubscribing"
            );
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.retry_wait) => {}
            }
        }

        state.send_replace(ListenerState::Shutdown);
        info!(sentinel = %self.sentinel, "listener stopped");
    }

    // Dropping the stream on shutdown releases the subscription connection.
    async fn consume(&self, mut stream: NotificationStream, shutdown: &CancellationToken) -> Session {
        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => return Session::ShutdownRequested,
                next = stream.next() => next,
            };
            let Some(notification) = next else {
                return Session::Lost;
            };
            tokio::select! {
                _ = shutdown.cancelled() => return Session::ShutdownRequested,
                _ = self.handle(notification) => {}
            }
        }
    }

    async fn handle(&self, notification: Notification) {
        info!(
            sentinel = %self.sentinel,
            channel = %notification.channel,
            payload = %notification.payload,
            "sentinel published"
        );
        let event = match parse_event(&notification.channel, &notification.payload) {
            Ok(Some(event)) => event,
            Ok(None) => {
                debug!(channel = %notification.channel, "ignoring event for a non-replica instance");
                return;
            }
            Err(err) => {
                warn!(sentinel = %self.sentinel, error = %err, "dropping invalid notification");
                return;
            }
        };
        if !self.groups.contains(event.group()) {
            debug!(group = event.group(), channel = %notification.channel, "ignoring event for unwatched group");
            return;
        }
        apply_event(&self.store, &event).await;
    }
}

/// Applies one parsed event to the store, logging instead of failing.
pub async fn apply_event<C: NodeConnector>(store: &TopologyStore<C>, event: &TopologyEvent) {
    let result = match event {
        TopologyEvent::SwitchMaster { group, new_master } => Ok(store.promote(group, new_master)),
        TopologyEvent::ReplicaDown { group, replica } => store.mark_replica_down(group, replica),
        TopologyEvent::ReplicaUp { group, replica } => store.mark_replica_up(group, replica).await,
    };
    if let Err(err) = result {
        warn!(group = event.group(), error = %err, "failed to apply topology event");
    }
}

/// Owner side of a running listener.
pub struct ListenerHandle {
    sentinel: Endpoint,
    state: watch::Receiver<ListenerState>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    pub fn sentinel(&self) -> &Endpoint {
        &self.sentinel
    }

    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    /// Resolves once the listener reaches `target`; false if it stopped first.
    pub async fn wait_for_state(&self, target: ListenerState) -> bool {
        let mut state = self.state.clone();
        let reached = match state.wait_for(|s| *s == target || *s == ListenerState::Shutdown).await {
            Ok(reached) => *reached == target,
            // Sender dropped: the task is gone
            Err(_) => target == ListenerState::Shutdown,
        };
        reached
    }

    /// Requests shutdown and waits for the task to finish.
    pub async fn shutdown(self) {
        info!(sentinel = %self.sentinel, "shutting down listener");
        self.shutdown.cancel();
        if let Err(err) = self.task.await {
            warn!(sentinel = %self.sentinel, error = %err, "listener task failed");
        }
    }
}
