//! Session-oriented streamable HTTP transport, independent of axum.
//!
//! The HTTP layer calls `open_session`, `submit`, `request_sync`,
//! `attach_channel` and `terminate`; the protocol layer answers through a
//! `Responder` (or `send` when it has no session context). All bookkeeping
//! lives in one `SessionTable` behind a mutex that is never held across an
//! await or a channel write.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::Stream;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::core::mcp::{MessageKind, RequestId, RpcMessage};
use crate::infra::logging::{log_metric, set_gauge};
use crate::infra::runtime::limits::DEFAULT_SYNC_RESPONSE_TIMEOUT;
use crate::infra::runtime::session::{ChannelId, ChannelSender, Delivery, SessionTable};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Invalid session: missing, unknown or terminated session id")]
    InvalidSession,
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    #[error("delivery failed on every open channel of session {0}")]
    DeliveryFailed(String),
    #[error("no response to request {0} within {1:?}")]
    ResponseTimeout(RequestId, Duration),
    #[error("request {0} was abandoned before a response arrived")]
    HandlerDropped(RequestId),
    #[error("transport is closed")]
    Closed,
}

/// Observability feed; see `StreamableHttpTransport::subscribe_events`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    SessionOpened { session_id: String },
    SessionClosed { session_id: String },
    DeliveryFailed { session_id: String, channel: ChannelId },
    BroadcastFallback { request_id: Option<RequestId>, sessions: usize },
}

/// The protocol layer's entry point. Invoked once per inbound message; a
/// request is expected to be answered eventually through `responder`.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: RpcMessage, responder: Responder);
}

/// Session-scoped handle for answering one inbound message.
#[derive(Clone)]
pub struct Responder {
    transport: StreamableHttpTransport,
    session_id: Option<String>,
}

impl Responder {
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn send(&self, message: RpcMessage) -> Result<(), TransportError> {
        self.transport.route(self.session_id.as_deref(), message)
    }
}

struct Inner {
    state: Mutex<SessionTable>,
    handler: Arc<dyn MessageHandler>,
    events: broadcast::Sender<TransportEvent>,
    sync_timeout: Duration,
    closed: AtomicBool,
}

#[derive(Clone)]
pub struct StreamableHttpTransport {
    inner: Arc<Inner>,
}

impl StreamableHttpTransport {
    pub fn new(handler: Arc<dyn MessageHandler>, sync_timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SessionTable::default()),
                handler,
                events,
                sync_timeout,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn with_default_timeout(handler: Arc<dyn MessageHandler>) -> Self {
        Self::new(handler, DEFAULT_SYNC_RESPONSE_TIMEOUT)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent> {
        self.inner.events.subscribe()
    }

    pub fn session_count(&self) -> usize {
        self.inner.state.lock().len()
    }

    pub fn has_session(&self, session_id: &str) -> bool {
        self.inner.state.lock().contains(session_id)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending_len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn responder(&self, session_id: Option<&str>) -> Responder {
        Responder { transport: self.clone(), session_id: session_id.map(str::to_string) }
    }

    /// Mint a session for an `initialize` request and wait for its response.
    /// The session is torn down again if no response arrives.
    pub async fn open_session(&self, init: RpcMessage) -> Result<(String, RpcMessage), TransportError> {
        let Some(rid) = init.id.clone().filter(|_| init.kind() == MessageKind::Request) else {
            return Err(TransportError::InvalidMessage("initialize must be a request".into()));
        };

        let session_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        let sessions = {
            let mut state = self.inner.state.lock();
            // `close` sets the flag under this same lock
            if self.is_closed() {
                return Err(TransportError::Closed);
            }
            state.open(session_id.clone(), self.inner.handler.clone());
            state.track(&session_id, rid.clone());
            state.intercept(&session_id, rid.clone(), tx);
            state.len()
        };
        tracing::info!(session_id = %session_id, "session opened");
        set_gauge("sessions_active", sessions as f64);
        let _ = self.inner.events.send(TransportEvent::SessionOpened { session_id: session_id.clone() });

        self.dispatch(&session_id, init, self.inner.handler.clone());
        match self.await_response(&session_id, rid, rx).await {
            Ok(response) => Ok((session_id, response)),
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "initialize did not complete");
                let _ = self.terminate(&session_id);
                Err(e)
            }
        }
    }

    /// Forward a request and wait for its response instead of delivering it
    /// over a channel.
    pub async fn request_sync(&self, session_id: &str, message: RpcMessage) -> Result<RpcMessage, TransportError> {
        let Some(rid) = message.id.clone().filter(|_| message.kind() == MessageKind::Request) else {
            return Err(TransportError::InvalidMessage("expected a request".into()));
        };
        let (tx, rx) = oneshot::channel();
        let handler = {
            let mut state = self.inner.state.lock();
            let handler = state.get(session_id).map(|s| s.handler()).ok_or(TransportError::InvalidSession)?;
            state.track(session_id, rid.clone());
            state.intercept(session_id, rid.clone(), tx);
            handler
        };
        self.dispatch(session_id, message, handler);
        self.await_response(session_id, rid, rx).await
    }

    /// Forward a request or notification; the result, if any, arrives later
    /// on a delivery channel.
    pub fn submit(&self, session_id: &str, message: RpcMessage) -> Result<(), TransportError> {
        let handler = {
            let mut state = self.inner.state.lock();
            let handler = state.get(session_id).map(|s| s.handler()).ok_or(TransportError::InvalidSession)?;
            if let (MessageKind::Request, Some(rid)) = (message.kind(), message.id.clone()) {
                state.track(session_id, rid);
            }
            handler
        };
        self.dispatch(session_id, message, handler);
        Ok(())
    }

    /// Open a server-to-client stream for a live session.
    pub fn attach_channel(&self, session_id: &str) -> Result<DeliveryChannel, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel_id = self
            .inner
            .state
            .lock()
            .attach_channel(session_id, tx)
            .ok_or(TransportError::InvalidSession)?;
        tracing::debug!(session_id, channel = channel_id, "delivery channel attached");
        Ok(DeliveryChannel {
            rx,
            guard: ChannelGuard {
                transport: Arc::downgrade(&self.inner),
                session_id: session_id.to_string(),
                channel_id,
            },
        })
    }

    /// Close every channel, purge every pending entry and drop the session.
    pub fn terminate(&self, session_id: &str) -> Result<(), TransportError> {
        let (removed, remaining) = {
            let mut state = self.inner.state.lock();
            let removed = state.remove(session_id).ok_or(TransportError::InvalidSession)?;
            (removed, state.len())
        };
        tracing::info!(
            session_id,
            channels = removed.channel_count(),
            pending = removed.pending_count(),
            "session terminated"
        );
        drop(removed);
        set_gauge("sessions_active", remaining as f64);
        let _ = self.inner.events.send(TransportEvent::SessionClosed { session_id: session_id.to_string() });
        Ok(())
    }

    /// Terminate every session and refuse new ones.
    pub fn close(&self) {
        let sessions = {
            let mut state = self.inner.state.lock();
            self.inner.closed.store(true, Ordering::SeqCst);
            state.drain()
        };
        set_gauge("sessions_active", 0.0);
        for session in sessions {
            tracing::info!(session_id = %session.id, "session closed on shutdown");
            let _ = self.inner.events.send(TransportEvent::SessionClosed { session_id: session.id.clone() });
        }
    }

    /// Deliver a response or notification without session context. The
    /// owner is looked up from the pending-request mapping.
    pub fn send(&self, message: RpcMessage) -> Result<(), TransportError> {
        self.route(None, message)
    }

    fn route(&self, target: Option<&str>, message: RpcMessage) -> Result<(), TransportError> {
        let request_id = message.response_id().cloned();
        let plan = self.inner.state.lock().plan(target, request_id.as_ref());

        match plan {
            Delivery::Intercept { session_id, waiter, channels } => match waiter.send(message) {
                Ok(()) => Ok(()),
                Err(message) => {
                    tracing::debug!(session_id = %session_id, "synchronous caller gone; using channels");
                    self.deliver_to_session(&session_id, channels, &message)
                }
            },
            Delivery::Session { session_id, channels } => {
                self.deliver_to_session(&session_id, channels, &message)
            }
            Delivery::Broadcast(targets) => {
                match &request_id {
                    Some(rid) => tracing::warn!(
                        request_id = %rid,
                        sessions = targets.len(),
                        "no owning session for response; broadcasting"
                    ),
                    None => tracing::debug!(sessions = targets.len(), "broadcasting notification"),
                }
                log_metric("transport", "broadcast_fallback_total", 1.0);
                let _ = self.inner.events.send(TransportEvent::BroadcastFallback {
                    request_id,
                    sessions: targets.len(),
                });
                for (session_id, channels) in targets {
                    let _ = self.write_channels(&session_id, channels, &message);
                }
                Ok(())
            }
        }
    }

    fn deliver_to_session(
        &self,
        session_id: &str,
        channels: Vec<(ChannelId, ChannelSender)>,
        message: &RpcMessage,
    ) -> Result<(), TransportError> {
        if channels.is_empty() {
            tracing::debug!(session_id, "no open delivery channel; message unobserved");
            return Ok(());
        }
        let (delivered, failed) = self.write_channels(session_id, channels, message);
        if delivered == 0 && failed > 0 {
            return Err(TransportError::DeliveryFailed(session_id.to_string()));
        }
        Ok(())
    }

    /// Write to each channel; dead ones are detached and reported.
    fn write_channels(
        &self,
        session_id: &str,
        channels: Vec<(ChannelId, ChannelSender)>,
        message: &RpcMessage,
    ) -> (usize, usize) {
        let mut dead = Vec::new();
        let mut delivered = 0;
        for (channel_id, tx) in channels {
            match tx.send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => dead.push(channel_id),
            }
        }
        if !dead.is_empty() {
            let mut state = self.inner.state.lock();
            for channel in &dead {
                state.detach_channel(session_id, *channel);
            }
        }
        for channel in &dead {
            tracing::warn!(session_id, channel = *channel, "delivery channel closed; removed");
            log_metric("transport", "delivery_failure_total", 1.0);
            let _ = self.inner.events.send(TransportEvent::DeliveryFailed {
                session_id: session_id.to_string(),
                channel: *channel,
            });
        }
        (delivered, dead.len())
    }

    fn dispatch(&self, session_id: &str, message: RpcMessage, handler: Arc<dyn MessageHandler>) {
        let responder = self.responder(Some(session_id));
        tokio::spawn(async move {
            handler.handle(message, responder).await;
        });
    }

    async fn await_response(
        &self,
        session_id: &str,
        rid: RequestId,
        rx: oneshot::Receiver<RpcMessage>,
    ) -> Result<RpcMessage, TransportError> {
        match tokio::time::timeout(self.inner.sync_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                self.inner.state.lock().cancel_intercept(session_id, &rid);
                Err(TransportError::HandlerDropped(rid))
            }
            Err(_) => {
                self.inner.state.lock().cancel_intercept(session_id, &rid);
                Err(TransportError::ResponseTimeout(rid, self.inner.sync_timeout))
            }
        }
    }
}

/// Detaches its channel from the session when the stream is dropped, e.g.
/// when the client disconnects.
struct ChannelGuard {
    transport: Weak<Inner>,
    session_id: String,
    channel_id: ChannelId,
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.transport.upgrade() {
            if inner.state.lock().detach_channel(&self.session_id, self.channel_id) {
                tracing::debug!(session_id = %self.session_id, channel = self.channel_id, "delivery channel detached");
            }
        }
    }
}

/// Messages for one open channel. Ends when the session is terminated.
pub struct DeliveryChannel {
    rx: mpsc::UnboundedReceiver<RpcMessage>,
    guard: ChannelGuard,
}

impl DeliveryChannel {
    pub fn session_id(&self) -> &str {
        &self.guard.session_id
    }

    pub fn id(&self) -> ChannelId {
        self.guard.channel_id
    }

    pub async fn recv(&mut self) -> Option<RpcMessage> {
        self.rx.recv().await
    }
}

impl Stream for DeliveryChannel {
    type Item = RpcMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
