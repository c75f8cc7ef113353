//! Session bookkeeping for the streamable HTTP transport.
//!
//! Everything here is plain data behind the transport's mutex: the session
//! table, the global request-id -> session mapping and the one-shot response
//! interceptors. Nothing in this module awaits or touches I/O.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};

use crate::core::mcp::{RequestId, RpcMessage};
use crate::infra::runtime::mcp_transport::MessageHandler;

pub type ChannelId = u64;
pub type ChannelSender = mpsc::UnboundedSender<RpcMessage>;

/// One logical client connection.
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    handler: Arc<dyn MessageHandler>,
    channels: HashMap<ChannelId, ChannelSender>,
    pending: HashSet<RequestId>,
}

impl Session {
    fn new(id: String, handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            handler,
            channels: HashMap::new(),
            pending: HashSet::new(),
        }
    }

    pub fn handler(&self) -> Arc<dyn MessageHandler> {
        self.handler.clone()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn senders(&self) -> Vec<(ChannelId, ChannelSender)> {
        self.channels.iter().map(|(id, tx)| (*id, tx.clone())).collect()
    }
}

/// Where an outbound message goes, decided under the lock and carried out
/// after it is released.
pub enum Delivery {
    /// A synchronous caller is waiting on this exact response. The session's
    /// channels are included in case the waiter has already gone away.
    Intercept {
        session_id: String,
        waiter: oneshot::Sender<RpcMessage>,
        channels: Vec<(ChannelId, ChannelSender)>,
    },
    /// Every open channel of the owning session.
    Session {
        session_id: String,
        channels: Vec<(ChannelId, ChannelSender)>,
    },
    /// Owner unknown: every session that has at least one open channel.
    Broadcast(Vec<(String, Vec<(ChannelId, ChannelSender)>)>),
}

#[derive(Default)]
pub struct SessionTable {
    sessions: HashMap<String, Session>,
    pending: HashMap<RequestId, String>,
    interceptors: HashMap<(String, RequestId), oneshot::Sender<RpcMessage>>,
    next_channel: ChannelId,
}

impl SessionTable {
    pub fn open(&mut self, id: String, handler: Arc<dyn MessageHandler>) {
        self.sessions.insert(id.clone(), Session::new(id, handler));
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn owner(&self, request_id: &RequestId) -> Option<&str> {
        self.pending.get(request_id).map(String::as_str)
    }

    pub fn attach_channel(&mut self, session_id: &str, tx: ChannelSender) -> Option<ChannelId> {
        let session = self.sessions.get_mut(session_id)?;
        self.next_channel += 1;
        let id = self.next_channel;
        session.channels.insert(id, tx);
        Some(id)
    }

    pub fn detach_channel(&mut self, session_id: &str, channel: ChannelId) -> bool {
        self.sessions
            .get_mut(session_id)
            .is_some_and(|s| s.channels.remove(&channel).is_some())
    }

    /// Record that `session_id` is waiting on `request_id`. Ids are only
    /// unique per session; if another session owns the same id the newest
    /// submitter wins the global mapping.
    pub fn track(&mut self, session_id: &str, request_id: RequestId) -> bool {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return false;
        };
        session.pending.insert(request_id.clone());
        if let Some(previous) = self.pending.insert(request_id.clone(), session_id.to_string()) {
            if previous != session_id {
                tracing::debug!(
                    request_id = %request_id,
                    previous = %previous,
                    session_id,
                    "request id reused across sessions"
                );
            }
        }
        true
    }

    /// Drop the bookkeeping for one request. The global entry only goes if
    /// it still points at this session.
    pub fn untrack(&mut self, session_id: &str, request_id: &RequestId) {
        if let Some(session) = self.sessions.get_mut(session_id) {
            session.pending.remove(request_id);
        }
        if self.pending.get(request_id).is_some_and(|owner| owner == session_id) {
            self.pending.remove(request_id);
        }
    }

    pub fn intercept(
        &mut self,
        session_id: &str,
        request_id: RequestId,
        waiter: oneshot::Sender<RpcMessage>,
    ) {
        self.interceptors.insert((session_id.to_string(), request_id), waiter);
    }

    /// Abandon a synchronous wait (timeout) together with its request entry.
    pub fn cancel_intercept(&mut self, session_id: &str, request_id: &RequestId) {
        self.interceptors.remove(&(session_id.to_string(), request_id.clone()));
        self.untrack(session_id, request_id);
    }

    pub fn interceptor_count(&self) -> usize {
        self.interceptors.len()
    }

    /// Decide where `request_id`'s response (or a notification, when
    /// `request_id` is `None`) should go. `target` is the session the
    /// sender is acting for, when known.
    ///
    /// Resolving a response consumes its pending entry and interceptor, so
    /// a second `plan` for the same id no longer finds an owner.
    pub fn plan(&mut self, target: Option<&str>, request_id: Option<&RequestId>) -> Delivery {
        // A known but terminated target must not fall through to the global
        // mapping, where its id may now belong to someone else.
        let owner = match (target, request_id) {
            (Some(t), _) => self.sessions.contains_key(t).then(|| t.to_string()),
            (None, Some(rid)) => self.pending.get(rid).cloned(),
            (None, None) => None,
        };

        let Some(owner) = owner else {
            return Delivery::Broadcast(self.open_channels());
        };
        let channels = self.sessions.get(&owner).map(Session::senders).unwrap_or_default();

        if let Some(rid) = request_id {
            let waiter = self.interceptors.remove(&(owner.clone(), rid.clone()));
            self.untrack(&owner, rid);
            if let Some(waiter) = waiter {
                return Delivery::Intercept { session_id: owner, waiter, channels };
            }
        }
        Delivery::Session { session_id: owner, channels }
    }

    fn open_channels(&self) -> Vec<(String, Vec<(ChannelId, ChannelSender)>)> {
        self.sessions
            .values()
            .filter(|s| !s.channels.is_empty())
            .map(|s| (s.id.clone(), s.senders()))
            .collect()
    }

    /// Remove a session with everything it owns. Dropping the session drops
    /// its channel senders, which ends every attached stream.
    pub fn remove(&mut self, session_id: &str) -> Option<Session> {
        let session = self.sessions.remove(session_id)?;
        for rid in &session.pending {
            if self.pending.get(rid).is_some_and(|owner| owner == session_id) {
                self.pending.remove(rid);
            }
        }
        self.interceptors.retain(|(sid, _), _| sid != session_id);
        Some(session)
    }

    pub fn drain(&mut self) -> Vec<Session> {
        self.pending.clear();
        self.interceptors.clear();
        self.sessions.drain().map(|(_, s)| s).collect()
    }
}
