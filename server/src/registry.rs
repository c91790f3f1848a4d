//! Registry of live duplex connections keyed by session id.
//!
//! Every send goes through here. A send to an unknown id is a no-op, and a
//! connection that is closed or fails a send is removed on the spot, so
//! callers never check liveness first and never see transport errors.
//!
//! The table is a `DashMap`; no shard guard is ever held across an `.await`.
//! Connections are cloned out before sending, and broadcasts collect
//! failures and remove them only after every send has finished.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{close_code, TransportError};

/// Outbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

impl Frame {
    fn kind(&self) -> &'static str {
        match self {
            Frame::Text(_) => "text",
            Frame::Binary(_) => "binary",
        }
    }
}

/// Sending half of a duplex connection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// `false` once the connection is known to be closed.
    fn is_open(&self) -> bool;

    async fn send(&self, frame: Frame) -> Result<(), TransportError>;

    /// Start the close handshake. Closing twice is a no-op.
    async fn close(&self, code: u16, reason: &str) -> Result<(), TransportError>;
}

pub type ConnectionRef = Arc<dyn Connection>;

fn same_connection(a: &ConnectionRef, b: &ConnectionRef) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Outcome of a single send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// No connection (or a different one) is registered under the id.
    NotRegistered,
    /// The connection was dead; its entry has been removed.
    Dropped,
}

impl Delivery {
    pub fn is_delivered(self) -> bool {
        self == Delivery::Delivered
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    entries: DashMap<String, ConnectionRef>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `conn` under `id`, returning whatever it replaced.
    pub fn add(&self, id: &str, conn: ConnectionRef) -> Option<ConnectionRef> {
        let previous = self.entries.insert(id.to_string(), conn);
        if previous.is_some() {
            debug!(session_id = id, "replaced registered connection");
        }
        previous
    }

    /// Register `conn` for the lifetime of the returned [`Registration`].
    ///
    /// The second value is the connection previously registered under `id`,
    /// if it was a different one.
    pub fn register(
        self: &Arc<Self>,
        id: &str,
        conn: ConnectionRef,
    ) -> (Registration, Option<ConnectionRef>) {
        let previous = self
            .add(id, Arc::clone(&conn))
            .filter(|prev| !same_connection(prev, &conn));
        let registration = Registration {
            registry: Arc::clone(self),
            id: id.to_string(),
            conn,
        };
        (registration, previous)
    }

    pub fn remove(&self, id: &str) -> Option<ConnectionRef> {
        self.entries.remove(id).map(|(_, conn)| conn)
    }

    /// Remove `id` only while it still maps to `conn`.
    pub fn release(&self, id: &str, conn: &ConnectionRef) -> bool {
        self.entries
            .remove_if(id, |_, current| same_connection(current, conn))
            .is_some()
    }

    pub fn get(&self, id: &str) -> Option<ConnectionRef> {
        self.entries.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    pub async fn send_text(&self, id: &str, text: &str) -> Delivery {
        self.dispatch(id, None, Frame::Text(text.to_string())).await
    }

    pub async fn send_bytes(&self, id: &str, bytes: impl Into<Bytes>) -> Delivery {
        self.dispatch(id, None, Frame::Binary(bytes.into())).await
    }

    pub async fn broadcast_text(&self, text: &str) -> BroadcastReport {
        self.broadcast(Frame::Text(text.to_string())).await
    }

    pub async fn broadcast_bytes(&self, bytes: impl Into<Bytes>) -> BroadcastReport {
        self.broadcast(Frame::Binary(bytes.into())).await
    }

    /// Orderly close with code 1000.
    pub async fn close(&self, id: &str) {
        self.close_with(id, close_code::NORMAL, "").await
    }

    /// Close the connection registered under `id`. The entry is removed
    /// whatever the handshake does, including when this future is dropped.
    pub async fn close_with(&self, id: &str, code: u16, reason: &str) {
        let Some(conn) = self.get(id) else {
            return;
        };
        let _release = ReleaseOnDrop {
            registry: self,
            id,
            conn: Arc::clone(&conn),
        };
        if conn.is_open() {
            if let Err(e) = conn.close(code, reason).await {
                warn!(session_id = id, error = %e, "close handshake failed");
            }
        }
    }

    /// Close every registered connection. Used at shutdown.
    pub async fn close_all(&self, code: u16, reason: &str) {
        let ids = self.ids();
        info!(count = ids.len(), "closing all connections");
        join_all(ids.iter().map(|id| self.close_with(id, code, reason))).await;
    }

    async fn dispatch(&self, id: &str, expected: Option<&ConnectionRef>, frame: Frame) -> Delivery {
        let Some(conn) = self.get(id) else {
            return Delivery::NotRegistered;
        };
        if let Some(expected) = expected {
            if !same_connection(&conn, expected) {
                return Delivery::NotRegistered;
            }
        }
        if !conn.is_open() {
            debug!(session_id = id, "connection already closed, removing");
            self.release(id, &conn);
            return Delivery::Dropped;
        }

        let kind = frame.kind();
        match conn.send(frame).await {
            Ok(()) => Delivery::Delivered,
            Err(e) => {
                warn!(
                    session_id = id,
                    frame = kind,
                    error = %e,
                    "send failed, removing connection"
                );
                self.release(id, &conn);
                Delivery::Dropped
            }
        }
    }

    async fn broadcast(&self, frame: Frame) -> BroadcastReport {
        let targets: Vec<(String, ConnectionRef)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let results = join_all(targets.iter().map(|(id, conn)| {
            let frame = frame.clone();
            async move {
                if !conn.is_open() {
                    return false;
                }
                match conn.send(frame).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(session_id = %id, error = %e, "broadcast send failed");
                        false
                    }
                }
            }
        }))
        .await;

        let mut report = BroadcastReport::default();
        for ((id, conn), delivered) in targets.iter().zip(results) {
            if delivered {
                report.delivered += 1;
            } else {
                self.release(id, conn);
                report.dropped += 1;
            }
        }
        debug!(delivered = report.delivered, dropped = report.dropped, "broadcast finished");
        report
    }
}

struct ReleaseOnDrop<'a> {
    registry: &'a ConnectionRegistry,
    id: &'a str,
    conn: ConnectionRef,
}

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        self.registry.release(self.id, &self.conn);
    }
}

/// A session's claim on its registry entry. Sends only reach the connection
/// this registration was created with; dropping it releases the entry unless
/// a newer connection has taken the id.
pub struct Registration {
    registry: Arc<ConnectionRegistry>,
    id: String,
    conn: ConnectionRef,
}

impl Registration {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn connection(&self) -> &ConnectionRef {
        &self.conn
    }

    /// Whether the registry still maps the id to this connection.
    pub fn is_current(&self) -> bool {
        self.registry
            .get(&self.id)
            .is_some_and(|current| same_connection(&current, &self.conn))
    }

    pub async fn send_text(&self, text: &str) -> Delivery {
        self.registry
            .dispatch(&self.id, Some(&self.conn), Frame::Text(text.to_string()))
            .await
    }

    pub async fn send_bytes(&self, bytes: impl Into<Bytes>) -> Delivery {
        self.registry
            .dispatch(&self.id, Some(&self.conn), Frame::Binary(bytes.into()))
            .await
    }

    /// Close this registration's own connection and release the entry.
    pub async fn close(&self, code: u16, reason: &str) {
        if self.conn.is_open() {
            if let Err(e) = self.conn.close(code, reason).await {
                warn!(session_id = %self.id, error = %e, "close handshake failed");
            }
        }
        self.registry.release(&self.id, &self.conn);
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if self.registry.release(&self.id, &self.conn) {
            debug!(session_id = %self.id, "registry entry released");
        }
    }
}
