use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{messages, session, transport};

use super::retrans_table::RetainedBuffer;

/// External collaborator that encrypts/dispatches prepared payloads
/// (spec.md §6 "SessionManager (consumed)").
///
/// `spec.md` treats this purely as an interface the manager calls into;
/// this crate has no standalone session-manager object (session crypto
/// and UDP transport are separate existing modules), so
/// `TransportSessionManager` below is the concrete adapter that gives the
/// manager something to call.
#[async_trait]
pub trait SessionManager: Send + Sync {
    /// Hand an already-encrypted retained buffer to the transport. The
    /// manager never re-encodes; it only stores and resends these bytes.
    async fn send_prepared_message(&self, retained: &RetainedBuffer) -> Result<()>;

    /// Encode and send a fresh ack-only message for `ack_counter` on
    /// `exchange_id`. Unlike `send_prepared_message` this does touch the
    /// session, since a standalone ack has never been encoded before.
    async fn send_standalone_ack(&self, exchange_id: u16, ack_counter: u32) -> Result<()>;

    /// Hint that the peer's operational address data may be stale and
    /// should be refreshed before the next retry. A no-op is always a
    /// valid implementation (spec.md §9's "missing exchange manager"
    /// open question).
    fn refresh_session_operational_data(&self);
}

/// Adapter over the crate's existing session crypto and UDP transport.
/// One instance per logical connection, shared by every exchange that
/// talks over it.
///
/// Holds the same `Arc<Mutex<Session>>` as the connection's own read loop,
/// since encoding a standalone ack advances the session's message counter
/// and must stay in lockstep with every other encode on the connection.
pub struct TransportSessionManager {
    connection: Arc<transport::Connection>,
    session: Arc<Mutex<session::Session>>,
}

impl TransportSessionManager {
    pub fn new(connection: Arc<transport::Connection>, session: Arc<Mutex<session::Session>>) -> Arc<Self> {
        Arc::new(Self { connection, session })
    }
}

#[async_trait]
impl SessionManager for TransportSessionManager {
    async fn send_prepared_message(&self, retained: &RetainedBuffer) -> Result<()> {
        let data = retained.data().ok_or_else(|| anyhow::anyhow!("retained buffer is null"))?;
        self.connection.send(data).await
    }

    async fn send_standalone_ack(&self, exchange_id: u16, ack_counter: u32) -> Result<()> {
        let ack = messages::ack(exchange_id, ack_counter as i64)?;
        let encoded = self.session.lock().await.encode_message(&ack)?;
        self.connection.send(&encoded).await
    }

    fn refresh_session_operational_data(&self) {
        log::debug!("refresh_session_operational_data: no address-refresh source wired up, ignoring");
    }
}
