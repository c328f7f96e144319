use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Mutex;

use crate::{
    messages::{self, Message, MessageHeader, ProtocolMessageHeader},
    reliable::{
        clock::{MonotonicClock, SystemMonotonicClock},
        timer::TokioTimer,
        ExchangeContext, MrpConfig, ReliableMessageMgr, RetainedBuffer, SessionManager,
        TransportSessionManager,
    },
    session, transport,
};

const RECEIVE_TIMEOUT: Duration = Duration::from_secs(3);

/// Sequential-wait front end for the commissioning handshakes
/// (SPAKE2+ in `controller::auth_spake`, SIGMA in `controller::auth_sigma`,
/// the NOC exchange in `commission::commission`): each of these talks over
/// one or two exchange ids in strict request/response lock-step, so it
/// needs none of `ActiveConnection`'s routing-by-exchange-id or event
/// channel. It still tracks retransmission and acknowledgement through
/// the same `ReliableMessageMgr` rather than a second, independently
/// maintained implementation.
pub struct RetrContext {
    connection: Arc<transport::Connection>,
    session: Arc<Mutex<session::Session>>,
    session_manager: Arc<dyn SessionManager>,
    mgr: Arc<ReliableMessageMgr>,
    clock: Arc<dyn MonotonicClock>,
    exchanges: HashMap<u16, Arc<ExchangeContext>>,
    /// Exchange ids this caller cares about; empty means "any".
    subscribed_exchanges: HashSet<u16>,
    /// Peer message counters already seen, to re-ack (rather than
    /// re-deliver) duplicates caused by a lost ack.
    received: HashSet<u32>,
}

impl RetrContext {
    pub fn new(connection: Arc<transport::Connection>, session: Arc<Mutex<session::Session>>) -> Self {
        let session_manager: Arc<dyn SessionManager> =
            TransportSessionManager::new(connection.clone(), session.clone());
        let clock: Arc<dyn MonotonicClock> = Arc::new(SystemMonotonicClock::new());
        let timer = TokioTimer::new();
        let mgr = ReliableMessageMgr::new(clock.clone(), timer);
        Self {
            connection,
            session,
            session_manager,
            mgr,
            clock,
            exchanges: HashMap::new(),
            subscribed_exchanges: HashSet::new(),
            received: HashSet::new(),
        }
    }

    pub fn subscribe_exchange(&mut self, exchange_id: u16) {
        self.subscribed_exchanges.insert(exchange_id);
    }

    fn get_or_create_exchange(&mut self, exchange_id: u16) -> Arc<ExchangeContext> {
        self.exchanges
            .entry(exchange_id)
            .or_insert_with(|| {
                ExchangeContext::new(exchange_id, MrpConfig::default(), Some(self.session_manager.clone()))
            })
            .clone()
    }

    /// Encode, send, and register `data` (an unencrypted protocol message
    /// with its exchange header already filled in) with the reliable
    /// message manager for retransmission. Piggybacks a pending ack onto
    /// `data` first if one is waiting on this exchange (spec.md §4.2
    /// `take_pending_ack`).
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        let (protocol_header, _) = ProtocolMessageHeader::decode(data)?;
        let exchange = self.get_or_create_exchange(protocol_header.exchange_id);

        let outgoing = match exchange.reliable.take_pending_ack().await {
            Some(ack_counter) => messages::piggyback_ack(data, ack_counter)?,
            None => data.to_vec(),
        };

        let encoded = self.session.lock().await.encode_message(&outgoing)?;
        self.connection.send(&encoded).await?;

        let (header, _) = MessageHeader::decode(&encoded)?;
        log::trace!("send msg counter:{}", header.message_counter);
        let retained = RetainedBuffer::new(encoded, header.message_counter);
        self.mgr
            .send_and_track(exchange, retained)
            .await
            .map_err(|e| anyhow::anyhow!("retransmission table: {}", e))
    }

    /// Block until the next message relevant to this context arrives.
    /// Duplicates (a lost ack made the peer resend) are re-acked and
    /// dropped; standalone acks are consumed silently; anything outside
    /// `subscribed_exchanges` (when non-empty) is skipped.
    ///
    /// Unlike the polling loop this replaces, a receive timeout is not a
    /// retransmit trigger: the manager's own background timer task
    /// retransmits on its own schedule while this loop is simply waiting
    /// for the next datagram.
    pub async fn get_next_message(&mut self) -> Result<Message> {
        loop {
            let resp = match self.connection.receive(RECEIVE_TIMEOUT).await {
                Ok(v) => v,
                Err(_) => continue,
            };
            let decoded_data = match self.session.lock().await.decode_message(&resp) {
                Ok(d) => d,
                Err(e) => {
                    log::debug!("can't decode incoming message {:?}", e);
                    continue;
                }
            };
            let message = Message::decode(&decoded_data)?;
            log::trace!("received message {:?}", message);
            let exchange_id = message.protocol_header.exchange_id;
            let peer_counter = message.message_header.message_counter;

            if message.protocol_header.exchange_flags & ProtocolMessageHeader::FLAG_ACK != 0 {
                let removed = self.mgr.check_and_remove(exchange_id, message.protocol_header.ack_counter).await;
                log::trace!(
                    "rxd ack counter:{} on exchange:{}, removed:{}",
                    message.protocol_header.ack_counter,
                    exchange_id,
                    removed
                );
            }

            let reliable = message.protocol_header.exchange_flags & ProtocolMessageHeader::FLAG_RELIABILITY != 0;
            let is_standalone_ack = message.protocol_header.protocol_id == ProtocolMessageHeader::PROTOCOL_ID_SECURE_CHANNEL
                && message.protocol_header.opcode == ProtocolMessageHeader::OPCODE_ACK;

            if !self.received.insert(peer_counter) {
                if reliable {
                    let exchange = self.get_or_create_exchange(exchange_id);
                    if let Err(e) = exchange.send_standalone_ack_message(peer_counter).await {
                        log::debug!(
                            "failed to re-ack duplicate counter:{} on exchange:{}: {:?}",
                            peer_counter,
                            exchange_id,
                            e
                        );
                    }
                }
                log::trace!("dropping duplicate message exchange:{} counter:{}", exchange_id, peer_counter);
                continue;
            }

            if is_standalone_ack {
                log::trace!("standalone ack exchange:{} ack_counter:{}", exchange_id, message.protocol_header.ack_counter);
                continue;
            }

            // This handshake is strict lock-step request/response, so
            // there is no "outbound message on the same exchange" to
            // piggyback on before the caller sees the response; flush
            // the ack immediately rather than waiting for the active ack
            // timeout to elapse.
            if reliable {
                let exchange = self.get_or_create_exchange(exchange_id);
                exchange.reliable.set_ack_pending(peer_counter, self.clock.now_ms()).await;
                exchange.reliable.send_standalone_ack().await;
            }

            if !self.subscribed_exchanges.is_empty() && !self.subscribed_exchanges.contains(&exchange_id) {
                continue;
            }

            return Ok(message);
        }
    }

    /// Cancel the manager's timer and drain any outstanding retransmit
    /// entries. Call this (and drop `self`) before unwrapping the
    /// underlying `Arc<Mutex<Session>>` back into an owned `Session`:
    /// until this runs, the manager's `Arc<ExchangeContext>` clones keep
    /// the session handle alive.
    pub async fn shutdown(self) {
        self.mgr.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_message_round_trips_exchange_and_counter() {
        let encoded = messages::ack(7, 42).unwrap();
        let (header, _) = ProtocolMessageHeader::decode(&encoded).unwrap();
        assert_eq!(header.exchange_id, 7);
        assert_eq!(header.ack_counter, 42);
        assert!(header.exchange_flags & ProtocolMessageHeader::FLAG_ACK != 0);
    }

    #[test]
    fn piggyback_ack_sets_flag_and_counter_without_losing_payload() {
        let original = messages::pbkdf_req(3).unwrap();
        let (orig_header, orig_payload) = ProtocolMessageHeader::decode(&original).unwrap();
        assert!(orig_header.exchange_flags & ProtocolMessageHeader::FLAG_ACK == 0);

        let patched = messages::piggyback_ack(&original, 99).unwrap();
        let (header, payload) = ProtocolMessageHeader::decode(&patched).unwrap();
        assert_eq!(header.exchange_id, 3);
        assert_eq!(header.ack_counter, 99);
        assert!(header.exchange_flags & ProtocolMessageHeader::FLAG_ACK != 0);
        assert_eq!(payload, orig_payload);
    }

}
