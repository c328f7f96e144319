use anyhow::{Context, Result};
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::{
    messages::{self, Message, ProtocolMessageHeader},
    reliable::{
        clock::{MonotonicClock, SystemMonotonicClock},
        timer::TokioTimer,
        ExchangeContext, MrpConfig, ReliableMessageMgr, RetainedBuffer, SessionManager,
        TransportSessionManager,
    },
    session::Session,
    transport,
};

const RECEIVE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(1);
const MAX_CACHED_COUNTERS: usize = 32;

/// Bounded set for tracking received message counters to detect duplicates.
///
/// Ordering and gap-fill across a run of messages are explicitly out of
/// scope for the reliable-message manager (it only ever sees one
/// outstanding message per exchange); this dedup cache is a separate,
/// simpler concern that lives alongside it rather than inside it.
struct ReceivedCounters {
    set: HashSet<u32>,
    order: VecDeque<u32>,
    max_size: usize,
}

impl ReceivedCounters {
    fn new(max_size: usize) -> Self {
        Self { set: HashSet::new(), order: VecDeque::new(), max_size }
    }

    /// Returns true if counter was new (not a duplicate).
    fn insert(&mut self, counter: u32) -> bool {
        if !self.set.insert(counter) {
            return false;
        }
        self.order.push_back(counter);
        while self.order.len() > self.max_size {
            if let Some(old) = self.order.pop_front() {
                self.set.remove(&old);
            }
        }
        true
    }
}

type PendingExchanges = Arc<std::sync::Mutex<HashMap<u16, oneshot::Sender<Message>>>>;
type ExchangeMap = Arc<Mutex<HashMap<u16, Arc<ExchangeContext>>>>;

/// Active connection with background read task for continuous message
/// handling, backed by the `reliable` module for retransmission and
/// acknowledgement instead of the ad hoc polling loop this crate used to
/// carry around.
pub struct ActiveConnection {
    transport_conn: Arc<transport::Connection>,
    session: Arc<Mutex<Session>>,
    session_manager: Arc<dyn SessionManager>,
    mgr: Arc<ReliableMessageMgr>,
    clock: Arc<dyn MonotonicClock>,

    /// Routing responses to waiting callers by exchange ID.
    pending_exchanges: PendingExchanges,

    /// One `ExchangeContext` per exchange id currently in flight, shared
    /// between outbound sends and inbound ack-pending bookkeeping.
    exchanges: ExchangeMap,

    /// Events channel (unsolicited messages).
    event_rx: Mutex<mpsc::Receiver<Message>>,

    cancel: CancellationToken,
}

impl ActiveConnection {
    /// Create from transport connection and authenticated session.
    /// Spawns a background task that continuously reads from the connection.
    pub fn new(conn: Arc<transport::Connection>, session: Session) -> Self {
        let (event_tx, event_rx) = mpsc::channel(32);
        let cancel = CancellationToken::new();

        let session = Arc::new(Mutex::new(session));
        let session_manager: Arc<dyn SessionManager> = TransportSessionManager::new(conn.clone(), session.clone());
        let clock: Arc<dyn MonotonicClock> = Arc::new(SystemMonotonicClock::new());
        let timer: Arc<TokioTimer> = TokioTimer::new();
        let mgr = ReliableMessageMgr::new(clock.clone(), timer);

        let pending_exchanges: PendingExchanges = Arc::new(std::sync::Mutex::new(HashMap::new()));
        let exchanges: ExchangeMap = Arc::new(Mutex::new(HashMap::new()));
        let received_counters = Arc::new(std::sync::Mutex::new(ReceivedCounters::new(MAX_CACHED_COUNTERS)));

        let read_loop_conn = conn.clone();
        let read_loop_session = session.clone();
        let read_loop_session_manager = session_manager.clone();
        let read_loop_mgr = mgr.clone();
        let read_loop_clock = clock.clone();
        let read_loop_exchanges = exchanges.clone();
        let read_loop_pending = pending_exchanges.clone();
        let read_loop_received = received_counters.clone();
        let read_loop_event_tx = event_tx.clone();
        let read_loop_cancel = cancel.clone();

        tokio::spawn(async move {
            connection_read_loop(
                read_loop_conn,
                read_loop_session,
                read_loop_session_manager,
                read_loop_mgr,
                read_loop_clock,
                read_loop_exchanges,
                read_loop_pending,
                read_loop_received,
                read_loop_event_tx,
                read_loop_cancel,
            )
            .await;
        });

        Self {
            transport_conn: conn,
            session,
            session_manager,
            mgr,
            clock,
            pending_exchanges,
            exchanges,
            event_rx: Mutex::new(event_rx),
            cancel,
        }
    }

    /// Send request and wait for response on specific exchange. The
    /// message is tracked for retransmission until it is acked or gives
    /// up after `MAX_RETRANS` attempts (spec.md §4.3, §7).
    pub async fn request(&self, exchange_id: u16, data: &[u8]) -> Result<Message> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending_exchanges.lock().unwrap();
            pending.insert(exchange_id, tx);
        }

        if let Err(e) = self.send_and_track(exchange_id, data).await {
            log::debug!("error sending request on exchange {}: {:?}", exchange_id, e);
            self.pending_exchanges.lock().unwrap().remove(&exchange_id);
            return Err(e);
        }

        rx.await.context("request timed out - no response received")
    }

    /// Encode, send the first copy, and register with the reliable
    /// message manager for retransmission. Registration only happens
    /// after the first send succeeds, so a failed send never leaves a
    /// dangling retrans-table entry.
    ///
    /// If this exchange has an ack pending from an earlier inbound
    /// message, it is piggybacked onto this send (spec.md §4.2
    /// `take_pending_ack`) instead of waiting for the standalone-ack
    /// timeout to fire independently.
    async fn send_and_track(&self, exchange_id: u16, data: &[u8]) -> Result<()> {
        let exchange = get_or_create_exchange(&self.exchanges, &self.session_manager, &self.mgr, exchange_id).await;

        let outgoing = match exchange.reliable.take_pending_ack().await {
            Some(ack_counter) => messages::piggyback_ack(data, ack_counter)?,
            None => data.to_vec(),
        };

        let encoded = self.session.lock().await.encode_message(&outgoing)?;
        self.transport_conn.send(&encoded).await?;

        let (header, _) = messages::MessageHeader::decode(&encoded)?;
        let retained = RetainedBuffer::new(encoded, header.message_counter);
        self.mgr
            .send_and_track(exchange, retained)
            .await
            .map_err(|e| anyhow::anyhow!("retransmission table: {}", e))
    }

    /// Receive next event. Returns None when connection is closed.
    pub async fn recv_event(&self) -> Option<Message> {
        let mut rx = self.event_rx.lock().await;
        rx.recv().await
    }

    /// Try receive event without blocking.
    pub fn try_recv_event(&self) -> Option<Message> {
        match self.event_rx.try_lock() {
            Ok(mut rx) => rx.try_recv().ok(),
            Err(_) => None,
        }
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
        let mgr = self.mgr.clone();
        tokio::spawn(async move { mgr.shutdown().await });
    }
}

async fn get_or_create_exchange(
    exchanges: &ExchangeMap,
    session_manager: &Arc<dyn SessionManager>,
    mgr: &Arc<ReliableMessageMgr>,
    exchange_id: u16,
) -> Arc<ExchangeContext> {
    let mut exchanges = exchanges.lock().await;
    if let Some(existing) = exchanges.get(&exchange_id) {
        return existing.clone();
    }
    let exchange = ExchangeContext::new(exchange_id, MrpConfig::default(), Some(session_manager.clone()));
    // Register immediately, not just on first outbound send: a purely
    // inbound exchange (one this side never sends on) still needs its
    // ack-pending state visited by `execute_actions`/`start_timer`, or a
    // standalone ack would never be armed.
    mgr.register_exchange(&exchange).await;
    exchanges.insert(exchange_id, exchange.clone());
    exchange
}

#[allow(clippy::too_many_arguments)]
async fn connection_read_loop(
    transport_conn: Arc<transport::Connection>,
    session: Arc<Mutex<Session>>,
    session_manager: Arc<dyn SessionManager>,
    mgr: Arc<ReliableMessageMgr>,
    clock: Arc<dyn MonotonicClock>,
    exchanges: ExchangeMap,
    pending_exchanges: PendingExchanges,
    received_counters: Arc<std::sync::Mutex<ReceivedCounters>>,
    event_tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            result = transport_conn.receive(RECEIVE_TIMEOUT) => {
                match result {
                    Ok(data) => {
                        log::trace!("received {} bytes", data.len());
                        if let Err(e) = process_incoming(
                            &data,
                            &session,
                            &session_manager,
                            &mgr,
                            &clock,
                            &exchanges,
                            &pending_exchanges,
                            &received_counters,
                            &event_tx,
                        ).await {
                            log::debug!("error processing incoming message: {:?}", e);
                        }
                    }
                    Err(_) => {
                        log::trace!("receive timeout, no data this cycle");
                    }
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_incoming(
    data: &[u8],
    session: &Arc<Mutex<Session>>,
    session_manager: &Arc<dyn SessionManager>,
    mgr: &Arc<ReliableMessageMgr>,
    clock: &Arc<dyn MonotonicClock>,
    exchanges: &ExchangeMap,
    pending_exchanges: &PendingExchanges,
    received_counters: &Arc<std::sync::Mutex<ReceivedCounters>>,
    event_tx: &mpsc::Sender<Message>,
) -> Result<()> {
    // 1. Decode via session (decrypt if keys set)
    log::trace!("received raw data: {:x?}", data);
    let decoded_data = match session.lock().await.decode_message(data) {
        Ok(d) => d,
        Err(e) => {
            log::debug!("failed to decode incoming message: {}", e);
            return Ok(());
        }
    };

    // 2. Parse Message
    let message = Message::decode(&decoded_data)?;
    log::trace!("received message {:?}", message);
    let exchange_id = message.protocol_header.exchange_id;
    let peer_counter = message.message_header.message_counter;

    // 3. Handle ACK flag: release the matching retrans entry, if any.
    if message.protocol_header.exchange_flags & ProtocolMessageHeader::FLAG_ACK != 0 {
        let removed = mgr.check_and_remove(exchange_id, message.protocol_header.ack_counter).await;
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

    // 4. Duplicate check
    let is_new = received_counters.lock().unwrap().insert(peer_counter);

    if !is_new {
        // A lost ack is the most likely reason we're seeing this counter
        // again; ack it directly rather than going through the
        // pending-ack/timeout machinery meant for first-time arrivals.
        if reliable {
            let exchange = get_or_create_exchange(exchanges, session_manager, mgr, exchange_id).await;
            if let Err(e) = exchange.send_standalone_ack_message(peer_counter).await {
                log::debug!("failed to re-ack duplicate counter:{} on exchange:{}: {:?}", peer_counter, exchange_id, e);
            }
        }
        log::trace!("dropping duplicate message exchange:{} counter:{}", exchange_id, peer_counter);
        return Ok(());
    }

    if is_standalone_ack {
        log::trace!("standalone ack exchange:{} ack_counter:{}", exchange_id, message.protocol_header.ack_counter);
        return Ok(());
    }

    // 5. Track the ack obligation for new, reliable messages. It goes out
    // piggybacked on the next reliable message this connection sends on
    // the same exchange (see `send_and_track`'s `take_pending_ack` call),
    // or as a standalone ack when the active-ack timeout fires first.
    if reliable {
        let exchange = get_or_create_exchange(exchanges, session_manager, mgr, exchange_id).await;
        exchange.reliable.set_ack_pending(peer_counter, clock.now_ms()).await;
    }

    // 6. Route by exchange ID
    let sender = pending_exchanges.lock().unwrap().remove(&exchange_id);
    match sender {
        Some(tx) => {
            let _ = tx.send(message);
        }
        None => {
            let _ = event_tx.send(message).await;
        }
    }

    Ok(())
}
