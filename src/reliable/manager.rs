use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Mutex;

use super::clock::MonotonicClock;
use super::config;
use super::error::ReliableError;
use super::exchange::ExchangeContext;
use super::retrans_table::{RetainedBuffer, RetransTable};
use super::timer::TimerSource;

/// Every live `ExchangeContext`, held weakly so the manager never keeps an
/// exchange alive on its own (spec.md §3 "a reference to the enclosing
/// exchange-context pool for iteration"). Needed for the ack pass of
/// `execute_actions`, which must visit exchanges with a pending ack even
/// when they have no retransmission entry.
struct ContextRegistry {
    entries: Mutex<HashMap<u16, Weak<ExchangeContext>>>,
}

impl ContextRegistry {
    fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }

    async fn register(&self, exchange: &Arc<ExchangeContext>) {
        self.entries.lock().await.insert(exchange.id, Arc::downgrade(exchange));
    }

    async fn unregister(&self, exchange_id: u16) {
        self.entries.lock().await.remove(&exchange_id);
    }

    /// Live exchanges, pruning any whose strong reference has already
    /// been dropped elsewhere.
    async fn live(&self) -> Vec<Arc<ExchangeContext>> {
        let mut entries = self.entries.lock().await;
        let mut live = Vec::with_capacity(entries.len());
        entries.retain(|_, weak| match weak.upgrade() {
            Some(ex) => {
                live.push(ex);
                true
            }
            None => false,
        });
        live
    }
}

/// Orchestrator tying clock, timer, retransmission table and exchange
/// registry together (spec.md §3 "ReliableMessageMgr", §4.3).
///
/// Always held as `Arc<ReliableMessageMgr>`: the timer callback needs to
/// call back into the manager from a spawned task, so construction goes
/// through `Arc::new_cyclic` the same way `ExchangeContext` does.
pub struct ReliableMessageMgr {
    clock: Arc<dyn MonotonicClock>,
    timer: Arc<dyn TimerSource>,
    table: RetransTable,
    contexts: ContextRegistry,
    self_weak: Weak<ReliableMessageMgr>,
}

impl ReliableMessageMgr {
    /// Equivalent to spec.md's `init(system_layer)`: in the original,
    /// construction and initialization are split because the manager
    /// lives in a static pool. Rust has no such constraint, so the two
    /// collapse into a single constructor.
    pub fn new(clock: Arc<dyn MonotonicClock>, timer: Arc<dyn TimerSource>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            clock,
            timer,
            table: RetransTable::new(config::MAX_EXCHANGE_CONTEXTS),
            contexts: ContextRegistry::new(),
            self_weak: weak.clone(),
        })
    }

    /// Register an exchange so its ack-pending state is visited by
    /// `execute_actions` even before (or without) it ever having an
    /// entry in the retransmission table.
    pub async fn register_exchange(&self, exchange: &Arc<ExchangeContext>) {
        self.contexts.register(exchange).await;
    }

    pub async fn unregister_exchange(&self, exchange_id: u16) {
        self.contexts.unregister(exchange_id).await;
    }

    /// spec.md §4.3 `shutdown`: cancel the timer and release every
    /// outstanding entry.
    pub async fn shutdown(&self) {
        self.timer.cancel().await;
        self.table.drain().await;
    }

    /// spec.md §4.3 `add_to_retrans_table`. Fatal if the exchange already
    /// has an untracked in-flight message, mirroring the original's
    /// `VerifyOrDie(!rc->IsMessageNotAcked())`: that invariant is an
    /// caller bug, not a runtime condition to recover from.
    pub async fn add_to_retrans_table(&self, exchange: Arc<ExchangeContext>) -> Result<(), ReliableError> {
        assert!(
            !exchange.is_message_not_acked(),
            "exchange {} already has an untracked in-flight message",
            exchange.id
        );
        self.contexts.register(&exchange).await;
        self.table.create(exchange).await
    }

    /// spec.md §4.3 `start_retransmission`: attach the encoded buffer and
    /// arm the idle retransmit deadline, then rearm the timer.
    pub async fn start_retransmission(&self, exchange_id: u16, retained_buf: RetainedBuffer) {
        let Some(exchange) = self.table.get_exchange(exchange_id).await else {
            return;
        };
        let now = self.clock.now_ms();
        let deadline = now + exchange.mrp_config().idle_retrans_timeout_ms;
        self.table.attach_buffer(exchange_id, retained_buf, deadline).await;
        self.start_timer().await;
    }

    /// Convenience wrapper for the common case of sending a new reliable
    /// message: allocate the slot, attach the buffer, arm the timer.
    pub async fn send_and_track(&self, exchange: Arc<ExchangeContext>, retained_buf: RetainedBuffer) -> Result<(), ReliableError> {
        let exchange_id = exchange.id;
        self.add_to_retrans_table(exchange).await?;
        self.start_retransmission(exchange_id, retained_buf).await;
        Ok(())
    }

    /// spec.md §4.3 `check_and_remove`: on a matching ack, release the
    /// entry and rearm (removal can shorten the next wake horizon).
    pub async fn check_and_remove(&self, exchange_id: u16, ack_counter: u32) -> bool {
        if !self.table.find_matching(exchange_id, ack_counter).await {
            return false;
        }
        self.table.release(exchange_id).await;
        log::debug!("rxd ack, removing message counter:{} on exchange:{} from retrans table", ack_counter, exchange_id);
        self.start_timer().await;
        true
    }

    /// spec.md §4.3 `send_from_retrans_table`: resend the retained buffer
    /// and bump the send count. `IncorrectState` surfaces (and releases
    /// the entry) when the exchange has lost its session handle, matching
    /// the original's `SendFromRetransTable` session-handle check.
    async fn send_from_retrans_table(&self, exchange_id: u16) -> anyhow::Result<()> {
        let Some(exchange) = self.table.get_exchange(exchange_id).await else {
            return Ok(());
        };
        let Some(session) = exchange.session_handle().await else {
            log::error!("no session handle for exchange:{}, dropping retrans entry", exchange_id);
            self.table.release(exchange_id).await;
            return Err(ReliableError::IncorrectState.into());
        };
        let Some(retained) = self.table.get_retained_buf(exchange_id).await else {
            return Ok(());
        };

        match session.send_prepared_message(&retained).await {
            Ok(()) => {
                let send_count = self.table.get_send_count(exchange_id).await.unwrap_or(0);
                if send_count == 0 {
                    session.refresh_session_operational_data();
                }
                self.table.set_send_count(exchange_id, send_count + 1).await;
                Ok(())
            }
            Err(e) => {
                log::error!(
                    "failed to resend counter:{} on exchange:{}: {:?}",
                    retained.get_message_counter(),
                    exchange_id,
                    e
                );
                self.table.release(exchange_id).await;
                Err(e)
            }
        }
    }

    /// spec.md §4.3 `on_timer_expired`: run one action pass, then rearm
    /// for whatever is next.
    async fn on_timer_expired(&self) {
        self.execute_actions().await;
        self.start_timer().await;
    }

    /// spec.md §4.1 `execute_actions`: two passes over the same `now`,
    /// read once at entry. Ack pass first (cheaper, no retry bookkeeping),
    /// then retransmit pass.
    async fn execute_actions(&self) {
        let now = self.clock.now_ms();

        for exchange in self.contexts.live().await {
            if let Some(deadline) = exchange.reliable.next_ack_time().await {
                if deadline <= now {
                    exchange.reliable.send_standalone_ack().await;
                }
            }
        }

        let due: Vec<u16> = self
            .table
            .next_retrans_times()
            .await
            .into_iter()
            .filter(|&(_, next_retrans_time)| next_retrans_time <= now)
            .map(|(exchange_id, _)| exchange_id)
            .collect();

        for exchange_id in due {
            let Some(send_count) = self.table.get_send_count(exchange_id).await else {
                continue;
            };
            if send_count >= config::MAX_RETRANS {
                log::error!("exchange:{} exhausted {} retransmit attempts, giving up", exchange_id, send_count);
                self.table.release(exchange_id).await;
                continue;
            }

            let Some(exchange) = self.table.get_exchange(exchange_id).await else {
                continue;
            };
            // Re-read the clock: the ack pass and earlier iterations of
            // this loop may have taken nontrivial time, and the next
            // deadline should be scheduled from "now", not "now at entry"
            // (mirrors the original's second `System::SystemClock()` read
            // in `ExecuteActions`).
            let retry_now = self.clock.now_ms();
            let deadline = retry_now + exchange.mrp_config().active_retrans_timeout_ms;
            self.table.set_next_retrans_time(exchange_id, deadline).await;

            let _ = self.send_from_retrans_table(exchange_id).await;
        }
    }

    /// spec.md §4.3 `start_timer`: tickless one-shot, armed for the
    /// earliest of every pending ack deadline and every live retrans
    /// deadline. Cancels outright when nothing is pending.
    async fn start_timer(&self) {
        let mut next_wake: Option<u64> = None;

        for exchange in self.contexts.live().await {
            if let Some(deadline) = exchange.reliable.next_ack_time().await {
                next_wake = Some(next_wake.map_or(deadline, |w| w.min(deadline)));
            }
        }
        for (_, deadline) in self.table.next_retrans_times().await {
            next_wake = Some(next_wake.map_or(deadline, |w| w.min(deadline)));
        }

        match next_wake {
            Some(deadline) => {
                let now = self.clock.now_ms();
                let delay_ms = deadline.saturating_sub(now);
                let weak = self.self_weak.clone();
                self.timer
                    .start(
                        Duration::from_millis(delay_ms),
                        Arc::new(move || {
                            if let Some(mgr) = weak.upgrade() {
                                tokio::spawn(async move {
                                    mgr.on_timer_expired().await;
                                });
                            }
                        }),
                    )
                    .await;
            }
            None => self.timer.cancel().await,
        }
    }

    pub async fn count_active(&self) -> usize {
        self.table.count_active().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reliable::clock::test_support::FakeClock;
    use crate::reliable::config::MrpConfig;
    use crate::reliable::session_manager::SessionManager;
    use crate::reliable::timer::test_support::RecordingTimer;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

    /// Records calls instead of touching any real transport, so scenario
    /// tests can assert exactly what the manager tried to send.
    struct FakeSession {
        sent: Mutex<Vec<u32>>,
        acks: Mutex<Vec<u32>>,
        refresh_calls: AtomicU8,
        fail_sends: AtomicU8,
    }

    impl FakeSession {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                acks: Mutex::new(Vec::new()),
                refresh_calls: AtomicU8::new(0),
                fail_sends: AtomicU8::new(0),
            })
        }
    }

    #[async_trait]
    impl SessionManager for FakeSession {
        async fn send_prepared_message(&self, retained: &RetainedBuffer) -> Result<()> {
            if self.fail_sends.load(Ordering::SeqCst) > 0 {
                self.fail_sends.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("simulated transport failure");
            }
            self.sent.lock().await.push(retained.get_message_counter());
            Ok(())
        }

        async fn send_standalone_ack(&self, _exchange_id: u16, ack_counter: u32) -> Result<()> {
            self.acks.lock().await.push(ack_counter);
            Ok(())
        }

        fn refresh_session_operational_data(&self) {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn mgr_with(clock: Arc<FakeClock>) -> Arc<ReliableMessageMgr> {
        ReliableMessageMgr::new(clock, RecordingTimer::new())
    }

    static NEXT_COUNTER: AtomicU32 = AtomicU32::new(1);

    fn next_counter() -> u32 {
        NEXT_COUNTER.fetch_add(1, Ordering::SeqCst)
    }

    // S1: happy path, message acked before it ever retransmits.
    #[tokio::test]
    async fn s1_ack_before_retransmit_deadline() {
        let clock = FakeClock::new(0);
        let mgr = mgr_with(clock.clone());
        let session = FakeSession::new();
        let exchange = ExchangeContext::new(1, MrpConfig::default(), Some(session.clone()));

        let counter = next_counter();
        mgr.send_and_track(exchange.clone(), RetainedBuffer::new(vec![1, 2, 3], counter)).await.unwrap();
        assert_eq!(mgr.count_active().await, 1);

        assert!(mgr.check_and_remove(1, counter).await);
        assert_eq!(mgr.count_active().await, 0);
        assert!(session.sent.lock().await.is_empty());
    }

    // S2: one retransmit, then an ack clears the entry.
    #[tokio::test]
    async fn s2_one_retransmit_then_ack() {
        let clock = FakeClock::new(0);
        let mgr = mgr_with(clock.clone());
        let session = FakeSession::new();
        let mrp = MrpConfig { idle_retrans_timeout_ms: 200, ..MrpConfig::default() };
        let exchange = ExchangeContext::new(2, mrp, Some(session.clone()));

        let counter = next_counter();
        mgr.send_and_track(exchange.clone(), RetainedBuffer::new(vec![9], counter)).await.unwrap();

        clock.advance(250);
        mgr.execute_actions().await;
        assert_eq!(*session.sent.lock().await, vec![counter]);
        assert_eq!(session.refresh_calls.load(Ordering::SeqCst), 1);

        assert!(mgr.check_and_remove(2, counter).await);
        assert_eq!(mgr.count_active().await, 0);
    }

    // S3: terminal failure after MAX_RETRANS attempts, entry is dropped.
    #[tokio::test]
    async fn s3_terminal_failure_after_max_retrans() {
        let clock = FakeClock::new(0);
        let mgr = mgr_with(clock.clone());
        let session = FakeSession::new();
        let mrp = MrpConfig { idle_retrans_timeout_ms: 100, active_retrans_timeout_ms: 100, ..MrpConfig::default() };
        let exchange = ExchangeContext::new(3, mrp, Some(session.clone()));

        let counter = next_counter();
        mgr.send_and_track(exchange.clone(), RetainedBuffer::new(vec![1], counter)).await.unwrap();

        for _ in 0..config::MAX_RETRANS {
            clock.advance(150);
            mgr.execute_actions().await;
        }
        assert_eq!(mgr.count_active().await, 1);
        assert_eq!(session.sent.lock().await.len(), config::MAX_RETRANS as usize);

        // One more pass hits the exhausted-attempts check and gives up.
        clock.advance(150);
        mgr.execute_actions().await;
        assert_eq!(mgr.count_active().await, 0);
        assert!(!exchange.is_message_not_acked());
    }

    // S4: piggybacked ack arrives via set_ack_pending/take_pending_ack,
    // never reaching execute_actions' standalone-ack path at all.
    #[tokio::test]
    async fn s4_piggyback_ack_short_circuits_standalone_ack() {
        let clock = FakeClock::new(0);
        let mgr = mgr_with(clock.clone());
        let session = FakeSession::new();
        let exchange = ExchangeContext::new(4, MrpConfig::default(), Some(session.clone()));
        mgr.register_exchange(&exchange).await;

        exchange.reliable.set_ack_pending(77, clock.now_ms()).await;
        let piggybacked = exchange.reliable.take_pending_ack().await;
        assert_eq!(piggybacked, Some(77));

        clock.advance(10_000);
        mgr.execute_actions().await;
        assert!(session.acks.lock().await.is_empty());
    }

    // S5: no piggyback arrives in time, the active ack timeout fires a
    // standalone ack.
    #[tokio::test]
    async fn s5_standalone_ack_on_timeout() {
        let clock = FakeClock::new(0);
        let mgr = mgr_with(clock.clone());
        let session = FakeSession::new();
        let mrp = MrpConfig { active_ack_timeout_ms: 300, ..MrpConfig::default() };
        let exchange = ExchangeContext::new(5, mrp, Some(session.clone()));
        mgr.register_exchange(&exchange).await;

        exchange.reliable.set_ack_pending(55, clock.now_ms()).await;
        clock.advance(350);
        mgr.execute_actions().await;

        assert_eq!(*session.acks.lock().await, vec![55]);
        assert!(!exchange.reliable.is_ack_pending().await);
    }

    // S6: session handle is gone by the time a retransmit is due.
    #[tokio::test]
    async fn s6_session_loss_surfaces_incorrect_state_and_drops_entry() {
        let clock = FakeClock::new(0);
        let mgr = mgr_with(clock.clone());
        let mrp = MrpConfig { idle_retrans_timeout_ms: 100, ..MrpConfig::default() };
        let exchange = ExchangeContext::new(6, mrp, None);

        let counter = next_counter();
        mgr.send_and_track(exchange.clone(), RetainedBuffer::new(vec![1], counter)).await.unwrap();

        clock.advance(150);
        mgr.execute_actions().await;
        assert_eq!(mgr.count_active().await, 0);
        assert!(!exchange.is_message_not_acked());
    }

    #[tokio::test]
    async fn table_full_is_surfaced_to_caller() {
        let clock = FakeClock::new(0);
        let mgr = ReliableMessageMgr::new(clock, RecordingTimer::new());
        for i in 0..config::MAX_EXCHANGE_CONTEXTS {
            let ex = ExchangeContext::new(i as u16, MrpConfig::default(), None);
            mgr.add_to_retrans_table(ex).await.unwrap();
        }
        let overflow = ExchangeContext::new(config::MAX_EXCHANGE_CONTEXTS as u16, MrpConfig::default(), None);
        assert_eq!(mgr.add_to_retrans_table(overflow).await, Err(ReliableError::TableFull));
    }

    #[tokio::test]
    async fn shutdown_drains_table_and_cancels_timer() {
        let clock = FakeClock::new(0);
        let mgr = mgr_with(clock.clone());
        let session = FakeSession::new();
        let exchange = ExchangeContext::new(9, MrpConfig::default(), Some(session));
        mgr.send_and_track(exchange.clone(), RetainedBuffer::new(vec![1], 1)).await.unwrap();

        mgr.shutdown().await;
        assert_eq!(mgr.count_active().await, 0);
        assert!(!exchange.is_message_not_acked());
    }
}
