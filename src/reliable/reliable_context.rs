use std::sync::Weak;

use tokio::sync::Mutex;

use super::config::MrpConfig;
use super::exchange::ExchangeContext;

#[derive(Debug, Clone, Copy, Default)]
struct AckState {
    ack_pending: bool,
    next_ack_time: u64,
    pending_peer_counter: u32,
}

/// Per-exchange acknowledgement state (spec.md §3 "ReliableContext",
/// §4.2). Born with its exchange, dies with it; only the ack-pending
/// bookkeeping itself is transient.
pub struct ReliableContext {
    exchange: Weak<ExchangeContext>,
    mrp_config: MrpConfig,
    state: Mutex<AckState>,
}

impl ReliableContext {
    pub(crate) fn new(exchange: Weak<ExchangeContext>, mrp_config: MrpConfig) -> Self {
        Self { exchange, mrp_config, state: Mutex::new(AckState::default()) }
    }

    pub async fn is_ack_pending(&self) -> bool {
        self.state.lock().await.ack_pending
    }

    /// `next_ack_time` if an ack is currently pending, else `None`.
    pub async fn next_ack_time(&self) -> Option<u64> {
        let s = self.state.lock().await;
        s.ack_pending.then_some(s.next_ack_time)
    }

    /// Record that `peer_counter` needs acknowledging.
    ///
    /// State machine (spec.md §4.2):
    /// ```text
    /// IDLE --recv(c)--> ACK_PENDING(c, now+ack_timeout)
    /// ACK_PENDING(c,_) --recv(c') with c' > c--> ACK_PENDING(c',_)      [replace]
    /// ACK_PENDING(c,_) --recv(c') with c' <= c--> flush(c), ACK_PENDING(c',_)
    /// ```
    /// A newer counter simply supersedes the pending one (acking a later
    /// counter already acks everything before it); anything else means
    /// the earlier pending ack must go out now before we start tracking
    /// the new one.
    pub async fn set_ack_pending(&self, peer_counter: u32, now: u64) {
        let mut to_flush = None;
        {
            let mut s = self.state.lock().await;
            if s.ack_pending && peer_counter <= s.pending_peer_counter {
                to_flush = Some(s.pending_peer_counter);
            }
            s.ack_pending = true;
            s.pending_peer_counter = peer_counter;
            s.next_ack_time = now + self.mrp_config.active_ack_timeout_ms;
        }
        if let Some(counter) = to_flush {
            self.send_standalone_ack_for(counter).await;
        }
    }

    /// Atomically clear ack-pending and return the counter to piggyback,
    /// if one was pending.
    pub async fn take_pending_ack(&self) -> Option<u32> {
        let mut s = self.state.lock().await;
        if s.ack_pending {
            s.ack_pending = false;
            Some(s.pending_peer_counter)
        } else {
            None
        }
    }

    /// Send a standalone ack for the currently pending counter, clearing
    /// ack-pending on success. On failure the state is left unchanged so
    /// the next wake retries.
    pub async fn send_standalone_ack(&self) {
        let counter = {
            let s = self.state.lock().await;
            if !s.ack_pending {
                return;
            }
            s.pending_peer_counter
        };
        self.send_standalone_ack_for(counter).await;
    }

    async fn send_standalone_ack_for(&self, counter: u32) {
        let Some(exchange) = self.exchange.upgrade() else {
            return;
        };
        match exchange.send_standalone_ack_message(counter).await {
            Ok(()) => {
                let mut s = self.state.lock().await;
                if s.pending_peer_counter == counter {
                    s.ack_pending = false;
                }
            }
            Err(e) => {
                log::warn!(
                    "failed to send standalone ack for exchange:{} counter:{}: {:?}",
                    exchange.id,
                    counter,
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reliable::config::MrpConfig;
    use std::sync::Arc;

    fn ctx() -> Arc<ExchangeContext> {
        ExchangeContext::new(7, MrpConfig::default(), None)
    }

    #[tokio::test]
    async fn idle_to_ack_pending() {
        let ex = ctx();
        assert!(!ex.reliable.is_ack_pending().await);
        ex.reliable.set_ack_pending(10, 1000).await;
        assert!(ex.reliable.is_ack_pending().await);
        assert_eq!(ex.reliable.next_ack_time().await, Some(1000 + ex.mrp_config().active_ack_timeout_ms));
    }

    #[tokio::test]
    async fn take_pending_ack_clears_state() {
        let ex = ctx();
        ex.reliable.set_ack_pending(10, 1000).await;
        let c = ex.reliable.take_pending_ack().await;
        assert_eq!(c, Some(10));
        assert!(!ex.reliable.is_ack_pending().await);
        assert_eq!(ex.reliable.take_pending_ack().await, None);
    }

    #[tokio::test]
    async fn newer_counter_replaces_without_flush() {
        // No session handle is attached, so a flush would fail to send and
        // log a warning but *not* clear ack-pending; we assert the
        // happy-path "replace" branch never attempts to flush by checking
        // the final pending counter is simply the newest one.
        let ex = ctx();
        ex.reliable.set_ack_pending(10, 1000).await;
        ex.reliable.set_ack_pending(11, 1050).await;
        assert_eq!(ex.reliable.take_pending_ack().await, Some(11));
    }
}
