/// Tuning constants and per-exchange MRP parameters (spec.md §6 "Tuning constants").

/// Attempts before terminal failure.
pub const MAX_RETRANS: u8 = 3;

/// Retransmission-table capacity. Matches `CHIP_CONFIG_MAX_EXCHANGE_CONTEXTS`
/// in the original implementation; kept modest here since this controller
/// talks to a handful of devices at a time rather than running on a hub.
pub const MAX_EXCHANGE_CONTEXTS: usize = 64;

/// MRP parameters negotiated at session establishment, snapshotted into
/// each `ReliableContext` (spec.md §3 "ReliableContext").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MrpConfig {
    /// First-attempt retransmit delay, milliseconds.
    pub idle_retrans_timeout_ms: u64,
    /// Subsequent-attempt retransmit delay, milliseconds.
    pub active_retrans_timeout_ms: u64,
    /// Standalone-ack deadline while the session is idle, milliseconds.
    pub idle_ack_timeout_ms: u64,
    /// Standalone-ack deadline while the session is active, milliseconds.
    pub active_ack_timeout_ms: u64,
}

impl Default for MrpConfig {
    /// Matches the Matter specification's default session-idle parameters.
    fn default() -> Self {
        Self {
            idle_retrans_timeout_ms: 5_000,
            active_retrans_timeout_ms: 300,
            idle_ack_timeout_ms: 5_000,
            active_ack_timeout_ms: 300,
        }
    }
}
