use std::fmt;

/// Error kinds the reliable message manager surfaces to callers (spec.md §7).
///
/// Transport-level send failures are not modeled here: they come back as
/// whatever `anyhow::Error` the session manager produced and are never
/// retried by the manager (see `ReliableMessageMgr::send_from_retrans_table`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReliableError {
    /// `RetransTable::create` found no free slot.
    TableFull,
    /// The exchange has no session handle to send through.
    IncorrectState,
}

impl fmt::Display for ReliableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReliableError::TableFull => write!(f, "retransmission table full"),
            ReliableError::IncorrectState => write!(f, "exchange has no session handle"),
        }
    }
}

impl std::error::Error for ReliableError {}
