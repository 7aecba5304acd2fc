//! Trade (offer) records

use crate::bytes::Bytes32;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TradeStatus {
    PendingAccept = 0,
    PendingConfirm = 1,
    PendingCancel = 2,
    Cancelled = 3,
    Confirmed = 4,
    Failed = 5,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::PendingAccept => "pending_accept",
            TradeStatus::PendingConfirm => "pending_confirm",
            TradeStatus::PendingCancel => "pending_cancel",
            TradeStatus::Cancelled => "cancelled",
            TradeStatus::Confirmed => "confirmed",
            TradeStatus::Failed => "failed",
        }
    }

    pub fn all() -> &'static [TradeStatus] {
        &[
            TradeStatus::PendingAccept,
            TradeStatus::PendingConfirm,
            TradeStatus::PendingCancel,
            TradeStatus::Cancelled,
            TradeStatus::Confirmed,
            TradeStatus::Failed,
        ]
    }

    pub fn code(&self) -> i64 {
        *self as u8 as i64
    }

    /// Statuses of trades still waiting on the chain
    pub fn unconfirmed() -> &'static [TradeStatus] {
        &[TradeStatus::PendingAccept, TradeStatus::PendingConfirm, TradeStatus::PendingCancel]
    }
}

impl TryFrom<i64> for TradeStatus {
    type Error = Error;

    fn try_from(code: i64) -> Result<Self> {
        TradeStatus::all()
            .iter()
            .copied()
            .find(|s| s.code() == code)
            .ok_or_else(|| Error::ConsistencyViolation(format!("unknown trade status code {}", code)))
    }
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Delivery attempt of a trade to a peer: peer id, outcome code, error text
pub type SentTo = (String, u8, Option<String>);

/// A trade, stored as a JSON blob next to the columns it is queried by
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub trade_id: Bytes32,
    pub status: TradeStatus,
    /// Block height at which the trade confirmed, 0 until then
    pub confirmed_at_index: u32,
    pub created_at_time: u64,
    pub accepted_at_time: Option<u64>,
    /// Number of peers the trade was pushed to
    pub sent: u32,
    pub sent_to: Vec<SentTo>,
    pub is_my_offer: bool,
    /// Serialized offer, opaque to the store
    pub offer: Vec<u8>,
}

impl TradeRecord {
    pub fn new(trade_id: Bytes32, created_at_time: u64, is_my_offer: bool, offer: Vec<u8>) -> Self {
        Self {
            trade_id,
            status: TradeStatus::PendingAccept,
            confirmed_at_index: 0,
            created_at_time,
            accepted_at_time: None,
            sent: 0,
            sent_to: Vec::new(),
            is_my_offer,
            offer,
        }
    }
}
