//! The pipeline audit trail.
//!
//! RULE: Every state change the engine makes is appended to `event_log`
//! as one `SmrEvent`, keyed by run id and pipeline day.
//! Variants are appended, never removed or reordered.

use crate::types::{BountyId, HeatSpikeId, RunId, WindowId};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SmrEvent {
    // ── Engine ─────────────────────────────────────
    RunInitialized {
        run_id: RunId,
        seed: u64,
    },
    DayAdvanced {
        day: NaiveDate,
    },

    // ── Integrity ──────────────────────────────────
    UploadIngested {
        upload_id: String,
        rows: usize,
    },
    CemeteryFlagged {
        cemetery_id: String,
    },
    UploadQuarantined {
        upload_id: String,
        rows_flagged: usize,
        bounties_reversed: usize,
    },
    CemeteryReviewed {
        cemetery_id: String,
        status: String,
    },

    // ── Detection and attribution ──────────────────
    HeatSpikeDetected {
        heat_spike_id: HeatSpikeId,
        artist_id: String,
        upload_id: String,
        multiplier: Decimal,
    },
    WindowOpened {
        window_id: WindowId,
        artist_id: String,
        heat_spike_id: HeatSpikeId,
        window_end: NaiveDate,
    },
    WindowsExpired {
        count: usize,
    },
    WindowClaimed {
        window_id: WindowId,
        artist_id: String,
    },

    // ── Settlement ─────────────────────────────────
    BountyRecorded {
        bounty_id: BountyId,
        royalty_transaction_id: String,
        artist_id: String,
        window_id: WindowId,
        bounty_amount: Decimal,
        operating_amount: Decimal,
        geofence_matched: bool,
    },
    BountySettled {
        bounty_id: BountyId,
        provider_account_id: String,
        bounty_amount: Decimal,
        operating_amount: Decimal,
    },
    BountyReversed {
        bounty_id: BountyId,
        reason: String,
    },
    SettlementsAnchored {
        anchor_id: String,
        merkle_root: String,
        leaf_count: i64,
    },
}

impl SmrEvent {
    /// Stable name for the `event_type` column.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::RunInitialized { .. } => "run_initialized",
            Self::DayAdvanced { .. } => "day_advanced",
            Self::UploadIngested { .. } => "upload_ingested",
            Self::CemeteryFlagged { .. } => "cemetery_flagged",
            Self::UploadQuarantined { .. } => "upload_quarantined",
            Self::CemeteryReviewed { .. } => "cemetery_reviewed",
            Self::HeatSpikeDetected { .. } => "heat_spike_detected",
            Self::WindowOpened { .. } => "window_opened",
            Self::WindowsExpired { .. } => "windows_expired",
            Self::WindowClaimed { .. } => "window_claimed",
            Self::BountyRecorded { .. } => "bounty_recorded",
            Self::BountySettled { .. } => "bounty_settled",
            Self::BountyReversed { .. } => "bounty_reversed",
            Self::SettlementsAnchored { .. } => "settlements_anchored",
        }
    }

    /// The component that emitted the event.
    pub fn component(&self) -> &'static str {
        match self {
            Self::RunInitialized { .. } | Self::DayAdvanced { .. } => "engine",
            Self::UploadIngested { .. }
            | Self::CemeteryFlagged { .. }
            | Self::UploadQuarantined { .. }
            | Self::CemeteryReviewed { .. } => "integrity",
            Self::HeatSpikeDetected { .. } => "detection",
            Self::WindowOpened { .. } | Self::WindowsExpired { .. } | Self::WindowClaimed { .. } => {
                "attribution"
            }
            Self::BountyRecorded { .. }
            | Self::BountySettled { .. }
            | Self::BountyReversed { .. }
            | Self::SettlementsAnchored { .. } => "settlement",
        }
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub run_id: RunId,
    pub day: NaiveDate,
    pub component: String,
    pub event_type: String,
    pub payload: String, // JSON-serialized SmrEvent
}
