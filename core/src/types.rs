//! Shared primitive types used across the pipeline.

use crate::error::{SmrError, SmrResult};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// The canonical run identifier.
pub type RunId = String;

pub type ArtistId = String;
pub type HeatSpikeId = i64;
pub type WindowId = i64;
pub type BountyId = String;

/// Lowercase hex SHA-256 digest.
pub type RowHash = String;

// ── Fixed-point money ──────────────────────────────────────────────

/// Round to two places, half away from zero.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Persisted form of an amount or percentage: integer hundredths.
pub fn to_hundredths(value: Decimal) -> SmrResult<i64> {
    (round_money(value) * Decimal::ONE_HUNDRED)
        .to_i64()
        .ok_or_else(|| SmrError::InvalidAmount(value.to_string()))
}

pub fn from_hundredths(value: i64) -> Decimal {
    Decimal::new(value, 2)
}

// ── Status enums ───────────────────────────────────────────────────

/// Declares a status enum stored as TEXT, with its wire names.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!("unknown {} '{other}'", stringify!($name))),
                }
            }
        }

        impl rusqlite::types::ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
                Ok(rusqlite::types::ToSqlOutput::from(self.as_str()))
            }
        }

        impl rusqlite::types::FromSql for $name {
            fn column_result(
                value: rusqlite::types::ValueRef<'_>,
            ) -> rusqlite::types::FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: String| rusqlite::types::FromSqlError::Other(e.into()))
            }
        }
    };
}

text_enum! {
    /// Quarantine state of a spin row.
    IntegrityStatus {
        Clean => "clean",
        Flagged => "flagged",
    }
}

text_enum! {
    FailureType {
        DuplicateHash => "duplicate_hash",
        TamperMismatch => "tamper_mismatch",
        BotPattern => "bot_pattern",
    }
}

text_enum! {
    /// Cemetery lifecycle. Everything past `Flagged` is set by human review.
    CemeteryStatus {
        Flagged => "flagged",
        Reviewed => "reviewed",
        Resolved => "resolved",
        FalsePositive => "false_positive",
    }
}

text_enum! {
    /// `Active -> Expired` (daily sweep) or `Active -> Claimed` (explicit).
    WindowStatus {
        Active => "active",
        Expired => "expired",
        Claimed => "claimed",
    }
}

text_enum! {
    BountyStatus {
        Pending => "pending",
        Settled => "settled",
        Reversed => "reversed",
    }
}

text_enum! {
    /// Which side of the split a ledger entry credits.
    LedgerRole {
        Provider => "provider",
        Operating => "operating",
    }
}

impl CemeteryStatus {
    /// Human review may move a record forward, never back to `Flagged`.
    pub fn can_transition_to(self, next: CemeteryStatus) -> bool {
        use CemeteryStatus::*;
        matches!(
            (self, next),
            (Flagged, Reviewed)
                | (Flagged, Resolved)
                | (Flagged, FalsePositive)
                | (Reviewed, Resolved)
                | (Reviewed, FalsePositive)
        )
    }
}
