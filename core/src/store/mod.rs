//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Components call store methods and never execute SQL directly.
//!
//! Amounts and percentages are stored as INTEGER hundredths and surface
//! as `Decimal`; dates are ISO-8601 TEXT via rusqlite's chrono support.

use crate::{
    error::SmrResult,
    event::EventLogEntry,
    integrity_verifier::SpinContent,
    types::{
        BountyId, BountyStatus, CemeteryStatus, FailureType, HeatSpikeId, IntegrityStatus,
        LedgerRole, RowHash, WindowId, WindowStatus,
    },
};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

mod anchor;
mod bounty;
mod cemetery;
mod heat_spike;
mod ledger;
mod spin;
mod window;

pub struct SmrStore {
    conn: Connection,
}

impl SmrStore {
    pub fn open(path: &str) -> SmrResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> SmrResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> SmrResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_spin_source.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_integrity.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/004_heat_spike.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/005_attribution_window.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/006_settlement.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/007_ledger.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/008_anchor.sql"))?;
        Ok(())
    }

    /// Run `f` as one atomic unit.
    ///
    /// Commits when `f` returns `Ok`. An `Err` (or a panic) drops the
    /// transaction, which rolls back every statement `f` executed.
    /// Must not be nested.
    pub fn in_transaction<T>(&self, f: impl FnOnce(&Self) -> SmrResult<T>) -> SmrResult<T> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let out = f(self)?;
        tx.commit()?;
        Ok(out)
    }

    // ── Run ────────────────────────────────────────────────────

    pub fn insert_run(
        &self,
        run_id: &str,
        seed: u64,
        version: &str,
        started_at: NaiveDateTime,
    ) -> SmrResult<()> {
        self.conn.execute(
            "INSERT INTO run (run_id, seed, version, started_at) VALUES (?1, ?2, ?3, ?4)",
            params![run_id, seed as i64, version, started_at],
        )?;
        Ok(())
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> SmrResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (run_id, day, component, event_type, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.run_id,
                entry.day,
                entry.component,
                entry.event_type,
                entry.payload,
            ],
        )?;
        Ok(())
    }

    pub fn events_for_run(&self, run_id: &str) -> SmrResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, day, component, event_type, payload
             FROM event_log WHERE run_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![run_id], map_event_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn events_for_day(&self, run_id: &str, day: NaiveDate) -> SmrResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, day, component, event_type, payload
             FROM event_log WHERE run_id = ?1 AND day = ?2
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![run_id, day], map_event_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

fn map_event_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventLogEntry> {
    Ok(EventLogEntry {
        id: Some(row.get(0)?),
        run_id: row.get(1)?,
        day: row.get(2)?,
        component: row.get(3)?,
        event_type: row.get(4)?,
        payload: row.get(5)?,
    })
}

/// Decode a JSON TEXT column.
fn json_column<T: DeserializeOwned>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Decode an INTEGER hundredths column.
fn decimal_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    Ok(crate::types::from_hundredths(row.get::<_, i64>(idx)?))
}

// ─────────────────────────────────────────────────────────────────────────────
// Spin source (collaborator data)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Station {
    pub station_id: String,
    pub name: String,
    pub postal_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Venue {
    pub venue_id: String,
    pub name: String,
    pub postal_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upload {
    pub upload_id: String,
    pub uploaded_on: NaiveDate,
    pub status: String,
}

/// One observed airplay event. Never edited in place once hashed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpinRow {
    pub row_id: String,
    pub upload_id: String,
    pub artist_id: String,
    pub station_id: String,
    pub played_on: NaiveDate,
    pub spin_count: i64,
    pub track_title: Option<String>,
    pub row_hash: Option<RowHash>,
    pub hash_verified: bool,
    pub integrity_status: IntegrityStatus,
}

impl SpinRow {
    /// The hashed subset of the row. Row and upload ids are excluded so a
    /// payload replayed under a new upload hashes identically.
    pub fn content(&self) -> SpinContent {
        SpinContent {
            artist_id: self.artist_id.clone(),
            station_id: self.station_id.clone(),
            played_on: self.played_on,
            spin_count: self.spin_count,
            track_title: self.track_title.clone(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Integrity
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CemeteryRecord {
    pub cemetery_id: String,
    pub upload_id: Option<String>,
    pub failure_type: FailureType,
    pub failure_key: String,
    pub expected_hash: Option<RowHash>,
    pub actual_hash: Option<RowHash>,
    pub data_snapshot: serde_json::Value,
    pub status: CemeteryStatus,
    pub flagged_on: NaiveDate,
    pub reviewed_on: Option<NaiveDate>,
    pub review_note: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Detection and attribution
// ─────────────────────────────────────────────────────────────────────────────

/// Detection measurements, as produced by the detector before insert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeatSpikeData {
    pub artist_id: String,
    pub upload_id: String,
    pub detected_on: NaiveDate,
    pub baseline_spins: i64,
    pub spike_spins: i64,
    pub multiplier: Decimal,
    pub spike_start: NaiveDate,
    pub spike_end: NaiveDate,
    pub station_count: i64,
    pub postal_codes: Vec<String>,
    pub threshold_met: bool,
}

/// A recorded detection. Immutable once inserted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeatSpike {
    pub heat_spike_id: HeatSpikeId,
    #[serde(flatten)]
    pub data: HeatSpikeData,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttributionWindow {
    pub window_id: WindowId,
    pub artist_id: String,
    pub heat_spike_id: HeatSpikeId,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub status: WindowStatus,
    pub bounties_triggered: i64,
    pub bounty_amount: Decimal,
    pub closed_on: Option<NaiveDate>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Settlement
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoyaltyTransaction {
    pub royalty_transaction_id: String,
    pub artist_id: String,
    pub gross_platform_fee: Decimal,
    pub currency: String,
    pub completed_on: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderContract {
    pub contract_id: String,
    pub provider_account_id: String,
    /// "active" | "inactive"
    pub status: String,
    pub is_preferred: bool,
    pub partner_rank: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BountyTransaction {
    pub bounty_id: BountyId,
    pub royalty_transaction_id: String,
    pub artist_id: String,
    pub window_id: WindowId,
    pub heat_spike_id: HeatSpikeId,
    pub gross_fee: Decimal,
    pub bounty_pct: Decimal,
    /// Provider share including any geofence bonus.
    pub bounty_amount: Decimal,
    pub operating_pct: Decimal,
    pub operating_amount: Decimal,
    pub geofence_matched: bool,
    pub geofence_bonus_pct: Decimal,
    pub geofence_bonus: Decimal,
    pub geofence_zip: Option<String>,
    pub venue_id: Option<String>,
    pub provider_account_id: String,
    pub currency: String,
    pub status: BountyStatus,
    pub created_at: NaiveDateTime,
    pub settled_at: Option<NaiveDateTime>,
    pub reversed_at: Option<NaiveDateTime>,
    pub reversal_reason: Option<String>,
    pub anchor_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerBalance {
    pub account_id: String,
    pub currency: String,
    pub balance: Decimal,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    pub entry_id: i64,
    pub account_id: String,
    pub currency: String,
    pub amount: Decimal,
    pub bounty_id: BountyId,
    pub role: LedgerRole,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SettlementAnchor {
    pub anchor_id: String,
    pub merkle_root: String,
    pub leaf_count: i64,
    pub anchored_at: NaiveDateTime,
}
