use crate::{
    bounty_settlement::{SettleOutcome, TransactionOutcome},
    engine::{DailyCycleReport, UploadDetection},
    integrity_verifier::BlockReport,
    store::{
        AttributionWindow, CemeteryRecord, ProviderContract, RoyaltyTransaction, SettlementAnchor,
        Station, Venue,
    },
    types::{CemeteryStatus, WindowId},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One spin row as delivered by the ingestion pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpinInput {
    pub row_id: String,
    pub artist_id: String,
    pub station_id: String,
    pub played_on: NaiveDate,
    pub spin_count: i64,
    #[serde(default)]
    pub track_title: Option<String>,
}

/// All commands the pipeline accepts, one per JSON line.
/// Variants are appended, never removed or reordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum PipelineCommand {
    // ── Collaborator data ─────────────────────────
    AddStation(Station),
    AddVenue(Venue),
    AddRoyaltyTransaction(RoyaltyTransaction),
    AddProviderContract(ProviderContract),

    // ── Clock ─────────────────────────────────────
    AdvanceDays {
        days: u32,
    },

    // ── Ingestion and detection ───────────────────
    IngestUpload {
        upload_id: String,
        uploaded_on: NaiveDate,
        rows: Vec<SpinInput>,
    },
    DetectUpload {
        upload_id: String,
    },
    DailyCycle,

    // ── Settlement ────────────────────────────────
    ProcessTransaction {
        royalty_transaction_id: String,
        artist_id: String,
        #[serde(default)]
        venue_id: Option<String>,
    },
    SettleBounty {
        bounty_id: String,
    },
    AnchorSettlements,

    // ── Operator actions ──────────────────────────
    BlockUpload {
        upload_id: String,
    },
    ClaimWindow {
        window_id: WindowId,
    },
    ReviewCemetery {
        cemetery_id: String,
        status: CemeteryStatus,
        #[serde(default)]
        note: Option<String>,
    },
}

/// The result of applying one command.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", content = "data", rename_all = "snake_case")]
pub enum CommandOutcome {
    Ack,
    Today(NaiveDate),
    Ingested { upload_id: String, rows: usize },
    Detection(UploadDetection),
    DailyCycle(DailyCycleReport),
    Transaction(TransactionOutcome),
    Settlement(SettleOutcome),
    Anchor(Option<SettlementAnchor>),
    Quarantine(BlockReport),
    Window(AttributionWindow),
    Cemetery(CemeteryRecord),
}
