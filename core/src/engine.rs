//! The pipeline engine: wires the components to one store, one clock
//! and one RNG bank, and records every state change in the event log.
//!
//! DAILY CYCLE ORDER (fixed, documented, never reordered):
//!   1. Attribution window expiry sweep
//!   2. Integrity scan (duplicates, tampering, quarantine)
//!
//! RULES:
//!   - Components never read the clock; the engine passes `today` / `now`.
//!   - All randomness flows through the RngBank.
//!   - All state changes are recorded in the event log. On the payment
//!     path the event is written in the same transaction as the change.

use crate::{
    attribution_window::AttributionWindowManager,
    bounty_settlement::{BountySettlementEngine, SettleOutcome, TransactionOutcome},
    clock::PipelineClock,
    command::{CommandOutcome, PipelineCommand, SpinInput},
    config::SmrConfig,
    error::SmrResult,
    event::{EventLogEntry, SmrEvent},
    heat_spike_detector::{DetectionReport, HeatSpikeDetector},
    integrity_verifier::{BlockReport, IntegrityScanReport, IntegrityVerifier},
    rng::{ComponentSlot, RngBank},
    store::{AttributionWindow, CemeteryRecord, SettlementAnchor, SmrStore, SpinRow},
    types::{CemeteryStatus, IntegrityStatus, RunId, WindowId},
};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A detection pass plus the windows it opened.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadDetection {
    pub report: DetectionReport,
    pub windows_opened: Vec<WindowId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyCycleReport {
    pub day: NaiveDate,
    pub windows_expired: usize,
    pub integrity: IntegrityScanReport,
}

pub struct SmrEngine {
    pub run_id: RunId,
    pub clock: PipelineClock,
    pub rng_bank: RngBank,
    pub config: SmrConfig,
    seed: u64,
    pub store: SmrStore,
}

impl SmrEngine {
    /// Start a run against a migrated store. Records the run and emits
    /// `RunInitialized` so seed differences are observable in the log.
    pub fn build(
        run_id: RunId,
        seed: u64,
        now: NaiveDateTime,
        config: SmrConfig,
        store: SmrStore,
    ) -> SmrResult<Self> {
        store.insert_run(&run_id, seed, ENGINE_VERSION, now)?;
        let engine = Self {
            clock: PipelineClock::new(run_id.clone(), now),
            rng_bank: RngBank::new(seed),
            config,
            seed,
            store,
            run_id,
        };
        engine.record(&SmrEvent::RunInitialized {
            run_id: engine.run_id.clone(),
            seed: engine.seed,
        })?;
        log::info!("Run {} started (seed {seed}) at {now}", engine.run_id);
        Ok(engine)
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub fn advance_days(&mut self, days: u32) -> SmrResult<NaiveDate> {
        let day = self.clock.advance_days(days);
        self.record(&SmrEvent::DayAdvanced { day })?;
        Ok(day)
    }

    // ── Ingestion and detection ────────────────────────────────────

    /// Persist an upload and its rows, hashing every row. One transaction.
    pub fn ingest_upload(
        &self,
        upload_id: &str,
        uploaded_on: NaiveDate,
        rows: &[SpinInput],
    ) -> SmrResult<usize> {
        let verifier = IntegrityVerifier::new(self.config.integrity.clone(), &self.store);
        let hashed = self.store.in_transaction(|store| {
            store.insert_upload(upload_id, uploaded_on)?;
            for input in rows {
                store.insert_spin_row(&SpinRow {
                    row_id: input.row_id.clone(),
                    upload_id: upload_id.to_string(),
                    artist_id: input.artist_id.clone(),
                    station_id: input.station_id.clone(),
                    played_on: input.played_on,
                    spin_count: input.spin_count,
                    track_title: input.track_title.clone(),
                    row_hash: None,
                    hash_verified: false,
                    integrity_status: IntegrityStatus::Clean,
                })?;
            }
            verifier.store_upload_hashes(upload_id)
        })?;
        self.record(&SmrEvent::UploadIngested {
            upload_id: upload_id.to_string(),
            rows: hashed,
        })?;
        Ok(hashed)
    }

    /// Scan a completed upload and open one window per declared spike.
    pub fn detect_upload(&self, upload_id: &str) -> SmrResult<UploadDetection> {
        let today = self.today();
        let detector = HeatSpikeDetector::new(self.config.detection.clone(), &self.store);
        let windows = AttributionWindowManager::new(self.config.attribution.clone(), &self.store);

        let mut report = detector.detect_for_upload(upload_id, today)?;
        let mut windows_opened = Vec::new();

        for spike in &report.spikes {
            self.record(&SmrEvent::HeatSpikeDetected {
                heat_spike_id: spike.heat_spike_id,
                artist_id: spike.data.artist_id.clone(),
                upload_id: spike.data.upload_id.clone(),
                multiplier: spike.data.multiplier,
            })?;
            let opened = windows.create_window(
                &spike.data.artist_id,
                spike.heat_spike_id,
                spike.data.detected_on,
            );
            match opened {
                Ok(window_id) => {
                    windows_opened.push(window_id);
                    if let Some(window) = self.store.get_window(window_id)? {
                        self.record(&SmrEvent::WindowOpened {
                            window_id,
                            artist_id: window.artist_id,
                            heat_spike_id: window.heat_spike_id,
                            window_end: window.window_end,
                        })?;
                    }
                }
                Err(e) => {
                    log::warn!("Window for spike {} not opened: {e}", spike.heat_spike_id);
                    report
                        .failures
                        .push((spike.data.artist_id.clone(), e.to_string()));
                }
            }
        }

        Ok(UploadDetection {
            report,
            windows_opened,
        })
    }

    // ── Daily cycle ────────────────────────────────────────────────

    pub fn daily_cycle(&mut self) -> SmrResult<DailyCycleReport> {
        let today = self.today();
        let now = self.clock.now;

        let windows_expired =
            AttributionWindowManager::new(self.config.attribution.clone(), &self.store)
                .expire_old_windows(today)?;

        let verifier = IntegrityVerifier::new(self.config.integrity.clone(), &self.store);
        let integrity = verifier.run_integrity_scan(
            today,
            now,
            self.rng_bank.stream(ComponentSlot::Integrity),
        )?;

        if windows_expired > 0 {
            self.record(&SmrEvent::WindowsExpired {
                count: windows_expired,
            })?;
        }
        for cemetery_id in &integrity.newly_flagged {
            self.record(&SmrEvent::CemeteryFlagged {
                cemetery_id: cemetery_id.clone(),
            })?;
        }
        for block in &integrity.blocked {
            self.record_quarantine(block)?;
        }

        Ok(DailyCycleReport {
            day: today,
            windows_expired,
            integrity,
        })
    }

    // ── Settlement ─────────────────────────────────────────────────

    /// The payment-path call: calculate, record, then settle. Retrying
    /// with the same royalty transaction id never pays twice.
    pub fn process_transaction(
        &mut self,
        royalty_transaction_id: &str,
        artist_id: &str,
        venue_id: Option<&str>,
    ) -> SmrResult<TransactionOutcome> {
        let today = self.today();
        let now = self.clock.now;
        let settlement = settlement_engine(&self.config, &self.store);

        let Some(calc) =
            settlement.calculate_bounty(royalty_transaction_id, artist_id, venue_id, today)?
        else {
            return Ok(TransactionOutcome::NotEligible {
                royalty_transaction_id: royalty_transaction_id.to_string(),
            });
        };

        let rng = self.rng_bank.stream(ComponentSlot::Settlement);
        let run_id = self.run_id.as_str();
        let recorded = self.store.in_transaction(|store| {
            let recorded = settlement.record_bounty_transaction(&calc, now, rng)?;
            if recorded.created {
                append_event(
                    store,
                    run_id,
                    today,
                    &SmrEvent::BountyRecorded {
                        bounty_id: recorded.bounty_id.clone(),
                        royalty_transaction_id: calc.royalty_transaction_id.clone(),
                        artist_id: calc.artist_id.clone(),
                        window_id: calc.window_id,
                        bounty_amount: calc.bounty_amount,
                        operating_amount: calc.operating_amount,
                        geofence_matched: calc.geofence.matched,
                    },
                )?;
            }
            Ok(recorded)
        })?;

        let settled = self.settle_bounty(&recorded.bounty_id)?;
        Ok(TransactionOutcome::Processed {
            bounty_id: recorded.bounty_id,
            created: recorded.created,
            settlement: settled,
        })
    }

    /// Settle and log in one transaction: a failed event append rolls
    /// the settlement back, so a retry both pays and logs.
    pub fn settle_bounty(&self, bounty_id: &str) -> SmrResult<SettleOutcome> {
        let settlement = settlement_engine(&self.config, &self.store);
        self.store.in_transaction(|store| {
            let outcome = settlement.settle_within(store, bounty_id, self.clock.now)?;
            let event = match &outcome {
                SettleOutcome::Settled {
                    bounty_id,
                    provider_account_id,
                    bounty_amount,
                    operating_amount,
                    ..
                } => Some(SmrEvent::BountySettled {
                    bounty_id: bounty_id.clone(),
                    provider_account_id: provider_account_id.clone(),
                    bounty_amount: *bounty_amount,
                    operating_amount: *operating_amount,
                }),
                SettleOutcome::Blocked { bounty_id, reason } => Some(SmrEvent::BountyReversed {
                    bounty_id: bounty_id.clone(),
                    reason: reason.clone(),
                }),
                SettleOutcome::AlreadySettled { .. } | SettleOutcome::AlreadyReversed { .. } => None,
            };
            if let Some(event) = event {
                append_event(store, &self.run_id, self.today(), &event)?;
            }
            Ok(outcome)
        })
    }

    pub fn anchor_settlements(&mut self) -> SmrResult<Option<SettlementAnchor>> {
        let now = self.clock.now;
        let today = self.today();
        let settlement = settlement_engine(&self.config, &self.store);
        let rng = self.rng_bank.stream(ComponentSlot::Anchor);
        let run_id = self.run_id.as_str();
        self.store.in_transaction(|store| {
            let anchor = settlement.anchor_within(store, now, rng)?;
            if let Some(anchor) = &anchor {
                append_event(
                    store,
                    run_id,
                    today,
                    &SmrEvent::SettlementsAnchored {
                        anchor_id: anchor.anchor_id.clone(),
                        merkle_root: anchor.merkle_root.clone(),
                        leaf_count: anchor.leaf_count,
                    },
                )?;
            }
            Ok(anchor)
        })
    }

    // ── Operator actions ───────────────────────────────────────────

    pub fn block_upload(&self, upload_id: &str) -> SmrResult<BlockReport> {
        let block = IntegrityVerifier::new(self.config.integrity.clone(), &self.store)
            .block_bounties_for_upload(upload_id, self.clock.now)?;
        self.record_quarantine(&block)?;
        Ok(block)
    }

    pub fn claim_window(&self, window_id: WindowId) -> SmrResult<AttributionWindow> {
        let window = AttributionWindowManager::new(self.config.attribution.clone(), &self.store)
            .mark_window_claimed(window_id, self.today())?;
        self.record(&SmrEvent::WindowClaimed {
            window_id,
            artist_id: window.artist_id.clone(),
        })?;
        Ok(window)
    }

    pub fn review_cemetery(
        &self,
        cemetery_id: &str,
        status: CemeteryStatus,
        note: Option<&str>,
    ) -> SmrResult<CemeteryRecord> {
        let record = IntegrityVerifier::new(self.config.integrity.clone(), &self.store)
            .review_cemetery_record(cemetery_id, status, note, self.today())?;
        self.record(&SmrEvent::CemeteryReviewed {
            cemetery_id: record.cemetery_id.clone(),
            status: record.status.to_string(),
        })?;
        Ok(record)
    }

    // ── Commands ───────────────────────────────────────────────────

    pub fn apply(&mut self, command: PipelineCommand) -> SmrResult<CommandOutcome> {
        log::debug!("Applying {command:?}");
        let outcome = match command {
            PipelineCommand::AddStation(station) => {
                self.store.insert_station(&station)?;
                CommandOutcome::Ack
            }
            PipelineCommand::AddVenue(venue) => {
                self.store.insert_venue(&venue)?;
                CommandOutcome::Ack
            }
            PipelineCommand::AddRoyaltyTransaction(tx) => {
                self.store.insert_royalty_transaction(&tx)?;
                CommandOutcome::Ack
            }
            PipelineCommand::AddProviderContract(contract) => {
                self.store.insert_provider_contract(&contract)?;
                CommandOutcome::Ack
            }
            PipelineCommand::AdvanceDays { days } => CommandOutcome::Today(self.advance_days(days)?),
            PipelineCommand::IngestUpload {
                upload_id,
                uploaded_on,
                rows,
            } => {
                let rows = self.ingest_upload(&upload_id, uploaded_on, &rows)?;
                CommandOutcome::Ingested { upload_id, rows }
            }
            PipelineCommand::DetectUpload { upload_id } => {
                CommandOutcome::Detection(self.detect_upload(&upload_id)?)
            }
            PipelineCommand::DailyCycle => CommandOutcome::DailyCycle(self.daily_cycle()?),
            PipelineCommand::ProcessTransaction {
                royalty_transaction_id,
                artist_id,
                venue_id,
            } => CommandOutcome::Transaction(self.process_transaction(
                &royalty_transaction_id,
                &artist_id,
                venue_id.as_deref(),
            )?),
            PipelineCommand::SettleBounty { bounty_id } => {
                CommandOutcome::Settlement(self.settle_bounty(&bounty_id)?)
            }
            PipelineCommand::AnchorSettlements => CommandOutcome::Anchor(self.anchor_settlements()?),
            PipelineCommand::BlockUpload { upload_id } => {
                CommandOutcome::Quarantine(self.block_upload(&upload_id)?)
            }
            PipelineCommand::ClaimWindow { window_id } => {
                CommandOutcome::Window(self.claim_window(window_id)?)
            }
            PipelineCommand::ReviewCemetery {
                cemetery_id,
                status,
                note,
            } => CommandOutcome::Cemetery(self.review_cemetery(
                &cemetery_id,
                status,
                note.as_deref(),
            )?),
        };
        Ok(outcome)
    }

    // ── Audit ──────────────────────────────────────────────────────

    /// The full event log for this run, in append order.
    pub fn events(&self) -> SmrResult<Vec<EventLogEntry>> {
        self.store.events_for_run(&self.run_id)
    }

    fn record_quarantine(&self, block: &BlockReport) -> SmrResult<()> {
        self.record(&SmrEvent::UploadQuarantined {
            upload_id: block.upload_id.clone(),
            rows_flagged: block.rows_flagged,
            bounties_reversed: block.bounties_reversed,
        })
    }

    fn record(&self, event: &SmrEvent) -> SmrResult<()> {
        append_event(&self.store, &self.run_id, self.today(), event)
    }
}

fn append_event(store: &SmrStore, run_id: &str, day: NaiveDate, event: &SmrEvent) -> SmrResult<()> {
    store.append_event(&EventLogEntry {
        id: None,
        run_id: run_id.to_string(),
        day,
        component: event.component().to_string(),
        event_type: event.type_name().to_string(),
        payload: serde_json::to_string(event)?,
    })
}

fn settlement_engine<'s>(config: &SmrConfig, store: &'s SmrStore) -> BountySettlementEngine<'s> {
    BountySettlementEngine::new(
        config.settlement.clone(),
        config.attribution.clone(),
        config.geofence.clone(),
        store,
    )
}
