//! Integrity verifier: canonical row hashing, duplicate and tamper
//! detection, and the cemetery that quarantines suspect data.
//!
//! Design:
//!   - Canonical encoding: keys sorted, null/empty values dropped,
//!     strings trimmed, then SHA-256 (lowercase hex).
//!   - Duplicate scan groups non-quarantined rows by hash; every group
//!     with more than one member is flagged for review.
//!   - Tamper scan recomputes each verified row's hash from its current
//!     stored content and flags mismatches.
//!   - Flagging is idempotent per failure key.
//!   - Quarantining an upload reverses every pending bounty for every
//!     artist the upload touched, in one transaction.
//!   - Every record is linked to the uploads it implicates. Each scan
//!     quarantines every linked upload not yet quarantined, so a block
//!     that failed on one scan is retried on the next.
//!   - A `false_positive` review releases the uploads behind the record
//!     unless another live record still holds them.
//!   - Scans isolate failures per group/row: one failed flag never
//!     stops the others.

use crate::{
    config::IntegrityConfig,
    error::{SmrError, SmrResult},
    rng::ComponentRng,
    store::{CemeteryRecord, SmrStore, SpinRow},
    types::{CemeteryStatus, FailureType, RowHash},
};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

// ── Canonical hashing ────────────────────────────────────────────────────────

/// The logical content of a spin row, as hashed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpinContent {
    pub artist_id: String,
    pub station_id: String,
    pub played_on: NaiveDate,
    pub spin_count: i64,
    pub track_title: Option<String>,
}

impl SpinContent {
    pub fn to_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("artist_id".into(), Value::from(self.artist_id.clone()));
        fields.insert("station_id".into(), Value::from(self.station_id.clone()));
        fields.insert("played_on".into(), Value::from(self.played_on.to_string()));
        fields.insert("spin_count".into(), Value::from(self.spin_count));
        fields.insert(
            "track_title".into(),
            self.track_title.clone().map(Value::from).unwrap_or(Value::Null),
        );
        fields
    }
}

/// Deterministic encoding: identical logical content yields identical
/// bytes regardless of key order or surrounding whitespace.
pub fn canonical_encoding(fields: &Map<String, Value>) -> String {
    Value::Object(canonical_map(fields)).to_string()
}

fn canonical_map(fields: &Map<String, Value>) -> Map<String, Value> {
    let sorted: BTreeMap<String, Value> = fields
        .iter()
        .filter_map(|(k, v)| canonical_value(v).map(|v| (k.trim().to_string(), v)))
        .collect();
    sorted.into_iter().collect()
}

fn canonical_value(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| Value::from(trimmed))
        }
        Value::Object(map) => Some(Value::Object(canonical_map(map))),
        other => Some(other.clone()),
    }
}

/// Content hash of an arbitrary field map. Pure.
pub fn hash_row(fields: &Map<String, Value>) -> RowHash {
    format!("{:x}", Sha256::digest(canonical_encoding(fields).as_bytes()))
}

pub fn hash_spin(content: &SpinContent) -> RowHash {
    hash_row(&content.to_fields())
}

// ── Findings ─────────────────────────────────────────────────────────────────

/// Rows sharing one hash. Bots replaying a payload and legitimate
/// re-reports look identical here; both go to review.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DuplicateGroup {
    pub row_hash: RowHash,
    pub row_ids: Vec<String>,
    pub upload_ids: Vec<String>,
    pub artist_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TamperFinding {
    pub row: SpinRow,
    pub actual_hash: RowHash,
}

/// Input to `flag_to_cemetery`.
#[derive(Debug, Clone)]
pub struct CemeteryFailure {
    pub failure_type: FailureType,
    /// Identifies the logical failure; repeat scans produce the same key.
    pub failure_key: String,
    pub upload_id: Option<String>,
    pub expected_hash: Option<RowHash>,
    pub actual_hash: Option<RowHash>,
    pub data_snapshot: Value,
    /// Every upload implicated by this failure.
    pub upload_ids: Vec<String>,
}

impl CemeteryFailure {
    pub fn duplicate(group: &DuplicateGroup) -> Self {
        let members = Sha256::digest(group.row_ids.join(",").as_bytes());
        Self {
            failure_type: FailureType::DuplicateHash,
            failure_key: format!("duplicate_hash:{}:{:x}", group.row_hash, members),
            upload_id: group.upload_ids.first().cloned(),
            expected_hash: Some(group.row_hash.clone()),
            actual_hash: Some(group.row_hash.clone()),
            data_snapshot: serde_json::json!({
                "row_hash": group.row_hash,
                "row_ids": group.row_ids,
                "upload_ids": group.upload_ids,
                "artist_ids": group.artist_ids,
            }),
            upload_ids: group.upload_ids.clone(),
        }
    }

    pub fn tamper(finding: &TamperFinding) -> SmrResult<Self> {
        let row = &finding.row;
        Ok(Self {
            failure_type: FailureType::TamperMismatch,
            failure_key: format!("tamper_mismatch:{}:{}", row.row_id, finding.actual_hash),
            upload_id: Some(row.upload_id.clone()),
            expected_hash: row.row_hash.clone(),
            actual_hash: Some(finding.actual_hash.clone()),
            data_snapshot: serde_json::to_value(row)?,
            upload_ids: vec![row.upload_id.clone()],
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlagOutcome {
    pub cemetery_id: String,
    pub newly_flagged: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockReport {
    pub upload_id: String,
    pub rows_flagged: usize,
    pub bounties_reversed: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrityScanReport {
    pub duplicate_groups: usize,
    pub tampered_rows: usize,
    /// Cemetery ids created by this scan (repeat findings excluded).
    pub newly_flagged: Vec<String>,
    pub blocked: Vec<BlockReport>,
    /// (item, error) for every group/row/upload that failed in isolation.
    pub failures: Vec<(String, String)>,
}

// ── Verifier ─────────────────────────────────────────────────────────────────

pub struct IntegrityVerifier<'a> {
    config: IntegrityConfig,
    store: &'a SmrStore,
}

impl<'a> IntegrityVerifier<'a> {
    pub fn new(config: IntegrityConfig, store: &'a SmrStore) -> Self {
        Self { config, store }
    }

    /// Compare `expected` against the row's stored hash.
    /// False when the row is unknown, has no stored hash, or differs.
    pub fn verify(&self, row_id: &str, expected: &SpinContent) -> SmrResult<bool> {
        let stored = match self.store.get_spin_row(row_id)? {
            Some(row) => row.row_hash,
            None => None,
        };
        let Some(stored) = stored else {
            log::warn!("verify: row {row_id} has no stored hash");
            return Ok(false);
        };
        let matches = stored == hash_spin(expected);
        if !matches {
            log::warn!("verify: tamper detected on row {row_id}");
        }
        Ok(matches)
    }

    /// Persist the row's hash and mark it verified. Called once at ingestion.
    pub fn store_hash(&self, row_id: &str, content: &SpinContent) -> SmrResult<RowHash> {
        let hash = hash_spin(content);
        if self.store.set_row_hash(row_id, &hash)? == 0 {
            return Err(SmrError::RowNotFound {
                row_id: row_id.to_string(),
            });
        }
        Ok(hash)
    }

    /// Hash every row of an upload from its stored content.
    pub fn store_upload_hashes(&self, upload_id: &str) -> SmrResult<usize> {
        if self.store.get_upload(upload_id)?.is_none() {
            return Err(SmrError::UploadNotFound {
                upload_id: upload_id.to_string(),
            });
        }
        let rows = self.store.spin_rows_for_upload(upload_id)?;
        for row in &rows {
            self.store_hash(&row.row_id, &row.content())?;
        }
        log::debug!("Stored {} row hashes for upload {upload_id}", rows.len());
        Ok(rows.len())
    }

    pub fn scan_for_duplicates(&self) -> SmrResult<Vec<DuplicateGroup>> {
        let rows = self.store.rows_sharing_hash()?;
        let mut groups: BTreeMap<RowHash, Vec<SpinRow>> = BTreeMap::new();
        for row in rows {
            if let Some(hash) = row.row_hash.clone() {
                groups.entry(hash).or_default().push(row);
            }
        }
        Ok(groups
            .into_iter()
            .filter(|(_, members)| members.len() > 1)
            .map(|(row_hash, members)| DuplicateGroup {
                row_hash,
                row_ids: members.iter().map(|r| r.row_id.clone()).collect(),
                upload_ids: sorted_unique(members.iter().map(|r| r.upload_id.clone())),
                artist_ids: sorted_unique(members.iter().map(|r| r.artist_id.clone())),
            })
            .collect())
    }

    pub fn scan_for_tampering(&self) -> SmrResult<Vec<TamperFinding>> {
        let findings = self
            .store
            .verified_clean_rows()?
            .into_iter()
            .filter_map(|row| {
                let actual_hash = hash_spin(&row.content());
                if row.row_hash.as_deref() == Some(actual_hash.as_str()) {
                    None
                } else {
                    Some(TamperFinding { row, actual_hash })
                }
            })
            .collect();
        Ok(findings)
    }

    /// Record a quarantine entry and link it to the implicated uploads.
    /// A failure key already on file returns the existing record instead
    /// of writing a second one.
    pub fn flag_to_cemetery(
        &self,
        failure: &CemeteryFailure,
        today: NaiveDate,
        rng: &mut ComponentRng,
    ) -> SmrResult<FlagOutcome> {
        self.store
            .in_transaction(|store| Self::flag_within(store, failure, today, rng))
    }

    fn flag_within(
        store: &SmrStore,
        failure: &CemeteryFailure,
        today: NaiveDate,
        rng: &mut ComponentRng,
    ) -> SmrResult<FlagOutcome> {
        let record = CemeteryRecord {
            cemetery_id: rng.uuid().to_string(),
            upload_id: failure.upload_id.clone(),
            failure_type: failure.failure_type,
            failure_key: failure.failure_key.clone(),
            expected_hash: failure.expected_hash.clone(),
            actual_hash: failure.actual_hash.clone(),
            data_snapshot: failure.data_snapshot.clone(),
            status: CemeteryStatus::Flagged,
            flagged_on: today,
            reviewed_on: None,
            review_note: None,
        };
        if store.insert_cemetery_record_if_absent(&record)? {
            store.link_cemetery_uploads(&record.cemetery_id, &failure.upload_ids)?;
            log::warn!(
                "Cemetery: {} flagged ({})",
                record.failure_type,
                record.failure_key
            );
            return Ok(FlagOutcome {
                cemetery_id: record.cemetery_id,
                newly_flagged: true,
            });
        }
        let existing = store
            .cemetery_id_for_key(&failure.failure_key)?
            .ok_or_else(|| {
                anyhow::anyhow!("cemetery key {} conflicted but is missing", failure.failure_key)
            })?;
        store.link_cemetery_uploads(&existing, &failure.upload_ids)?;
        Ok(FlagOutcome {
            cemetery_id: existing,
            newly_flagged: false,
        })
    }

    /// Quarantine an upload: flag all its rows, then reverse every pending
    /// bounty for every artist it touched. One transaction.
    pub fn block_bounties_for_upload(
        &self,
        upload_id: &str,
        now: NaiveDateTime,
    ) -> SmrResult<BlockReport> {
        self.store.in_transaction(|store| {
            if store.get_upload(upload_id)?.is_none() {
                return Err(SmrError::UploadNotFound {
                    upload_id: upload_id.to_string(),
                });
            }
            let artists = store.artists_in_upload(upload_id)?;
            let rows_flagged = store.flag_rows_for_upload(upload_id)?;
            let reason = format!("upload {upload_id} quarantined");
            let bounties_reversed =
                store.reverse_pending_bounties_for_artists(&artists, now, &reason)?;
            log::info!(
                "Quarantined upload {upload_id}: {rows_flagged} rows flagged, \
                 {bounties_reversed} bounties reversed"
            );
            Ok(BlockReport {
                upload_id: upload_id.to_string(),
                rows_flagged,
                bounties_reversed,
            })
        })
    }

    /// Human review. The only way a record leaves `flagged`.
    ///
    /// A `false_positive` outcome returns the record's uploads to
    /// circulation unless another live record still holds them. Bounties
    /// already reversed stay reversed.
    pub fn review_cemetery_record(
        &self,
        cemetery_id: &str,
        status: CemeteryStatus,
        note: Option<&str>,
        today: NaiveDate,
    ) -> SmrResult<CemeteryRecord> {
        self.store.in_transaction(|store| {
            let current = store.get_cemetery_record(cemetery_id)?.ok_or_else(|| {
                SmrError::CemeteryRecordNotFound {
                    cemetery_id: cemetery_id.to_string(),
                }
            })?;
            let invalid = || SmrError::InvalidTransition {
                entity: "cemetery_record",
                id: cemetery_id.to_string(),
                from: current.status.to_string(),
                to: status.to_string(),
            };
            if !current.status.can_transition_to(status) {
                return Err(invalid());
            }
            if store.update_cemetery_review(cemetery_id, current.status, status, note, today)? == 0
            {
                return Err(invalid());
            }
            if status == CemeteryStatus::FalsePositive {
                for upload_id in store.uploads_cleared_by(cemetery_id)? {
                    let released = store.release_upload(&upload_id)?;
                    log::info!(
                        "Released upload {upload_id} ({released} rows) after false positive {cemetery_id}"
                    );
                }
            }
            store.get_cemetery_record(cemetery_id)?.ok_or_else(|| {
                SmrError::CemeteryRecordNotFound {
                    cemetery_id: cemetery_id.to_string(),
                }
            })
        })
    }

    /// Duplicate and tamper scans, flagging each finding in isolation.
    /// With `quarantine_on_flag`, every upload behind a live record that is
    /// not yet quarantined is blocked, including ones a previous scan
    /// failed to block.
    pub fn run_integrity_scan(
        &self,
        today: NaiveDate,
        now: NaiveDateTime,
        rng: &mut ComponentRng,
    ) -> SmrResult<IntegrityScanReport> {
        let mut report = IntegrityScanReport::default();
        let mut failures: Vec<CemeteryFailure> = Vec::new();

        match self.scan_for_duplicates() {
            Ok(groups) => {
                report.duplicate_groups = groups.len();
                failures.extend(groups.iter().map(CemeteryFailure::duplicate));
            }
            Err(e) => {
                log::warn!("Duplicate scan failed: {e}");
                report.failures.push(("duplicate_scan".into(), e.to_string()));
            }
        }
        match self.scan_for_tampering() {
            Ok(findings) => {
                report.tampered_rows = findings.len();
                for finding in &findings {
                    match CemeteryFailure::tamper(finding) {
                        Ok(failure) => failures.push(failure),
                        Err(e) => {
                            log::warn!("Failed to snapshot row {}: {e}", finding.row.row_id);
                            report.failures.push((finding.row.row_id.clone(), e.to_string()));
                        }
                    }
                }
            }
            Err(e) => {
                log::warn!("Tamper scan failed: {e}");
                report.failures.push(("tamper_scan".into(), e.to_string()));
            }
        }

        for failure in &failures {
            match self.flag_to_cemetery(failure, today, rng) {
                Ok(outcome) if outcome.newly_flagged => {
                    report.newly_flagged.push(outcome.cemetery_id);
                }
                Ok(_) => {}
                Err(e) => {
                    log::warn!("Failed to flag {}: {e}", failure.failure_key);
                    report.failures.push((failure.failure_key.clone(), e.to_string()));
                }
            }
        }

        if self.config.quarantine_on_flag {
            match self.store.uploads_awaiting_quarantine() {
                Ok(uploads) => {
                    for upload_id in uploads {
                        match self.block_bounties_for_upload(&upload_id, now) {
                            Ok(block) => report.blocked.push(block),
                            Err(e) => {
                                log::warn!("Failed to quarantine upload {upload_id}: {e}");
                                report.failures.push((upload_id, e.to_string()));
                            }
                        }
                    }
                }
                Err(e) => {
                    log::warn!("Quarantine sweep failed: {e}");
                    report.failures.push(("quarantine_sweep".into(), e.to_string()));
                }
            }
        }

        Ok(report)
    }
}

fn sorted_unique(items: impl Iterator<Item = String>) -> Vec<String> {
    items.collect::<BTreeSet<_>>().into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn key_order_does_not_change_hash() {
        let a = fields(json!({"artist_id": "a1", "station_id": "s1", "spin_count": 4}));
        let b = fields(json!({"spin_count": 4, "station_id": "s1", "artist_id": "a1"}));
        assert_eq!(hash_row(&a), hash_row(&b));
    }

    #[test]
    fn whitespace_and_empty_values_are_ignored() {
        let a = fields(json!({"artist_id": "a1", "station_id": "s1"}));
        let b = fields(json!({"artist_id": "  a1 ", "station_id": "s1", "track_title": "", "notes": null}));
        assert_eq!(hash_row(&a), hash_row(&b));
    }

    #[test]
    fn any_field_change_changes_hash() {
        let a = fields(json!({"artist_id": "a1", "station_id": "s1", "spin_count": 4}));
        let b = fields(json!({"artist_id": "a1", "station_id": "s1", "spin_count": 5}));
        assert_ne!(hash_row(&a), hash_row(&b));
    }

    #[test]
    fn hash_is_lowercase_hex_sha256() {
        let h = hash_row(&Map::new());
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn canonical_encoding_sorts_keys() {
        let f = fields(json!({"b": 1, "a": " x "}));
        assert_eq!(canonical_encoding(&f), r#"{"a":"x","b":1}"#);
    }
}
