//! Integrity verifier tests: hashing, duplicate/tamper scans, quarantine.

mod common;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde_json::json;
use smr_core::{
    config::IntegrityConfig,
    error::SmrError,
    integrity_verifier::{hash_row, hash_spin, CemeteryFailure, IntegrityVerifier},
    rng::{ComponentSlot, RngBank},
    store::{BountyTransaction, HeatSpikeData, SmrStore, SpinRow, Station},
    types::{BountyStatus, CemeteryStatus, FailureType, IntegrityStatus},
};

use common::DiskStore;

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
}

fn noon(d: u32) -> NaiveDateTime {
    day(d).and_hms_opt(12, 0, 0).unwrap()
}

fn build() -> SmrStore {
    let store = SmrStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    with_stations(store)
}

fn with_stations(store: SmrStore) -> SmrStore {
    for (id, zip) in [("S1", "100001"), ("S2", "100271")] {
        store
            .insert_station(&Station {
                station_id: id.into(),
                name: format!("Station {id}"),
                postal_code: Some(zip.into()),
            })
            .unwrap();
    }
    store
}

fn spin(row_id: &str, upload_id: &str, artist: &str, station: &str, d: u32, count: i64) -> SpinRow {
    SpinRow {
        row_id: row_id.into(),
        upload_id: upload_id.into(),
        artist_id: artist.into(),
        station_id: station.into(),
        played_on: day(d),
        spin_count: count,
        track_title: Some("Ojuelegba".into()),
        row_hash: None,
        hash_verified: false,
        integrity_status: IntegrityStatus::Clean,
    }
}

/// Insert an upload's rows and hash them, as ingestion does.
fn ingest(store: &SmrStore, upload_id: &str, rows: &[SpinRow]) {
    store.insert_upload(upload_id, day(1)).unwrap();
    for row in rows {
        store.insert_spin_row(row).unwrap();
    }
    IntegrityVerifier::new(IntegrityConfig::default(), store)
        .store_upload_hashes(upload_id)
        .unwrap();
}

/// A pending bounty for `artist`, backed by a real spike and window.
fn pending_bounty(store: &SmrStore, bounty_id: &str, artist: &str) {
    let heat_spike_id = store
        .insert_heat_spike(&HeatSpikeData {
            artist_id: artist.into(),
            upload_id: "U1".into(),
            detected_on: day(8),
            baseline_spins: 100,
            spike_spins: 250,
            multiplier: Decimal::new(250, 2),
            spike_start: day(1),
            spike_end: day(8),
            station_count: 1,
            postal_codes: vec!["100001".into()],
            threshold_met: true,
        })
        .unwrap();
    let window_id = store
        .insert_window(artist, heat_spike_id, day(8), NaiveDate::from_ymd_opt(2024, 6, 6).unwrap())
        .unwrap();
    let inserted = store
        .insert_bounty_transaction(&BountyTransaction {
            bounty_id: bounty_id.into(),
            royalty_transaction_id: format!("RTX-{bounty_id}"),
            artist_id: artist.into(),
            window_id,
            heat_spike_id,
            gross_fee: Decimal::new(10000, 2),
            bounty_pct: Decimal::new(25, 0),
            bounty_amount: Decimal::new(2500, 2),
            operating_pct: Decimal::new(75, 0),
            operating_amount: Decimal::new(7500, 2),
            geofence_matched: false,
            geofence_bonus_pct: Decimal::ZERO,
            geofence_bonus: Decimal::ZERO,
            geofence_zip: None,
            venue_id: None,
            provider_account_id: "provider-fallback".into(),
            currency: "NGN".into(),
            status: BountyStatus::Pending,
            created_at: noon(8),
            settled_at: None,
            reversed_at: None,
            reversal_reason: None,
            anchor_id: None,
        })
        .unwrap();
    assert!(inserted);
}

fn status_of(store: &SmrStore, bounty_id: &str) -> BountyStatus {
    store
        .get_bounty_transaction(bounty_id)
        .unwrap()
        .expect("bounty exists")
        .status
}

// ── Hashing ───────────────────────────────────────────────────────────────────

#[test]
fn hash_ignores_key_order_and_whitespace() {
    let a = json!({"artist_id": "A1", "station_id": "S1", "spin_count": 12, "track_title": "Essence"});
    let b = json!({"track_title": "  Essence ", "spin_count": 12, "station_id": "S1", "artist_id": "A1"});
    assert_eq!(
        hash_row(a.as_object().unwrap()),
        hash_row(b.as_object().unwrap()),
        "same logical content must hash identically"
    );
}

#[test]
fn hash_drops_null_and_empty_fields() {
    let with_nulls = json!({"artist_id": "A1", "station_id": "S1", "track_title": null, "note": ""});
    let without = json!({"artist_id": "A1", "station_id": "S1"});
    assert_eq!(
        hash_row(with_nulls.as_object().unwrap()),
        hash_row(without.as_object().unwrap())
    );
}

#[test]
fn any_field_change_changes_hash() {
    let row = spin("r1", "U1", "A1", "S1", 2, 12);
    let mut changed = row.clone();
    changed.spin_count = 13;
    assert_ne!(hash_spin(&row.content()), hash_spin(&changed.content()));

    let mut moved = row.clone();
    moved.station_id = "S2".into();
    assert_ne!(hash_spin(&row.content()), hash_spin(&moved.content()));
}

#[test]
fn row_and_upload_ids_are_not_hashed() {
    let a = spin("r1", "U1", "A1", "S1", 2, 12);
    let b = spin("r9", "U7", "A1", "S1", 2, 12);
    assert_eq!(hash_spin(&a.content()), hash_spin(&b.content()));
}

// ── Verify / store ────────────────────────────────────────────────────────────

#[test]
fn verify_matches_stored_hash() {
    let store = build();
    let row = spin("r1", "U1", "A1", "S1", 2, 12);
    ingest(&store, "U1", &[row.clone()]);
    let verifier = IntegrityVerifier::new(IntegrityConfig::default(), &store);

    assert!(verifier.verify("r1", &row.content()).unwrap());

    let mut edited = row.content();
    edited.spin_count = 40;
    assert!(
        !verifier.verify("r1", &edited).unwrap(),
        "edited content must not verify"
    );
}

#[test]
fn verify_is_false_without_stored_hash() {
    let store = build();
    store.insert_upload("U1", day(1)).unwrap();
    let row = spin("r1", "U1", "A1", "S1", 2, 12);
    store.insert_spin_row(&row).unwrap();

    let verifier = IntegrityVerifier::new(IntegrityConfig::default(), &store);
    assert!(!verifier.verify("r1", &row.content()).unwrap());
    assert!(!verifier.verify("missing", &row.content()).unwrap());
}

#[test]
fn store_hash_marks_row_verified() {
    let store = build();
    store.insert_upload("U1", day(1)).unwrap();
    let row = spin("r1", "U1", "A1", "S1", 2, 12);
    store.insert_spin_row(&row).unwrap();

    let verifier = IntegrityVerifier::new(IntegrityConfig::default(), &store);
    let hash = verifier.store_hash("r1", &row.content()).unwrap();

    let stored = store.get_spin_row("r1").unwrap().unwrap();
    assert_eq!(stored.row_hash.as_deref(), Some(hash.as_str()));
    assert!(stored.hash_verified);

    let err = verifier.store_hash("nope", &row.content()).unwrap_err();
    assert!(matches!(err, SmrError::RowNotFound { .. }));
}

// ── Duplicate scan ────────────────────────────────────────────────────────────

#[test]
fn replayed_payload_forms_duplicate_group() {
    let store = build();
    ingest(&store, "U1", &[spin("r1", "U1", "A1", "S1", 2, 12), spin("r2", "U1", "A2", "S1", 2, 5)]);
    ingest(&store, "U2", &[spin("r3", "U2", "A1", "S1", 2, 12)]);

    let verifier = IntegrityVerifier::new(IntegrityConfig::default(), &store);
    let groups = verifier.scan_for_duplicates().unwrap();

    assert_eq!(groups.len(), 1, "only the replayed row is duplicated");
    assert_eq!(groups[0].row_ids, vec!["r1".to_string(), "r3".to_string()]);
    assert_eq!(groups[0].upload_ids, vec!["U1".to_string(), "U2".to_string()]);
    assert_eq!(groups[0].artist_ids, vec!["A1".to_string()]);
}

#[test]
fn flagging_same_failure_twice_is_idempotent() {
    let store = build();
    ingest(&store, "U1", &[spin("r1", "U1", "A1", "S1", 2, 12)]);
    ingest(&store, "U2", &[spin("r2", "U2", "A1", "S1", 2, 12)]);
    let verifier = IntegrityVerifier::new(IntegrityConfig::default(), &store);
    let mut bank = RngBank::new(1);

    let group = verifier.scan_for_duplicates().unwrap().remove(0);
    let failure = CemeteryFailure::duplicate(&group);

    let first = verifier
        .flag_to_cemetery(&failure, day(8), bank.stream(ComponentSlot::Integrity))
        .unwrap();
    let second = verifier
        .flag_to_cemetery(&failure, day(9), bank.stream(ComponentSlot::Integrity))
        .unwrap();

    assert!(first.newly_flagged);
    assert!(!second.newly_flagged);
    assert_eq!(first.cemetery_id, second.cemetery_id);
    assert_eq!(store.cemetery_record_count().unwrap(), 1);

    let record = store.get_cemetery_record(&first.cemetery_id).unwrap().unwrap();
    assert_eq!(record.failure_type, FailureType::DuplicateHash);
    assert_eq!(record.status, CemeteryStatus::Flagged);
    assert_eq!(record.flagged_on, day(8));
}

// ── Tamper scan and quarantine ────────────────────────────────────────────────

#[test]
fn tampered_row_is_found() {
    let store = build();
    ingest(&store, "U1", &[spin("r1", "U1", "A1", "S1", 2, 12), spin("r2", "U1", "A1", "S2", 3, 7)]);
    store.set_row_hash("r2", "0000").unwrap();

    let verifier = IntegrityVerifier::new(IntegrityConfig::default(), &store);
    let findings = verifier.scan_for_tampering().unwrap();

    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].row.row_id, "r2");
    assert_eq!(findings[0].actual_hash, hash_spin(&findings[0].row.content()));

    let failure = CemeteryFailure::tamper(&findings[0]).unwrap();
    assert_eq!(failure.expected_hash.as_deref(), Some("0000"));
    assert_eq!(failure.data_snapshot["row_id"], "r2");
    assert_eq!(failure.data_snapshot["spin_count"], 7);
    assert_eq!(failure.upload_ids, vec!["U1".to_string()]);
}

#[test]
fn block_reverses_pending_bounties_for_touched_artists() {
    let store = build();
    ingest(&store, "U1", &[spin("r1", "U1", "A1", "S1", 2, 12)]);
    ingest(&store, "U2", &[spin("r2", "U2", "A2", "S1", 2, 30)]);
    pending_bounty(&store, "BTY-A1", "A1");
    pending_bounty(&store, "BTY-A2", "A2");

    let verifier = IntegrityVerifier::new(IntegrityConfig::default(), &store);
    let report = verifier.block_bounties_for_upload("U1", noon(9)).unwrap();

    assert_eq!(report.rows_flagged, 1);
    assert_eq!(report.bounties_reversed, 1);
    assert_eq!(status_of(&store, "BTY-A1"), BountyStatus::Reversed);
    assert_eq!(
        status_of(&store, "BTY-A2"),
        BountyStatus::Pending,
        "artists outside the upload are untouched"
    );

    let reversed = store.get_bounty_transaction("BTY-A1").unwrap().unwrap();
    assert_eq!(reversed.reversed_at, Some(noon(9)));
    assert_eq!(reversed.reversal_reason.as_deref(), Some("upload U1 quarantined"));
    assert_eq!(store.get_upload("U1").unwrap().unwrap().status, "quarantined");
    assert_eq!(
        store.get_spin_row("r1").unwrap().unwrap().integrity_status,
        IntegrityStatus::Flagged
    );
}

#[test]
fn block_unknown_upload_fails() {
    let store = build();
    let verifier = IntegrityVerifier::new(IntegrityConfig::default(), &store);
    let err = verifier.block_bounties_for_upload("U404", noon(9)).unwrap_err();
    assert!(matches!(err, SmrError::UploadNotFound { .. }));
}

#[test]
fn integrity_scan_quarantines_tampered_upload() {
    let store = build();
    ingest(&store, "U1", &[spin("r1", "U1", "A1", "S1", 2, 12)]);
    pending_bounty(&store, "BTY-A1", "A1");
    store.set_row_hash("r1", "ffff").unwrap();

    let verifier = IntegrityVerifier::new(IntegrityConfig::default(), &store);
    let mut bank = RngBank::new(5);
    let report = verifier
        .run_integrity_scan(day(9), noon(9), bank.stream(ComponentSlot::Integrity))
        .unwrap();

    assert_eq!(report.tampered_rows, 1);
    assert_eq!(report.newly_flagged.len(), 1);
    assert_eq!(report.blocked.len(), 1);
    assert_eq!(report.blocked[0].upload_id, "U1");
    assert!(report.failures.is_empty());
    assert_eq!(status_of(&store, "BTY-A1"), BountyStatus::Reversed);

    let record = store.get_cemetery_record(&report.newly_flagged[0]).unwrap().unwrap();
    assert_eq!(record.failure_type, FailureType::TamperMismatch);
    assert_eq!(record.data_snapshot["row_id"], "r1");
    assert_eq!(record.data_snapshot["upload_id"], "U1");

    // Quarantined rows drop out of later scans.
    let again = verifier
        .run_integrity_scan(day(10), noon(10), bank.stream(ComponentSlot::Integrity))
        .unwrap();
    assert_eq!(again.tampered_rows, 0);
    assert!(again.newly_flagged.is_empty());
    assert_eq!(store.cemetery_record_count().unwrap(), 1);
}

#[test]
fn integrity_scan_without_quarantine_only_flags() {
    let store = build();
    ingest(&store, "U1", &[spin("r1", "U1", "A1", "S1", 2, 12)]);
    ingest(&store, "U2", &[spin("r2", "U2", "A1", "S1", 2, 12)]);
    pending_bounty(&store, "BTY-A1", "A1");

    let config = IntegrityConfig {
        quarantine_on_flag: false,
    };
    let verifier = IntegrityVerifier::new(config, &store);
    let mut bank = RngBank::new(5);
    let report = verifier
        .run_integrity_scan(day(9), noon(9), bank.stream(ComponentSlot::Integrity))
        .unwrap();

    assert_eq!(report.duplicate_groups, 1);
    assert_eq!(report.newly_flagged.len(), 1);
    assert!(report.blocked.is_empty());
    assert_eq!(status_of(&store, "BTY-A1"), BountyStatus::Pending);
}

// ── Cemetery review ───────────────────────────────────────────────────────────

#[test]
fn cemetery_review_follows_lifecycle() {
    let store = build();
    ingest(&store, "U1", &[spin("r1", "U1", "A1", "S1", 2, 12)]);
    ingest(&store, "U2", &[spin("r2", "U2", "A1", "S1", 2, 12)]);
    let verifier = IntegrityVerifier::new(IntegrityConfig::default(), &store);
    let mut bank = RngBank::new(3);

    let group = verifier.scan_for_duplicates().unwrap().remove(0);
    let flagged = verifier
        .flag_to_cemetery(
            &CemeteryFailure::duplicate(&group),
            day(8),
            bank.stream(ComponentSlot::Integrity),
        )
        .unwrap();

    let reviewed = verifier
        .review_cemetery_record(&flagged.cemetery_id, CemeteryStatus::Reviewed, Some("radio re-report"), day(10))
        .unwrap();
    assert_eq!(reviewed.status, CemeteryStatus::Reviewed);
    assert_eq!(reviewed.reviewed_on, Some(day(10)));
    assert_eq!(reviewed.review_note.as_deref(), Some("radio re-report"));

    let resolved = verifier
        .review_cemetery_record(&flagged.cemetery_id, CemeteryStatus::FalsePositive, None, day(11))
        .unwrap();
    assert_eq!(resolved.status, CemeteryStatus::FalsePositive);

    let err = verifier
        .review_cemetery_record(&flagged.cemetery_id, CemeteryStatus::Reviewed, None, day(12))
        .unwrap_err();
    assert!(
        matches!(err, SmrError::InvalidTransition { .. }),
        "terminal records cannot be reopened, got {err}"
    );

    let err = verifier
        .review_cemetery_record("missing", CemeteryStatus::Resolved, None, day(12))
        .unwrap_err();
    assert!(matches!(err, SmrError::CemeteryRecordNotFound { .. }));
}

#[test]
fn failed_quarantine_is_retried_by_next_scan() {
    let disk = DiskStore::new();
    let store = with_stations(disk.open());
    ingest(&store, "U1", &[spin("r1", "U1", "A1", "S1", 2, 12)]);
    ingest(&store, "U2", &[spin("r2", "U2", "A1", "S1", 2, 12)]);
    pending_bounty(&store, "BTY-A1", "A1");

    disk.execute(
        "CREATE TRIGGER fail_flag BEFORE UPDATE OF integrity_status ON spin_row
         BEGIN SELECT RAISE(ABORT, 'transient storage failure'); END;",
    );
    let verifier = IntegrityVerifier::new(IntegrityConfig::default(), &store);
    let mut bank = RngBank::new(5);
    let first = verifier
        .run_integrity_scan(day(9), noon(9), bank.stream(ComponentSlot::Integrity))
        .unwrap();

    assert_eq!(first.newly_flagged.len(), 1, "the record is written");
    assert!(first.blocked.is_empty());
    let failed: Vec<_> = first.failures.iter().map(|(item, _)| item.as_str()).collect();
    assert_eq!(failed, vec!["U1", "U2"]);
    assert_eq!(status_of(&store, "BTY-A1"), BountyStatus::Pending);
    assert_eq!(store.get_upload("U1").unwrap().unwrap().status, "completed");

    disk.execute("DROP TRIGGER fail_flag;");
    let second = verifier
        .run_integrity_scan(day(10), noon(10), bank.stream(ComponentSlot::Integrity))
        .unwrap();

    assert!(second.newly_flagged.is_empty(), "the finding is already on file");
    let blocked: Vec<_> = second.blocked.iter().map(|b| b.upload_id.as_str()).collect();
    assert_eq!(blocked, vec!["U1", "U2"]);
    assert!(second.failures.is_empty());
    assert_eq!(status_of(&store, "BTY-A1"), BountyStatus::Reversed);
    for row_id in ["r1", "r2"] {
        assert_eq!(
            store.get_spin_row(row_id).unwrap().unwrap().integrity_status,
            IntegrityStatus::Flagged
        );
    }

    let third = verifier
        .run_integrity_scan(day(11), noon(11), bank.stream(ComponentSlot::Integrity))
        .unwrap();
    assert!(third.blocked.is_empty(), "quarantined uploads are not blocked again");
}

#[test]
fn false_positive_review_releases_the_upload() {
    let store = build();
    ingest(&store, "U1", &[spin("r1", "U1", "A1", "S1", 2, 12)]);
    ingest(&store, "U2", &[spin("r2", "U2", "A1", "S1", 2, 12)]);

    let verifier = IntegrityVerifier::new(IntegrityConfig::default(), &store);
    let mut bank = RngBank::new(5);
    let report = verifier
        .run_integrity_scan(day(9), noon(9), bank.stream(ComponentSlot::Integrity))
        .unwrap();
    assert_eq!(report.blocked.len(), 2);

    verifier
        .review_cemetery_record(&report.newly_flagged[0], CemeteryStatus::FalsePositive, Some("re-report"), day(10))
        .unwrap();

    for (upload_id, row_id) in [("U1", "r1"), ("U2", "r2")] {
        assert_eq!(store.get_upload(upload_id).unwrap().unwrap().status, "completed");
        assert_eq!(
            store.get_spin_row(row_id).unwrap().unwrap().integrity_status,
            IntegrityStatus::Clean
        );
    }

    // The same pair is found again but stays cleared.
    let again = verifier
        .run_integrity_scan(day(11), noon(11), bank.stream(ComponentSlot::Integrity))
        .unwrap();
    assert_eq!(again.duplicate_groups, 1);
    assert!(again.newly_flagged.is_empty());
    assert!(again.blocked.is_empty());
    assert_eq!(store.get_upload("U1").unwrap().unwrap().status, "completed");
}

#[test]
fn upload_held_by_another_record_stays_quarantined() {
    let store = build();
    ingest(&store, "U1", &[spin("r1", "U1", "A1", "S1", 2, 12), spin("r2", "U1", "A1", "S2", 3, 7)]);
    ingest(&store, "U2", &[spin("r3", "U2", "A1", "S1", 2, 12)]);
    store.set_row_hash("r2", "0000").unwrap();

    let verifier = IntegrityVerifier::new(IntegrityConfig::default(), &store);
    let mut bank = RngBank::new(5);
    let report = verifier
        .run_integrity_scan(day(9), noon(9), bank.stream(ComponentSlot::Integrity))
        .unwrap();
    assert_eq!(report.newly_flagged.len(), 2);

    let duplicate = report
        .newly_flagged
        .iter()
        .find(|id| {
            store.get_cemetery_record(id).unwrap().unwrap().failure_type == FailureType::DuplicateHash
        })
        .expect("duplicate record");
    verifier
        .review_cemetery_record(duplicate, CemeteryStatus::FalsePositive, None, day(10))
        .unwrap();

    assert_eq!(store.get_upload("U2").unwrap().unwrap().status, "completed");
    assert_eq!(
        store.get_spin_row("r3").unwrap().unwrap().integrity_status,
        IntegrityStatus::Clean
    );
    assert_eq!(
        store.get_upload("U1").unwrap().unwrap().status,
        "quarantined",
        "the tamper record still holds U1"
    );
    assert_eq!(
        store.get_spin_row("r1").unwrap().unwrap().integrity_status,
        IntegrityStatus::Flagged
    );
}
