//! Geofence matcher tests: venue postal code against spike coverage.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use smr_core::{
    config::GeofenceConfig,
    geofence::{GeofenceMatch, GeofenceMatcher},
    store::{HeatSpikeData, SmrStore, Venue},
    types::HeatSpikeId,
};

fn build() -> SmrStore {
    let store = SmrStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    for (id, zip) in [
        ("V-LAGOS", Some("100001")),
        ("V-SPACED", Some(" 100 271 ")),
        ("V-ABUJA", Some("900001")),
        ("V-NOZIP", None),
    ] {
        store
            .insert_venue(&Venue {
                venue_id: id.into(),
                name: format!("Venue {id}"),
                postal_code: zip.map(str::to_string),
            })
            .unwrap();
    }
    store
}

fn spike(store: &SmrStore, artist: &str, postal_codes: &[&str]) -> HeatSpikeId {
    let d = NaiveDate::from_ymd_opt(2024, 3, 8).unwrap();
    store
        .insert_heat_spike(&HeatSpikeData {
            artist_id: artist.into(),
            upload_id: "U1".into(),
            detected_on: d,
            baseline_spins: 100,
            spike_spins: 250,
            multiplier: Decimal::new(250, 2),
            spike_start: d,
            spike_end: d,
            station_count: postal_codes.len() as i64,
            postal_codes: postal_codes.iter().map(|c| c.to_string()).collect(),
            threshold_met: true,
        })
        .unwrap()
}

fn matcher(store: &SmrStore) -> GeofenceMatcher<'_> {
    GeofenceMatcher::new(GeofenceConfig::default(), store)
}

#[test]
fn venue_inside_coverage_matches() {
    let store = build();
    let spike_id = spike(&store, "A1", &["100001", "100271"]);

    let result = matcher(&store).check_match("A1", "V-LAGOS", spike_id).unwrap();
    assert_eq!(
        result,
        GeofenceMatch {
            matched: true,
            bonus_pct: Decimal::new(200, 2),
            matched_zip: Some("100001".into()),
        }
    );
}

#[test]
fn venue_code_is_normalized_before_comparison() {
    let store = build();
    let spike_id = spike(&store, "A1", &["100271"]);

    let result = matcher(&store).check_match("A1", "V-SPACED", spike_id).unwrap();
    assert!(result.matched);
    assert_eq!(result.matched_zip.as_deref(), Some("100271"));
}

#[test]
fn venue_outside_coverage_does_not_match() {
    let store = build();
    let spike_id = spike(&store, "A1", &["100001"]);

    let result = matcher(&store).check_match("A1", "V-ABUJA", spike_id).unwrap();
    assert_eq!(result, GeofenceMatch::unmatched());
}

#[test]
fn missing_data_forfeits_bonus_without_error() {
    let store = build();
    let spike_id = spike(&store, "A1", &["100001"]);
    let empty_spike = spike(&store, "A1", &[]);
    let m = matcher(&store);

    assert_eq!(m.check_match("A1", "V-NOZIP", spike_id).unwrap(), GeofenceMatch::unmatched());
    assert_eq!(m.check_match("A1", "V-UNKNOWN", spike_id).unwrap(), GeofenceMatch::unmatched());
    assert_eq!(m.check_match("A1", "V-LAGOS", 9999).unwrap(), GeofenceMatch::unmatched());
    assert_eq!(m.check_match("A1", "V-LAGOS", empty_spike).unwrap(), GeofenceMatch::unmatched());
}

#[test]
fn another_artists_spike_never_matches() {
    let store = build();
    let spike_id = spike(&store, "A2", &["100001"]);

    let result = matcher(&store).check_match("A1", "V-LAGOS", spike_id).unwrap();
    assert!(!result.matched);
}

#[test]
fn bonus_percentage_comes_from_config() {
    let store = build();
    let spike_id = spike(&store, "A1", &["100001"]);
    let config = GeofenceConfig {
        bonus_pct: Decimal::new(500, 2),
    };

    let result = GeofenceMatcher::new(config, &store)
        .check_match("A1", "V-LAGOS", spike_id)
        .unwrap();
    assert_eq!(result.bonus_pct, Decimal::new(500, 2));
}
