//! Heat spike detector: flags abnormal airplay momentum per artist.
//!
//! For an upload dated D and each artist it carries:
//!   baseline   = spins in [D - 15, D - 8]
//!   spike      = spins in [D, D + 7]
//!   multiplier = round(spike / baseline, 2)
//! A spike is declared when multiplier >= threshold. A zero baseline
//! never declares: an artist's first appearance cannot trigger a spike.
//!
//! Each declared spike is a new immutable row, even when a later upload
//! re-detects the same surge. Per-artist failures are isolated.

use crate::{
    config::DetectionConfig,
    error::{SmrError, SmrResult},
    geofence::normalize_postal_code,
    store::{HeatSpike, HeatSpikeData, SmrStore},
    types::{round_money, HeatSpikeId},
};
use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// round(spike / baseline, 2), or None when the baseline is not positive.
pub fn spike_multiplier(spike_spins: i64, baseline_spins: i64) -> Option<Decimal> {
    if baseline_spins <= 0 {
        return None;
    }
    Decimal::from(spike_spins)
        .checked_div(Decimal::from(baseline_spins))
        .map(round_money)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SpikeOutcome {
    NoBaseline {
        artist_id: String,
        spike_spins: i64,
    },
    BelowThreshold {
        artist_id: String,
        multiplier: Decimal,
    },
    Spike(HeatSpikeData),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionReport {
    pub upload_id: String,
    pub spikes: Vec<HeatSpike>,
    pub below_threshold: Vec<String>,
    pub no_baseline: Vec<String>,
    /// (artist_id, error) for artists whose detection failed.
    pub failures: Vec<(String, String)>,
}

pub struct HeatSpikeDetector<'a> {
    config: DetectionConfig,
    store: &'a SmrStore,
}

impl<'a> HeatSpikeDetector<'a> {
    pub fn new(config: DetectionConfig, store: &'a SmrStore) -> Self {
        Self { config, store }
    }

    pub fn baseline_range(&self, upload_date: NaiveDate) -> SmrResult<(NaiveDate, NaiveDate)> {
        Ok((
            shift(upload_date, -self.config.baseline_start_days)?,
            shift(upload_date, -self.config.baseline_end_days)?,
        ))
    }

    pub fn spike_range(&self, upload_date: NaiveDate) -> SmrResult<(NaiveDate, NaiveDate)> {
        Ok((upload_date, shift(upload_date, self.config.spike_window_days)?))
    }

    /// Measure one artist around an upload date. No writes.
    pub fn evaluate_artist(
        &self,
        artist_id: &str,
        upload_id: &str,
        upload_date: NaiveDate,
        today: NaiveDate,
    ) -> SmrResult<SpikeOutcome> {
        let (base_from, base_to) = self.baseline_range(upload_date)?;
        let (spike_from, spike_to) = self.spike_range(upload_date)?;

        let baseline_spins = self.store.sum_spins(artist_id, base_from, base_to)?;
        let spike_spins = self.store.sum_spins(artist_id, spike_from, spike_to)?;

        let Some(multiplier) = spike_multiplier(spike_spins, baseline_spins) else {
            return Ok(SpikeOutcome::NoBaseline {
                artist_id: artist_id.to_string(),
                spike_spins,
            });
        };

        if multiplier < self.config.spike_threshold {
            return Ok(SpikeOutcome::BelowThreshold {
                artist_id: artist_id.to_string(),
                multiplier,
            });
        }

        let stations = self.store.reporting_stations(artist_id, spike_from, spike_to)?;
        let postal_codes: BTreeSet<String> = stations
            .iter()
            .filter_map(|(_, code)| code.as_deref().and_then(normalize_postal_code))
            .collect();

        Ok(SpikeOutcome::Spike(HeatSpikeData {
            artist_id: artist_id.to_string(),
            upload_id: upload_id.to_string(),
            detected_on: today,
            baseline_spins,
            spike_spins,
            multiplier,
            spike_start: spike_from,
            spike_end: spike_to,
            station_count: stations.len() as i64,
            postal_codes: postal_codes.into_iter().collect(),
            threshold_met: true,
        }))
    }

    /// Single insert; never updates an existing spike.
    pub fn record_heat_spike(&self, data: &HeatSpikeData) -> SmrResult<HeatSpikeId> {
        let id = self.store.insert_heat_spike(data)?;
        log::info!(
            "Heat spike {id} for artist {} ({}x over {} baseline spins, {} stations)",
            data.artist_id,
            data.multiplier,
            data.baseline_spins,
            data.station_count
        );
        Ok(id)
    }

    /// Scan every artist in a completed upload.
    pub fn detect_for_upload(&self, upload_id: &str, today: NaiveDate) -> SmrResult<DetectionReport> {
        let upload = self
            .store
            .get_upload(upload_id)?
            .ok_or_else(|| SmrError::UploadNotFound {
                upload_id: upload_id.to_string(),
            })?;
        let artists = self.store.artists_in_upload(upload_id)?;

        let mut report = DetectionReport {
            upload_id: upload_id.to_string(),
            ..DetectionReport::default()
        };

        for artist_id in artists {
            let recorded = self
                .evaluate_artist(&artist_id, upload_id, upload.uploaded_on, today)
                .and_then(|outcome| match outcome {
                    SpikeOutcome::Spike(data) => {
                        let heat_spike_id = self.record_heat_spike(&data)?;
                        Ok(Ok(HeatSpike { heat_spike_id, data }))
                    }
                    other => Ok(Err(other)),
                });

            match recorded {
                Ok(Ok(spike)) => report.spikes.push(spike),
                Ok(Err(SpikeOutcome::BelowThreshold { multiplier, .. })) => {
                    log::debug!("Artist {artist_id}: {multiplier}x is below threshold");
                    report.below_threshold.push(artist_id);
                }
                Ok(Err(_)) => {
                    log::debug!("Artist {artist_id}: no baseline, spike not declared");
                    report.no_baseline.push(artist_id);
                }
                Err(e) => {
                    log::warn!("Detection failed for artist {artist_id}: {e}");
                    report.failures.push((artist_id, e.to_string()));
                }
            }
        }

        Ok(report)
    }
}

fn shift(date: NaiveDate, days: i64) -> SmrResult<NaiveDate> {
    date.checked_add_signed(Duration::days(days))
        .ok_or_else(|| SmrError::Other(anyhow::anyhow!("date out of range: {date} + {days}d")))
}
