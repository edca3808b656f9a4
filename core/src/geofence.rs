//! Geofence matcher: does the venue sit where the spike happened?
//!
//! A transaction's venue matches a heat spike when its postal code is
//! one of the postal codes of the stations that reported the spike.
//! Codes are compared after normalization (trimmed, uppercased, inner
//! whitespace removed). Any missing input means "no match", never an
//! error: the bonus is optional and settlement proceeds without it.

use crate::{
    config::GeofenceConfig,
    error::SmrResult,
    store::SmrStore,
    types::{round_money, HeatSpikeId},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeofenceMatch {
    pub matched: bool,
    /// Configured bonus percentage on a match, zero otherwise.
    pub bonus_pct: Decimal,
    pub matched_zip: Option<String>,
}

impl GeofenceMatch {
    pub fn unmatched() -> Self {
        Self {
            matched: false,
            bonus_pct: Decimal::ZERO,
            matched_zip: None,
        }
    }
}

pub fn normalize_postal_code(raw: &str) -> Option<String> {
    let code: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect();
    (!code.is_empty()).then_some(code)
}

/// round(bounty_share * bonus_pct / 100, 2)
pub fn geofence_bonus(bounty_share: Decimal, bonus_pct: Decimal) -> Decimal {
    round_money(bounty_share * bonus_pct / Decimal::ONE_HUNDRED)
}

pub struct GeofenceMatcher<'a> {
    config: GeofenceConfig,
    store: &'a SmrStore,
}

impl<'a> GeofenceMatcher<'a> {
    pub fn new(config: GeofenceConfig, store: &'a SmrStore) -> Self {
        Self { config, store }
    }

    pub fn check_match(
        &self,
        artist_id: &str,
        venue_id: &str,
        heat_spike_id: HeatSpikeId,
    ) -> SmrResult<GeofenceMatch> {
        let Some(venue_zip) = self
            .store
            .venue_postal_code(venue_id)?
            .as_deref()
            .and_then(normalize_postal_code)
        else {
            log::debug!("Venue {venue_id} has no postal code; no geofence match");
            return Ok(GeofenceMatch::unmatched());
        };

        let Some(spike) = self.store.get_heat_spike(heat_spike_id)? else {
            return Ok(GeofenceMatch::unmatched());
        };
        if spike.data.artist_id != artist_id {
            log::warn!(
                "Heat spike {heat_spike_id} belongs to {}, not {artist_id}",
                spike.data.artist_id
            );
            return Ok(GeofenceMatch::unmatched());
        }

        let hit = spike
            .data
            .postal_codes
            .iter()
            .filter_map(|code| normalize_postal_code(code))
            .any(|code| code == venue_zip);

        if !hit {
            return Ok(GeofenceMatch::unmatched());
        }

        log::info!("Geofence match for {artist_id}: venue {venue_id} in {venue_zip}");
        Ok(GeofenceMatch {
            matched: true,
            bonus_pct: self.config.bonus_pct,
            matched_zip: Some(venue_zip),
        })
    }
}
