//! Attribution windows: time-bounded bounty eligibility per heat spike.
//!
//! Design:
//!   - One window per heat spike, opened on the detection date and
//!     closing `window_days` later.
//!   - An artist may hold several active windows at once. Settlement
//!     always picks the most recently opened one, resolved at query time.
//!   - `active -> expired` (daily sweep) and `active -> claimed`
//!     (explicit) are both terminal.
//!   - Running totals only grow; reversals never shrink them.

use crate::{
    config::AttributionConfig,
    error::{SmrError, SmrResult},
    store::{AttributionWindow, SmrStore},
    types::{to_hundredths, HeatSpikeId, WindowId, WindowStatus},
};
use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;

pub struct AttributionWindowManager<'a> {
    config: AttributionConfig,
    store: &'a SmrStore,
}

impl<'a> AttributionWindowManager<'a> {
    pub fn new(config: AttributionConfig, store: &'a SmrStore) -> Self {
        Self { config, store }
    }

    pub fn create_window(
        &self,
        artist_id: &str,
        heat_spike_id: HeatSpikeId,
        spike_date: NaiveDate,
    ) -> SmrResult<WindowId> {
        let window_end = spike_date
            .checked_add_signed(Duration::days(self.config.window_days))
            .ok_or_else(|| {
                SmrError::Other(anyhow::anyhow!(
                    "window end out of range: {spike_date} + {}d",
                    self.config.window_days
                ))
            })?;
        let window_id = self
            .store
            .insert_window(artist_id, heat_spike_id, spike_date, window_end)?;
        log::info!(
            "Window {window_id} opened for {artist_id} ({spike_date} .. {window_end}, spike {heat_spike_id})"
        );
        Ok(window_id)
    }

    /// Most recently opened active window still inside its date range.
    pub fn get_active_window(
        &self,
        artist_id: &str,
        today: NaiveDate,
    ) -> SmrResult<Option<AttributionWindow>> {
        self.store.latest_active_window(artist_id, today)
    }

    pub fn has_active_window(&self, artist_id: &str, today: NaiveDate) -> SmrResult<bool> {
        self.store.has_active_window(artist_id, today)
    }

    /// Every active window for the artist, newest first. Audit view for
    /// artists whose spikes opened overlapping windows.
    pub fn overlapping_active_windows(
        &self,
        artist_id: &str,
        today: NaiveDate,
    ) -> SmrResult<Vec<AttributionWindow>> {
        self.store.active_windows(artist_id, today)
    }

    pub fn record_bounty_triggered(&self, window_id: WindowId, amount: Decimal) -> SmrResult<()> {
        if amount < Decimal::ZERO {
            return Err(SmrError::InvalidAmount(format!(
                "window totals never decrease (got {amount})"
            )));
        }
        let updated = self.store.add_window_bounty(window_id, to_hundredths(amount)?)?;
        if updated == 0 {
            return Err(SmrError::WindowNotFound { window_id });
        }
        log::debug!("Window {window_id}: +1 bounty, +{amount}");
        Ok(())
    }

    /// Daily sweep. Re-running on the same day changes nothing.
    pub fn expire_old_windows(&self, today: NaiveDate) -> SmrResult<usize> {
        let expired = self.store.expire_windows_before(today)?;
        if expired > 0 {
            log::info!("Expired {expired} attribution windows as of {today}");
        }
        Ok(expired)
    }

    pub fn mark_window_claimed(
        &self,
        window_id: WindowId,
        today: NaiveDate,
    ) -> SmrResult<AttributionWindow> {
        let window = self
            .store
            .get_window(window_id)?
            .ok_or(SmrError::WindowNotFound { window_id })?;
        if window.status != WindowStatus::Active || self.store.claim_window(window_id, today)? == 0 {
            return Err(SmrError::InvalidTransition {
                entity: "attribution_window",
                id: window_id.to_string(),
                from: window.status.to_string(),
                to: WindowStatus::Claimed.to_string(),
            });
        }
        log::info!("Window {window_id} claimed for {}", window.artist_id);
        self.store
            .get_window(window_id)?
            .ok_or(SmrError::WindowNotFound { window_id })
    }
}
