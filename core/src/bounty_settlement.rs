//! Bounty settlement: fee split, provenance record, atomic ledger credit.
//!
//! Design:
//!   - Fixed split of the gross platform fee: 25% provider bounty,
//!     75% operating. Each side rounds independently to two places, so
//!     the two shares need not sum to the gross fee.
//!   - A geofence match adds round(bounty_share * bonus_pct / 100, 2) to
//!     the provider side only, folded into `bounty_amount`.
//!   - One bounty per royalty transaction, enforced by the store. A
//!     losing duplicate insert is a no-op returning the existing id.
//!   - Settlement is a single transaction: status flip, two ledger
//!     credits with journal entries, window totals. All or nothing.
//!   - A bounty whose heat spike was fed by quarantined rows is
//!     reversed, never settled. Quarantines elsewhere in the artist's
//!     history do not block it.
//!   - A bounty id already taken is redrawn from the same stream.

use crate::{
    attribution_window::AttributionWindowManager,
    config::{AttributionConfig, GeofenceConfig, SettlementConfig},
    error::{SmrError, SmrResult},
    geofence::{geofence_bonus, GeofenceMatch, GeofenceMatcher},
    merkle::MerkleBatcher,
    rng::ComponentRng,
    store::{BountyTransaction, SettlementAnchor, SmrStore},
    types::{round_money, to_hundredths, BountyId, BountyStatus, HeatSpikeId, LedgerRole, WindowId},
};
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Provider share of the gross platform fee, in percent.
pub const BOUNTY_SHARE_PCT: Decimal = Decimal::from_parts(25, 0, 0, false, 0);
/// Attempts at a free bounty id before giving up.
const MAX_ID_DRAWS: usize = 8;

/// Operating share of the gross platform fee, in percent.
pub const OPERATING_SHARE_PCT: Decimal = Decimal::from_parts(75, 0, 0, false, 0);

/// (bounty_share, operating_share), each rounded on its own.
pub fn split_fee(gross_fee: Decimal) -> (Decimal, Decimal) {
    (
        round_money(gross_fee * BOUNTY_SHARE_PCT / Decimal::ONE_HUNDRED),
        round_money(gross_fee * OPERATING_SHARE_PCT / Decimal::ONE_HUNDRED),
    )
}

/// Everything needed to record a bounty, computed without writes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BountyCalc {
    pub royalty_transaction_id: String,
    pub artist_id: String,
    pub window_id: WindowId,
    pub heat_spike_id: HeatSpikeId,
    pub gross_fee: Decimal,
    pub currency: String,
    pub bounty_pct: Decimal,
    /// Provider share before any geofence bonus.
    pub bounty_share: Decimal,
    pub operating_pct: Decimal,
    pub operating_amount: Decimal,
    pub geofence: GeofenceMatch,
    pub geofence_bonus: Decimal,
    /// bounty_share + geofence_bonus
    pub bounty_amount: Decimal,
    pub venue_id: Option<String>,
    pub provider_account_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordOutcome {
    pub bounty_id: BountyId,
    /// False when a bounty already existed for the royalty transaction.
    pub created: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SettleOutcome {
    Settled {
        bounty_id: BountyId,
        window_id: WindowId,
        currency: String,
        provider_account_id: String,
        bounty_amount: Decimal,
        operating_account_id: String,
        operating_amount: Decimal,
    },
    AlreadySettled {
        bounty_id: BountyId,
    },
    AlreadyReversed {
        bounty_id: BountyId,
    },
    /// Reversed instead of settled: the bounty's spike has quarantined data.
    Blocked {
        bounty_id: BountyId,
        reason: String,
    },
}

/// calculate -> record -> settle, as one payment-path call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TransactionOutcome {
    NotEligible {
        royalty_transaction_id: String,
    },
    Processed {
        bounty_id: BountyId,
        /// False when a retry found the bounty already recorded.
        created: bool,
        settlement: SettleOutcome,
    },
}

pub struct BountySettlementEngine<'a> {
    config: SettlementConfig,
    attribution: AttributionConfig,
    geofence: GeofenceConfig,
    store: &'a SmrStore,
}

impl<'a> BountySettlementEngine<'a> {
    pub fn new(
        config: SettlementConfig,
        attribution: AttributionConfig,
        geofence: GeofenceConfig,
        store: &'a SmrStore,
    ) -> Self {
        Self {
            config,
            attribution,
            geofence,
            store,
        }
    }

    fn windows<'s>(&self, store: &'s SmrStore) -> AttributionWindowManager<'s> {
        AttributionWindowManager::new(self.attribution.clone(), store)
    }

    /// `None` means not eligible: bounties disabled, unknown royalty
    /// transaction, or no active window for the artist.
    pub fn calculate_bounty(
        &self,
        royalty_transaction_id: &str,
        artist_id: &str,
        venue_id: Option<&str>,
        today: NaiveDate,
    ) -> SmrResult<Option<BountyCalc>> {
        if !self.config.bounties_enabled {
            log::debug!("Bounties disabled; {royalty_transaction_id} not eligible");
            return Ok(None);
        }

        let Some(tx) = self.store.get_royalty_transaction(royalty_transaction_id)? else {
            log::debug!("Royalty transaction {royalty_transaction_id} not found");
            return Ok(None);
        };
        if tx.artist_id != artist_id {
            log::warn!(
                "Royalty transaction {royalty_transaction_id} belongs to {}, not {artist_id}",
                tx.artist_id
            );
            return Ok(None);
        }

        let windows = self.windows(self.store);
        if !windows.has_active_window(artist_id, today)? {
            return Ok(None);
        }
        let Some(window) = windows.get_active_window(artist_id, today)? else {
            return Ok(None);
        };

        let (bounty_share, operating_amount) = split_fee(tx.gross_platform_fee);

        let geofence = match venue_id {
            Some(venue_id) => GeofenceMatcher::new(self.geofence.clone(), self.store)
                .check_match(artist_id, venue_id, window.heat_spike_id)?,
            None => GeofenceMatch::unmatched(),
        };
        let bonus = if geofence.matched {
            geofence_bonus(bounty_share, geofence.bonus_pct)
        } else {
            Decimal::ZERO
        };

        Ok(Some(BountyCalc {
            royalty_transaction_id: tx.royalty_transaction_id,
            artist_id: artist_id.to_string(),
            window_id: window.window_id,
            heat_spike_id: window.heat_spike_id,
            gross_fee: tx.gross_platform_fee,
            currency: tx.currency,
            bounty_pct: BOUNTY_SHARE_PCT,
            bounty_share,
            operating_pct: OPERATING_SHARE_PCT,
            operating_amount,
            geofence,
            geofence_bonus: bonus,
            bounty_amount: bounty_share + bonus,
            venue_id: venue_id.map(str::to_string),
            provider_account_id: self.resolve_provider_account()?,
        }))
    }

    /// Highest-ranked active preferred contract, else the configured default.
    pub fn resolve_provider_account(&self) -> SmrResult<String> {
        Ok(self
            .store
            .preferred_provider_account()?
            .unwrap_or_else(|| self.config.default_provider_account_id.clone()))
    }

    /// Persist a `pending` bounty with id `BTY-YYYYMMDD-XXXXXXXX`.
    /// A suffix already taken by another bounty is redrawn.
    pub fn record_bounty_transaction(
        &self,
        calc: &BountyCalc,
        now: NaiveDateTime,
        rng: &mut ComponentRng,
    ) -> SmrResult<RecordOutcome> {
        let mut bounty_id = format!("BTY-{}-{}", now.format("%Y%m%d"), rng.hex_suffix());
        let mut draws = 1;
        while self.store.get_bounty_transaction(&bounty_id)?.is_some() {
            if draws == MAX_ID_DRAWS {
                return Err(anyhow::anyhow!(
                    "no free bounty id for {} after {MAX_ID_DRAWS} draws",
                    calc.royalty_transaction_id
                )
                .into());
            }
            log::warn!("Bounty id {bounty_id} already taken, drawing another");
            bounty_id = format!("BTY-{}-{}", now.format("%Y%m%d"), rng.hex_suffix());
            draws += 1;
        }
        let bounty = BountyTransaction {
            bounty_id: bounty_id.clone(),
            royalty_transaction_id: calc.royalty_transaction_id.clone(),
            artist_id: calc.artist_id.clone(),
            window_id: calc.window_id,
            heat_spike_id: calc.heat_spike_id,
            gross_fee: calc.gross_fee,
            bounty_pct: calc.bounty_pct,
            bounty_amount: calc.bounty_amount,
            operating_pct: calc.operating_pct,
            operating_amount: calc.operating_amount,
            geofence_matched: calc.geofence.matched,
            geofence_bonus_pct: calc.geofence.bonus_pct,
            geofence_bonus: calc.geofence_bonus,
            geofence_zip: calc.geofence.matched_zip.clone(),
            venue_id: calc.venue_id.clone(),
            provider_account_id: calc.provider_account_id.clone(),
            currency: calc.currency.clone(),
            status: BountyStatus::Pending,
            created_at: now,
            settled_at: None,
            reversed_at: None,
            reversal_reason: None,
            anchor_id: None,
        };

        if self.store.insert_bounty_transaction(&bounty)? {
            log::info!(
                "Bounty {bounty_id} recorded for {} ({} {}, window {})",
                calc.artist_id,
                calc.bounty_amount,
                calc.currency,
                calc.window_id
            );
            return Ok(RecordOutcome {
                bounty_id,
                created: true,
            });
        }

        let existing = self
            .store
            .bounty_id_for_royalty_transaction(&calc.royalty_transaction_id)?
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "bounty for {} conflicted but is missing",
                    calc.royalty_transaction_id
                )
            })?;
        log::debug!(
            "Royalty transaction {} already has bounty {existing}",
            calc.royalty_transaction_id
        );
        Ok(RecordOutcome {
            bounty_id: existing,
            created: false,
        })
    }

    /// `pending -> settled` with both ledger credits and the window
    /// totals, in one transaction. Repeat calls are no-ops.
    pub fn settle_bounty(&self, bounty_id: &str, now: NaiveDateTime) -> SmrResult<SettleOutcome> {
        self.store
            .in_transaction(|store| self.settle_within(store, bounty_id, now))
    }

    /// `settle_bounty` against a transaction the caller already holds.
    /// A bounty whose own heat spike was fed by quarantined rows is
    /// reversed instead of paid.
    pub fn settle_within(
        &self,
        store: &SmrStore,
        bounty_id: &str,
        now: NaiveDateTime,
    ) -> SmrResult<SettleOutcome> {
        let bounty = store
            .get_bounty_transaction(bounty_id)?
            .ok_or_else(|| SmrError::BountyNotFound {
                bounty_id: bounty_id.to_string(),
            })?;
        let id = bounty.bounty_id.clone();

        match bounty.status {
            BountyStatus::Settled => {
                return Ok(SettleOutcome::AlreadySettled { bounty_id: id });
            }
            BountyStatus::Reversed => {
                return Ok(SettleOutcome::AlreadyReversed { bounty_id: id });
            }
            BountyStatus::Pending => {}
        }

        if store.spike_has_quarantined_rows(bounty.heat_spike_id)? {
            let reason = format!(
                "heat spike {} has quarantined spin data",
                bounty.heat_spike_id
            );
            store.mark_bounty_reversed(&id, now, &reason)?;
            log::warn!("Bounty {id} reversed at settlement: {reason}");
            return Ok(SettleOutcome::Blocked { bounty_id: id, reason });
        }

        if store.mark_bounty_settled(&id, now)? == 0 {
            return Ok(SettleOutcome::AlreadySettled { bounty_id: id });
        }

        let bounty_minor = to_hundredths(bounty.bounty_amount)?;
        let operating_minor = to_hundredths(bounty.operating_amount)?;
        let operating_account = self.config.operating_account_id.as_str();

        store.credit_ledger(&bounty.provider_account_id, &bounty.currency, bounty_minor, now)?;
        store.append_ledger_entry(
            &bounty.provider_account_id,
            &bounty.currency,
            bounty_minor,
            &id,
            LedgerRole::Provider,
            now,
        )?;
        store.credit_ledger(operating_account, &bounty.currency, operating_minor, now)?;
        store.append_ledger_entry(
            operating_account,
            &bounty.currency,
            operating_minor,
            &id,
            LedgerRole::Operating,
            now,
        )?;

        self.windows(store)
            .record_bounty_triggered(bounty.window_id, bounty.bounty_amount)?;

        log::info!(
            "Bounty {id} settled: {} {} to {}, {} to {operating_account}",
            bounty.bounty_amount,
            bounty.currency,
            bounty.provider_account_id,
            bounty.operating_amount
        );
        Ok(SettleOutcome::Settled {
            bounty_id: id,
            window_id: bounty.window_id,
            currency: bounty.currency,
            provider_account_id: bounty.provider_account_id,
            bounty_amount: bounty.bounty_amount,
            operating_account_id: operating_account.to_string(),
            operating_amount: bounty.operating_amount,
        })
    }

    /// Fold every settled, unanchored bounty id into a Merkle root and
    /// stamp the batch. `None` when there is nothing to anchor.
    pub fn anchor_settled_batch(
        &self,
        now: NaiveDateTime,
        rng: &mut ComponentRng,
    ) -> SmrResult<Option<SettlementAnchor>> {
        self.store
            .in_transaction(|store| self.anchor_within(store, now, rng))
    }

    pub fn anchor_within(
        &self,
        store: &SmrStore,
        now: NaiveDateTime,
        rng: &mut ComponentRng,
    ) -> SmrResult<Option<SettlementAnchor>> {
        let ids = store.settled_unanchored_bounty_ids()?;
        let batch = MerkleBatcher::new(ids.iter().map(String::as_str));
        let Some(root) = batch.root() else {
            return Ok(None);
        };

        let anchor = SettlementAnchor {
            anchor_id: format!("ANC-{}-{}", now.format("%Y%m%d"), rng.hex_suffix()),
            merkle_root: root.to_string(),
            leaf_count: batch.leaf_count() as i64,
            anchored_at: now,
        };
        store.insert_settlement_anchor(&anchor)?;
        let stamped = store.stamp_anchor(&ids, &anchor.anchor_id)?;
        log::info!(
            "Anchored {stamped} settled bounties as {} (root {})",
            anchor.anchor_id,
            anchor.merkle_root
        );
        Ok(Some(anchor))
    }
}
