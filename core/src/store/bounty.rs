use super::{decimal_column, BountyTransaction, ProviderContract, RoyaltyTransaction, SmrStore};
use crate::{
    error::SmrResult,
    types::{to_hundredths, BountyStatus},
};
use chrono::NaiveDateTime;
use rusqlite::{params, OptionalExtension};

const BOUNTY_COLUMNS: &str = "bounty_id, royalty_transaction_id, artist_id, window_id, heat_spike_id,
                              gross_fee_minor, bounty_pct_hundredths, bounty_amount_minor,
                              operating_pct_hundredths, operating_amount_minor, geofence_matched,
                              geofence_bonus_pct_hundredths, geofence_bonus_minor, geofence_zip,
                              venue_id, provider_account_id, currency, status, created_at,
                              settled_at, reversed_at, reversal_reason, anchor_id";

impl SmrStore {
    // ─────────────────────────────────────────────────────────────────
    // Royalty transactions (collaborator data)
    // ─────────────────────────────────────────────────────────────────

    pub fn insert_royalty_transaction(&self, tx: &RoyaltyTransaction) -> SmrResult<()> {
        let fee = to_hundredths(tx.gross_platform_fee)?;
        self.conn.execute(
            "INSERT INTO royalty_transaction
             (royalty_transaction_id, artist_id, gross_platform_fee_minor, currency, completed_on)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                tx.royalty_transaction_id,
                tx.artist_id,
                fee,
                tx.currency,
                tx.completed_on,
            ],
        )?;
        Ok(())
    }

    pub fn get_royalty_transaction(
        &self,
        royalty_transaction_id: &str,
    ) -> SmrResult<Option<RoyaltyTransaction>> {
        let tx = self
            .conn
            .query_row(
                "SELECT royalty_transaction_id, artist_id, gross_platform_fee_minor,
                        currency, completed_on
                 FROM royalty_transaction WHERE royalty_transaction_id = ?1",
                params![royalty_transaction_id],
                |row| {
                    Ok(RoyaltyTransaction {
                        royalty_transaction_id: row.get(0)?,
                        artist_id: row.get(1)?,
                        gross_platform_fee: decimal_column(row, 2)?,
                        currency: row.get(3)?,
                        completed_on: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(tx)
    }

    // ─────────────────────────────────────────────────────────────────
    // Provider contracts
    // ─────────────────────────────────────────────────────────────────

    pub fn insert_provider_contract(&self, contract: &ProviderContract) -> SmrResult<()> {
        self.conn.execute(
            "INSERT INTO provider_contract
             (contract_id, provider_account_id, status, is_preferred, partner_rank)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                contract.contract_id,
                contract.provider_account_id,
                contract.status,
                contract.is_preferred,
                contract.partner_rank,
            ],
        )?;
        Ok(())
    }

    /// Highest-ranked active, preferred provider account, if any.
    pub fn preferred_provider_account(&self) -> SmrResult<Option<String>> {
        let account = self
            .conn
            .query_row(
                "SELECT provider_account_id FROM provider_contract
                 WHERE status = 'active' AND is_preferred = 1
                 ORDER BY partner_rank DESC, contract_id ASC
                 LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(account)
    }

    // ─────────────────────────────────────────────────────────────────
    // Bounty transactions
    // ─────────────────────────────────────────────────────────────────

    /// Insert a pending bounty. The royalty transaction id is unique:
    /// returns false (and writes nothing) if a bounty already exists for it.
    pub fn insert_bounty_transaction(&self, b: &BountyTransaction) -> SmrResult<bool> {
        let gross = to_hundredths(b.gross_fee)?;
        let bounty_pct = to_hundredths(b.bounty_pct)?;
        let bounty_amount = to_hundredths(b.bounty_amount)?;
        let operating_pct = to_hundredths(b.operating_pct)?;
        let operating_amount = to_hundredths(b.operating_amount)?;
        let bonus_pct = to_hundredths(b.geofence_bonus_pct)?;
        let bonus = to_hundredths(b.geofence_bonus)?;
        let n = self.conn.execute(
            "INSERT INTO bounty_transaction
             (bounty_id, royalty_transaction_id, artist_id, window_id, heat_spike_id,
              gross_fee_minor, bounty_pct_hundredths, bounty_amount_minor,
              operating_pct_hundredths, operating_amount_minor, geofence_matched,
              geofence_bonus_pct_hundredths, geofence_bonus_minor, geofence_zip,
              venue_id, provider_account_id, currency, status, created_at,
              settled_at, reversed_at, reversal_reason, anchor_id)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23)
             ON CONFLICT (royalty_transaction_id) DO NOTHING",
            params![
                b.bounty_id,
                b.royalty_transaction_id,
                b.artist_id,
                b.window_id,
                b.heat_spike_id,
                gross,
                bounty_pct,
                bounty_amount,
                operating_pct,
                operating_amount,
                b.geofence_matched,
                bonus_pct,
                bonus,
                b.geofence_zip,
                b.venue_id,
                b.provider_account_id,
                b.currency,
                b.status,
                b.created_at,
                b.settled_at,
                b.reversed_at,
                b.reversal_reason,
                b.anchor_id,
            ],
        )?;
        Ok(n == 1)
    }

    pub fn bounty_id_for_royalty_transaction(
        &self,
        royalty_transaction_id: &str,
    ) -> SmrResult<Option<String>> {
        let id = self
            .conn
            .query_row(
                "SELECT bounty_id FROM bounty_transaction WHERE royalty_transaction_id = ?1",
                params![royalty_transaction_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    pub fn get_bounty_transaction(&self, bounty_id: &str) -> SmrResult<Option<BountyTransaction>> {
        let b = self
            .conn
            .query_row(
                &format!("SELECT {BOUNTY_COLUMNS} FROM bounty_transaction WHERE bounty_id = ?1"),
                params![bounty_id],
                Self::map_bounty_row,
            )
            .optional()?;
        Ok(b)
    }

    pub fn bounties_for_artist(&self, artist_id: &str) -> SmrResult<Vec<BountyTransaction>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {BOUNTY_COLUMNS} FROM bounty_transaction
             WHERE artist_id = ?1
             ORDER BY created_at ASC, bounty_id ASC"
        ))?;
        let rows = stmt
            .query_map(params![artist_id], Self::map_bounty_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count_bounties_with_status(&self, status: BountyStatus) -> SmrResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM bounty_transaction WHERE status = ?1",
            params![status],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// `pending -> settled`. Returns 0 if the bounty was not pending.
    pub fn mark_bounty_settled(&self, bounty_id: &str, settled_at: NaiveDateTime) -> SmrResult<usize> {
        let n = self.conn.execute(
            "UPDATE bounty_transaction SET status = 'settled', settled_at = ?1
             WHERE bounty_id = ?2 AND status = 'pending'",
            params![settled_at, bounty_id],
        )?;
        Ok(n)
    }

    /// `pending -> reversed`. Returns 0 if the bounty was not pending.
    pub fn mark_bounty_reversed(
        &self,
        bounty_id: &str,
        reversed_at: NaiveDateTime,
        reason: &str,
    ) -> SmrResult<usize> {
        let n = self.conn.execute(
            "UPDATE bounty_transaction
             SET status = 'reversed', reversed_at = ?1, reversal_reason = ?2
             WHERE bounty_id = ?3 AND status = 'pending'",
            params![reversed_at, reason, bounty_id],
        )?;
        Ok(n)
    }

    /// Reverse every pending bounty for the given artists.
    pub fn reverse_pending_bounties_for_artists(
        &self,
        artist_ids: &[String],
        reversed_at: NaiveDateTime,
        reason: &str,
    ) -> SmrResult<usize> {
        let mut stmt = self.conn.prepare(
            "UPDATE bounty_transaction
             SET status = 'reversed', reversed_at = ?1, reversal_reason = ?2
             WHERE artist_id = ?3 AND status = 'pending'",
        )?;
        let mut total = 0;
        for artist_id in artist_ids {
            total += stmt.execute(params![reversed_at, reason, artist_id])?;
        }
        Ok(total)
    }

    /// Settled bounties not yet folded into an anchor, sorted by id.
    pub fn settled_unanchored_bounty_ids(&self) -> SmrResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT bounty_id FROM bounty_transaction
             WHERE status = 'settled' AND anchor_id IS NULL
             ORDER BY bounty_id ASC",
        )?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    pub fn stamp_anchor(&self, bounty_ids: &[String], anchor_id: &str) -> SmrResult<usize> {
        let mut stmt = self.conn.prepare(
            "UPDATE bounty_transaction SET anchor_id = ?1
             WHERE bounty_id = ?2 AND anchor_id IS NULL",
        )?;
        let mut total = 0;
        for id in bounty_ids {
            total += stmt.execute(params![anchor_id, id])?;
        }
        Ok(total)
    }

    fn map_bounty_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<BountyTransaction> {
        Ok(BountyTransaction {
            bounty_id: row.get(0)?,
            royalty_transaction_id: row.get(1)?,
            artist_id: row.get(2)?,
            window_id: row.get(3)?,
            heat_spike_id: row.get(4)?,
            gross_fee: decimal_column(row, 5)?,
            bounty_pct: decimal_column(row, 6)?,
            bounty_amount: decimal_column(row, 7)?,
            operating_pct: decimal_column(row, 8)?,
            operating_amount: decimal_column(row, 9)?,
            geofence_matched: row.get(10)?,
            geofence_bonus_pct: decimal_column(row, 11)?,
            geofence_bonus: decimal_column(row, 12)?,
            geofence_zip: row.get(13)?,
            venue_id: row.get(14)?,
            provider_account_id: row.get(15)?,
            currency: row.get(16)?,
            status: row.get(17)?,
            created_at: row.get(18)?,
            settled_at: row.get(19)?,
            reversed_at: row.get(20)?,
            reversal_reason: row.get(21)?,
            anchor_id: row.get(22)?,
        })
    }
}
