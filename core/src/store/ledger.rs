use super::{decimal_column, LedgerBalance, LedgerEntry, SmrStore};
use crate::{error::SmrResult, types::LedgerRole};
use chrono::NaiveDateTime;
use rusqlite::{params, OptionalExtension};

impl SmrStore {
    /// Atomic "add N to balance". Balances are never overwritten.
    pub fn credit_ledger(
        &self,
        account_id: &str,
        currency: &str,
        amount_minor: i64,
        at: NaiveDateTime,
    ) -> SmrResult<()> {
        self.conn.execute(
            "INSERT INTO ledger_balance (account_id, currency, balance_minor, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (account_id, currency) DO UPDATE
             SET balance_minor = balance_minor + excluded.balance_minor,
                 updated_at = excluded.updated_at",
            params![account_id, currency, amount_minor, at],
        )?;
        Ok(())
    }

    pub fn append_ledger_entry(
        &self,
        account_id: &str,
        currency: &str,
        amount_minor: i64,
        bounty_id: &str,
        role: LedgerRole,
        at: NaiveDateTime,
    ) -> SmrResult<()> {
        self.conn.execute(
            "INSERT INTO ledger_entry (account_id, currency, amount_minor, bounty_id, role, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![account_id, currency, amount_minor, bounty_id, role, at],
        )?;
        Ok(())
    }

    pub fn get_ledger_balance(
        &self,
        account_id: &str,
        currency: &str,
    ) -> SmrResult<Option<LedgerBalance>> {
        let balance = self
            .conn
            .query_row(
                "SELECT account_id, currency, balance_minor, updated_at
                 FROM ledger_balance WHERE account_id = ?1 AND currency = ?2",
                params![account_id, currency],
                |row| {
                    Ok(LedgerBalance {
                        account_id: row.get(0)?,
                        currency: row.get(1)?,
                        balance: decimal_column(row, 2)?,
                        updated_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(balance)
    }

    pub fn ledger_entries_for_bounty(&self, bounty_id: &str) -> SmrResult<Vec<LedgerEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT entry_id, account_id, currency, amount_minor, bounty_id, role, created_at
             FROM ledger_entry WHERE bounty_id = ?1
             ORDER BY entry_id ASC",
        )?;
        let rows = stmt
            .query_map(params![bounty_id], |row| {
                Ok(LedgerEntry {
                    entry_id: row.get(0)?,
                    account_id: row.get(1)?,
                    currency: row.get(2)?,
                    amount: decimal_column(row, 3)?,
                    bounty_id: row.get(4)?,
                    role: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn ledger_entry_count(&self) -> SmrResult<i64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM ledger_entry", [], |row| row.get(0))?;
        Ok(count)
    }
}
