use super::{SettlementAnchor, SmrStore};
use crate::error::SmrResult;
use rusqlite::{params, OptionalExtension};

impl SmrStore {
    pub fn insert_settlement_anchor(&self, anchor: &SettlementAnchor) -> SmrResult<()> {
        self.conn.execute(
            "INSERT INTO settlement_anchor (anchor_id, merkle_root, leaf_count, anchored_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                anchor.anchor_id,
                anchor.merkle_root,
                anchor.leaf_count,
                anchor.anchored_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_settlement_anchor(&self, anchor_id: &str) -> SmrResult<Option<SettlementAnchor>> {
        let anchor = self
            .conn
            .query_row(
                "SELECT anchor_id, merkle_root, leaf_count, anchored_at
                 FROM settlement_anchor WHERE anchor_id = ?1",
                params![anchor_id],
                |row| {
                    Ok(SettlementAnchor {
                        anchor_id: row.get(0)?,
                        merkle_root: row.get(1)?,
                        leaf_count: row.get(2)?,
                        anchored_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(anchor)
    }

    /// Bounty ids folded into an anchor, sorted (the Merkle leaf order).
    pub fn bounty_ids_for_anchor(&self, anchor_id: &str) -> SmrResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT bounty_id FROM bounty_transaction WHERE anchor_id = ?1 ORDER BY bounty_id ASC",
        )?;
        let ids = stmt
            .query_map(params![anchor_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }
}
