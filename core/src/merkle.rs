//! Merkle batcher: a tamper-evident digest over a batch of identifiers.
//!
//! Items are sorted before hashing. Each leaf is SHA-256 of the item;
//! each parent is SHA-256 of its two children concatenated in sorted
//! order, so a proof needs no left/right flags. A level with an odd
//! number of nodes pairs its last node with itself.

use sha2::{Digest, Sha256};

pub fn hash_leaf(item: &str) -> String {
    format!("{:x}", Sha256::digest(item.as_bytes()))
}

pub fn hash_pair(a: &str, b: &str) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut hasher = Sha256::new();
    hasher.update(lo.as_bytes());
    hasher.update(hi.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct MerkleBatcher {
    /// levels[0] are the leaves; the last level holds the root.
    levels: Vec<Vec<String>>,
}

impl MerkleBatcher {
    pub fn new<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut sorted: Vec<String> = items.into_iter().map(|s| s.as_ref().to_string()).collect();
        sorted.sort();

        let leaves: Vec<String> = sorted.iter().map(|item| hash_leaf(item)).collect();
        let mut levels = Vec::new();
        if !leaves.is_empty() {
            levels.push(leaves);
        }
        while let Some(level) = levels.last().filter(|l| l.len() > 1) {
            let next = level
                .chunks(2)
                .map(|pair| hash_pair(&pair[0], pair.get(1).unwrap_or(&pair[0])))
                .collect();
            levels.push(next);
        }
        Self { levels }
    }

    /// `None` for an empty batch.
    pub fn root(&self) -> Option<&str> {
        self.levels
            .last()
            .and_then(|level| level.first())
            .map(String::as_str)
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    /// Sibling hashes from leaf to root, or `None` if the item is not
    /// in the batch.
    pub fn proof(&self, item: &str) -> Option<Vec<String>> {
        let leaf = hash_leaf(item);
        let mut index = self.levels.first()?.iter().position(|h| *h == leaf)?;
        let mut path = Vec::new();
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = if index % 2 == 0 {
                level.get(index + 1).unwrap_or(&level[index])
            } else {
                &level[index - 1]
            };
            path.push(sibling.clone());
            index /= 2;
        }
        Some(path)
    }
}

pub fn verify_proof(item: &str, proof: &[String], root: &str) -> bool {
    let computed = proof
        .iter()
        .fold(hash_leaf(item), |acc, sibling| hash_pair(&acc, sibling));
    computed == root
}
