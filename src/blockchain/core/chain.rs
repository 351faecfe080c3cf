use crate::transaction::Transaction;
use sha2::{Digest, Sha256};

pub type Sha256Hash = [u8; 32];

/// Previous-hash value carried by the genesis block.
pub const ZERO_HASH: Sha256Hash = [0u8; 32];

/// Fixed genesis timestamp (2023-01-01T00:00:00Z) so every ledger shares block 0.
pub const GENESIS_TIMESTAMP: u64 = 1672531200000;

/// Domain tag prefixed to every block digest. Changing it (or the field
/// encoding below) invalidates every persisted chain.
const BLOCK_DOMAIN_TAG: &[u8] = b"gasledger/block/v1";

/// One ledger entry: a transaction, the detector's verdict on it and the
/// linkage to the previous entry.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp: u64,
    pub transaction: Transaction,
    pub is_anomalous: bool,
    pub anomaly_score: f64,
    pub previous_hash: Sha256Hash,
    pub hash: Sha256Hash,
}

impl Block {
    pub fn new(
        index: u64,
        timestamp: u64,
        transaction: Transaction,
        is_anomalous: bool,
        anomaly_score: f64,
        previous_hash: Sha256Hash,
    ) -> Self {
        let hash = Block::digest(
            index,
            timestamp,
            &transaction,
            is_anomalous,
            anomaly_score,
            &previous_hash,
        );

        Block {
            index,
            timestamp,
            transaction,
            is_anomalous,
            anomaly_score,
            previous_hash,
            hash,
        }
    }

    pub fn genesis() -> Self {
        Block::new(
            0,
            GENESIS_TIMESTAMP,
            Transaction::sentinel(GENESIS_TIMESTAMP),
            false,
            0.0,
            ZERO_HASH,
        )
    }

    /// SHA-256 over the canonical encoding of the block fields:
    /// tag, index, timestamp, transaction, verdict byte, score bits, previous hash.
    pub fn digest(
        index: u64,
        timestamp: u64,
        transaction: &Transaction,
        is_anomalous: bool,
        anomaly_score: f64,
        previous_hash: &Sha256Hash,
    ) -> Sha256Hash {
        let mut hasher = Sha256::new();
        hasher.update(BLOCK_DOMAIN_TAG);
        hasher.update(index.to_le_bytes());
        hasher.update(timestamp.to_le_bytes());
        transaction.write_canonical(&mut hasher);
        hasher.update([is_anomalous as u8]);
        hasher.update(anomaly_score.to_bits().to_le_bytes());
        hasher.update(previous_hash);
        hasher.finalize().into()
    }

    /// Recomputes the digest from the block's current field values.
    pub fn calculate_hash(&self) -> Sha256Hash {
        Block::digest(
            self.index,
            self.timestamp,
            &self.transaction,
            self.is_anomalous,
            self.anomaly_score,
            &self.previous_hash,
        )
    }

    pub fn has_valid_hash(&self) -> bool {
        self.calculate_hash() == self.hash
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    pub fn hash_str(&self) -> String {
        hex::encode(self.hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::Volume;

    fn sample_block() -> Block {
        let tx = Transaction::new("S1", Volume::from_num(100)).with_timestamp(1_700_000_000_000);
        Block::new(1, 1_700_000_000_000, tx, false, 0.5, Block::genesis().hash)
    }

    #[test]
    fn test_genesis_is_fixed() {
        let a = Block::genesis();
        let b = Block::genesis();
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.previous_hash, ZERO_HASH);
        assert!(a.transaction.is_sentinel());
        assert!(!a.is_anomalous);
        assert!(a.is_genesis());
    }

    #[test]
    fn test_hash_matches_recomputation() {
        let block = sample_block();
        assert!(block.has_valid_hash());
        assert_eq!(block.hash_str().len(), 64);
    }

    #[test]
    fn test_every_field_is_covered_by_hash() {
        let block = sample_block();

        let mut b = block.clone();
        b.index = 2;
        assert!(!b.has_valid_hash());

        let mut b = block.clone();
        b.timestamp += 1;
        assert!(!b.has_valid_hash());

        let mut b = block.clone();
        b.transaction.volume = Volume::from_num(101);
        assert!(!b.has_valid_hash());

        let mut b = block.clone();
        b.is_anomalous = true;
        assert!(!b.has_valid_hash());

        let mut b = block.clone();
        b.anomaly_score = 0.50001;
        assert!(!b.has_valid_hash());

        let mut b = block;
        b.previous_hash = ZERO_HASH;
        assert!(!b.has_valid_hash());
    }
}
