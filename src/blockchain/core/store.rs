use crate::error::ChainError;
use crate::persistence::{InMemoryPersistence, Persistence};
use crate::transaction::Transaction;
use std::collections::HashMap;
use std::sync::Arc;

use super::chain::{Block, Sha256Hash, ZERO_HASH};
use super::validation::{check_link, verify_chain};

/// Owner of the chain. Blocks are shared out as `Arc`s so readers can hold a
/// snapshot without holding any lock on the store.
pub struct BlockStore {
    blocks: Vec<Arc<Block>>,
    by_hash: HashMap<Sha256Hash, usize>,
    persistence: Box<dyn Persistence>,
}

impl BlockStore {
    /// Create a store backed by an in-memory persistence backend, with genesis committed.
    pub fn new() -> Result<Self, ChainError> {
        Self::load(Box::new(InMemoryPersistence::new()))
    }

    /// Rebuild the chain from `persistence`, committing genesis when the
    /// backend is empty. The loaded chain is not verified here.
    pub fn load(persistence: Box<dyn Persistence>) -> Result<Self, ChainError> {
        let loaded = persistence.load_blocks()?;

        let mut store = BlockStore {
            blocks: Vec::with_capacity(loaded.len()),
            by_hash: HashMap::with_capacity(loaded.len()),
            persistence,
        };

        for block in loaded {
            store.by_hash.entry(block.hash).or_insert(store.blocks.len());
            store.blocks.push(Arc::new(block));
        }

        if store.blocks.is_empty() {
            store.genesis()?;
        } else {
            tracing::debug!(blocks = store.blocks.len(), "loaded chain from persistence");
        }

        Ok(store)
    }

    /// Commit block 0. Only valid on an empty store.
    pub fn genesis(&mut self) -> Result<Arc<Block>, ChainError> {
        if !self.blocks.is_empty() {
            return Err(self.invariant_violation(
                "Genesis block can only be applied to an empty chain.".to_string(),
            ));
        }
        let block = self.commit(Block::genesis())?;
        tracing::info!(hash = %block.hash_str(), "created genesis block");
        Ok(block)
    }

    /// Seal `transaction` with the given verdict on top of the current tail
    /// and persist it. The block timestamp is the transaction timestamp,
    /// clamped so it never precedes the tail's.
    pub fn append(
        &mut self,
        transaction: Transaction,
        is_anomalous: bool,
        anomaly_score: f64,
    ) -> Result<Arc<Block>, ChainError> {
        let (index, previous_hash, tail_timestamp) = match self.blocks.last() {
            Some(tail) => (tail.index + 1, tail.hash, tail.timestamp),
            None => {
                return Err(self.invariant_violation(
                    "Cannot append to a chain without a genesis block.".to_string(),
                ))
            }
        };

        let timestamp = transaction.timestamp.max(tail_timestamp);
        let block = Block::new(
            index,
            timestamp,
            transaction,
            is_anomalous,
            anomaly_score,
            previous_hash,
        );
        self.commit(block)
    }

    /// Checks `block` against the tail, persists it and only then makes it
    /// visible in memory. A persistence error leaves the store unchanged.
    fn commit(&mut self, block: Block) -> Result<Arc<Block>, ChainError> {
        let (expected_index, expected_previous) = match self.blocks.last() {
            Some(tail) => (tail.index + 1, tail.hash),
            None => (0, ZERO_HASH),
        };

        if let Err(reason) = check_link(&block, expected_index, &expected_previous) {
            return Err(self.invariant_violation(reason));
        }
        if !block.has_valid_hash() {
            return Err(self.invariant_violation(format!(
                "Block {} carries a hash that does not match its contents.",
                block.index
            )));
        }

        self.persistence.append_block(&block)?;

        let block = Arc::new(block);
        self.by_hash.insert(block.hash, self.blocks.len());
        self.blocks.push(block.clone());
        Ok(block)
    }

    fn invariant_violation(&self, reason: String) -> ChainError {
        tracing::error!(chain_len = self.blocks.len(), %reason, "block store invariant violated");
        ChainError::InvariantViolation(reason)
    }

    /// Re-walk the whole chain. Returns the first block whose digest or
    /// linkage fails as `IntegrityViolation`.
    pub fn verify(&self) -> Result<(), ChainError> {
        verify_chain(self.all())
    }

    pub fn get(&self, hash: &Sha256Hash) -> Option<Arc<Block>> {
        self.by_hash.get(hash).map(|&pos| self.blocks[pos].clone())
    }

    pub fn get_by_index(&self, index: u64) -> Option<Arc<Block>> {
        usize::try_from(index).ok().and_then(|i| self.blocks.get(i)).cloned()
    }

    /// Lazy traversal from genesis; every call starts over.
    pub fn all(&self) -> impl Iterator<Item = &Block> + '_ {
        self.blocks.iter().map(|b| b.as_ref())
    }

    /// The current chain as shared handles, for iteration outside the lock.
    pub fn snapshot(&self) -> Vec<Arc<Block>> {
        self.blocks.clone()
    }

    pub fn tip(&self) -> Option<Arc<Block>> {
        self.blocks.last().cloned()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
