//! Read-only access to chain state for the API layer

use crate::blockchain::{Block, BlockStore, Sha256Hash};
use crate::error::ChainError;
use parking_lot::RwLock;
use std::sync::Arc;

/// Handles to every block committed at the moment the snapshot was taken.
/// Iterating never touches the store lock, and can be repeated.
#[derive(Debug, Clone)]
pub struct ChainSnapshot {
    blocks: Vec<Arc<Block>>,
}

impl ChainSnapshot {
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Block> + '_ {
        self.blocks.iter().map(|b| b.as_ref())
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Block> {
        self.blocks.get(index).map(|b| b.as_ref())
    }
}

impl IntoIterator for ChainSnapshot {
    type Item = Arc<Block>;
    type IntoIter = std::vec::IntoIter<Arc<Block>>;

    fn into_iter(self) -> Self::IntoIter {
        self.blocks.into_iter()
    }
}

/// Read side of the ledger. Holds no write capability: every append goes
/// through `LedgerService::submit`.
#[derive(Clone)]
pub struct QueryFacade {
    store: Arc<RwLock<BlockStore>>,
}

impl QueryFacade {
    pub(crate) fn new(store: Arc<RwLock<BlockStore>>) -> Self {
        Self { store }
    }

    pub fn list_chain(&self) -> ChainSnapshot {
        ChainSnapshot {
            blocks: self.store.read().snapshot(),
        }
    }

    pub fn get_block(&self, hash: &Sha256Hash) -> Result<Arc<Block>, ChainError> {
        self.store
            .read()
            .get(hash)
            .ok_or_else(|| ChainError::NotFound(format!("Block {} not found", hex::encode(hash))))
    }

    pub fn get_block_by_index(&self, index: u64) -> Result<Arc<Block>, ChainError> {
        self.store
            .read()
            .get_by_index(index)
            .ok_or_else(|| ChainError::NotFound(format!("Block at index {} not found", index)))
    }

    /// Number of committed blocks, genesis included.
    pub fn height(&self) -> u64 {
        self.store.read().len() as u64
    }

    pub fn tip(&self) -> Option<Arc<Block>> {
        self.store.read().tip()
    }
}
