//! Ledger service: the single write path into the chain
//!
//! `submit` runs "assess → append → apply" while holding the detector mutex,
//! so block linkage and station statistics advance in exactly the order
//! transactions are committed. The store itself sits behind a `RwLock` that
//! only `submit` ever takes for writing.

use crate::anomaly::{AnomalyDetector, DetectorConfig, StationStats};
use crate::blockchain::{Block, BlockStore, Sha256Hash};
use crate::error::ChainError;
use crate::persistence::{InMemoryPersistence, Persistence};
use crate::query::QueryFacade;
use crate::transaction::Transaction;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct LedgerService {
    store: Arc<RwLock<BlockStore>>,
    detector: Arc<Mutex<AnomalyDetector>>,
}

impl LedgerService {
    /// Load the chain from `persistence`, refuse to open it if it fails
    /// verification, and rebuild detector statistics from its history.
    pub fn open(
        persistence: Box<dyn Persistence>,
        detector_config: DetectorConfig,
    ) -> Result<Self, ChainError> {
        detector_config.validate()?;

        let store = BlockStore::load(persistence)?;
        if let Err(e) = store.verify() {
            tracing::error!(error = %e, "persisted chain failed verification, refusing to open");
            return Err(e);
        }

        let mut detector = AnomalyDetector::new(detector_config);
        let mismatches = detector.replay(store.all());
        if mismatches > 0 {
            warn!(mismatches, "stored verdicts differ from current detector configuration");
        }

        info!(
            height = store.len(),
            stations = detector.station_count(),
            "ledger opened"
        );

        Ok(Self {
            store: Arc::new(RwLock::new(store)),
            detector: Arc::new(Mutex::new(detector)),
        })
    }

    /// Fresh ledger over an in-memory backend.
    pub fn in_memory(detector_config: DetectorConfig) -> Result<Self, ChainError> {
        Self::open(Box::new(InMemoryPersistence::new()), detector_config)
    }

    /// Score `transaction`, seal it into the next block and return the
    /// committed block. Detector statistics only advance once the block is
    /// durably appended.
    pub fn submit(&self, transaction: Transaction) -> Result<Arc<Block>, ChainError> {
        transaction.validate()?;

        let mut detector = self.detector.lock();
        let assessment = detector.assess(&transaction);
        let verdict = assessment.verdict;

        let block = self
            .store
            .write()
            .append(transaction, verdict.is_anomalous, verdict.score)?;
        detector.apply(assessment);
        drop(detector);

        if block.is_anomalous {
            warn!(
                index = block.index,
                station_id = %block.transaction.station_id,
                volume = block.transaction.volume_f64(),
                score = block.anomaly_score,
                "anomalous transaction committed"
            );
        } else {
            info!(
                index = block.index,
                station_id = %block.transaction.station_id,
                score = block.anomaly_score,
                "transaction committed"
            );
        }

        Ok(block)
    }

    /// Look up a committed block by its hash.
    pub fn status(&self, block_hash: &Sha256Hash) -> Result<Arc<Block>, ChainError> {
        self.store
            .read()
            .get(block_hash)
            .ok_or_else(|| ChainError::NotFound(format!("Block {} not found", hex::encode(block_hash))))
    }

    /// Re-verify the whole chain.
    pub fn chain_integrity(&self) -> Result<(), ChainError> {
        self.store.read().verify()
    }

    pub fn station_stats(&self, station_id: &str) -> Option<StationStats> {
        self.detector.lock().stats(station_id).cloned()
    }

    pub fn detector_config(&self) -> DetectorConfig {
        *self.detector.lock().config()
    }

    /// Read-only view over the same chain.
    pub fn query(&self) -> QueryFacade {
        QueryFacade::new(self.store.clone())
    }
}
