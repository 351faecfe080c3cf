use crate::config::Config;
use crate::error::ChainError;
use crate::ledger::LedgerService;
use crate::persistence::Database;
use crate::query::QueryFacade;
use parking_lot::RwLock;
use std::fs;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum NodeState {
    Booting,
    Ready,
    /// The chain failed verification; reads still work, trust does not.
    Degraded,
}

pub struct Node {
    pub config: Config,
    pub ledger: LedgerService,
    pub state: Arc<RwLock<NodeState>>,
}

impl Node {
    /// Open the configured SQLite database, verify the chain and rebuild the
    /// detector. Storage errors are returned; there is no in-memory fallback
    /// for a ledger that must survive restarts.
    pub fn init(config: Config) -> Result<Self, ChainError> {
        info!(db = %config.database.path, "starting gas ledger node");

        // Ensure data directory (parent of DB path) exists
        let db_path = std::path::Path::new(&config.database.path);
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let db = Database::open(&config.database.path)?;
        let ledger = LedgerService::open(Box::new(db), config.detector)?;
        Ok(Self::with_ledger(config, ledger))
    }

    /// Wrap an already opened ledger (in-memory setups and tests).
    pub fn with_ledger(config: Config, ledger: LedgerService) -> Self {
        Self {
            config,
            ledger,
            state: Arc::new(RwLock::new(NodeState::Ready)),
        }
    }

    pub fn query(&self) -> QueryFacade {
        self.ledger.query()
    }

    pub fn state(&self) -> NodeState {
        *self.state.read()
    }

    /// Re-verify the chain and record the outcome in the node state.
    pub fn check_integrity(&self) -> Result<(), ChainError> {
        let result = self.ledger.chain_integrity();
        let next = match &result {
            Ok(()) => NodeState::Ready,
            Err(e) => {
                error!(error = %e, "chain integrity check failed");
                NodeState::Degraded
            }
        };
        *self.state.write() = next;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{Transaction, Volume};

    #[test]
    fn test_init_creates_database_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.database.path = dir
            .path()
            .join("nested/ledger.db")
            .to_string_lossy()
            .into_owned();

        let tip = {
            let node = Node::init(config.clone()).unwrap();
            assert_eq!(node.state(), NodeState::Ready);
            node.ledger
                .submit(Transaction::new("S1", Volume::from_num(10)).with_timestamp(1))
                .unwrap()
        };

        let node = Node::init(config).unwrap();
        assert_eq!(node.query().height(), 2);
        assert_eq!(node.query().tip().unwrap().hash, tip.hash);
        assert!(node.check_integrity().is_ok());
    }
}
