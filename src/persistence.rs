//! Database persistence layer for the gas ledger

use crate::blockchain::{Block, Sha256Hash};
use crate::error::ChainError;
use crate::transaction::{Transaction, Volume};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Abstraction for persistence backends. Implementations must make an
/// appended block durable before returning and hand blocks back in index order.
pub trait Persistence: Send + Sync {
    fn append_block(&self, block: &Block) -> Result<(), ChainError>;
    fn load_blocks(&self) -> Result<Vec<Block>, ChainError>;
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &str) -> Result<Self, ChainError> {
        let conn = Connection::open(path)
            .map_err(|e| ChainError::StorageFailure(format!("Failed to open database: {}", e)))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, ChainError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ChainError::StorageFailure(format!("Failed to open database: {}", e)))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, ChainError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS blocks (
                idx INTEGER PRIMARY KEY,
                hash BLOB NOT NULL UNIQUE,
                previous_hash BLOB NOT NULL,
                timestamp INTEGER NOT NULL,
                station_id TEXT NOT NULL,
                volume_bits INTEGER NOT NULL,
                tx_timestamp INTEGER NOT NULL,
                metadata TEXT NOT NULL,
                is_anomalous INTEGER NOT NULL,
                anomaly_score REAL NOT NULL
            )",
            [],
        )
        .map_err(|e| ChainError::StorageFailure(format!("Failed to create blocks table: {}", e)))?;

        Ok(Database { conn: Mutex::new(conn) })
    }

    /// Inserts one block. Plain INSERT: an existing index or hash is an error,
    /// the table is append-only.
    pub fn append_block(&self, block: &Block) -> Result<(), ChainError> {
        let metadata_json = serde_json::to_string(&block.transaction.metadata).map_err(|e| {
            ChainError::StorageFailure(format!("Failed to serialize metadata: {}", e))
        })?;

        let conn = self.conn.lock().map_err(|_| ChainError::StorageFailure("Mutex poisoned".to_string()))?;
        conn.execute(
            "INSERT INTO blocks (idx, hash, previous_hash, timestamp, station_id, volume_bits, tx_timestamp, metadata, is_anomalous, anomaly_score)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                block.index as i64,
                block.hash.to_vec(),
                block.previous_hash.to_vec(),
                block.timestamp as i64,
                block.transaction.station_id,
                block.transaction.volume.to_bits(),
                block.transaction.timestamp as i64,
                metadata_json,
                block.is_anomalous,
                block.anomaly_score,
            ],
        )
        .map_err(|e| ChainError::StorageFailure(format!("Failed to save block {}: {}", block.index, e)))?;

        Ok(())
    }

    pub fn load_blocks(&self) -> Result<Vec<Block>, ChainError> {
        let conn = self.conn.lock().map_err(|_| ChainError::StorageFailure("Mutex poisoned".to_string()))?;
        let mut stmt = conn
            .prepare(
                "SELECT idx, hash, previous_hash, timestamp, station_id, volume_bits, tx_timestamp, metadata, is_anomalous, anomaly_score
                 FROM blocks ORDER BY idx ASC",
            )
            .map_err(|e| ChainError::StorageFailure(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(BlockRow {
                    index: row.get(0)?,
                    hash: row.get(1)?,
                    previous_hash: row.get(2)?,
                    timestamp: row.get(3)?,
                    station_id: row.get(4)?,
                    volume_bits: row.get(5)?,
                    tx_timestamp: row.get(6)?,
                    metadata: row.get(7)?,
                    is_anomalous: row.get(8)?,
                    anomaly_score: row.get(9)?,
                })
            })
            .map_err(|e| ChainError::StorageFailure(format!("Failed to query blocks: {}", e)))?;

        let mut blocks = Vec::new();
        for row in rows {
            let row = row.map_err(|e| ChainError::StorageFailure(format!("Failed to read block: {}", e)))?;
            blocks.push(row.into_block()?);
        }

        Ok(blocks)
    }
}

/// Raw column values of one `blocks` row.
struct BlockRow {
    index: i64,
    hash: Vec<u8>,
    previous_hash: Vec<u8>,
    timestamp: i64,
    station_id: String,
    volume_bits: i64,
    tx_timestamp: i64,
    metadata: String,
    is_anomalous: bool,
    anomaly_score: f64,
}

impl BlockRow {
    fn into_block(self) -> Result<Block, ChainError> {
        let metadata: BTreeMap<String, String> = serde_json::from_str(&self.metadata).map_err(|e| {
            ChainError::StorageFailure(format!("Failed to deserialize metadata of block {}: {}", self.index, e))
        })?;

        // Stored values are taken as-is, never re-hashed here: verification
        // is what detects rows edited behind the ledger's back.
        Ok(Block {
            index: self.index as u64,
            timestamp: self.timestamp as u64,
            transaction: Transaction {
                station_id: self.station_id,
                volume: Volume::from_bits(self.volume_bits),
                timestamp: self.tx_timestamp as u64,
                metadata,
            },
            is_anomalous: self.is_anomalous,
            anomaly_score: self.anomaly_score,
            previous_hash: to_hash(&self.previous_hash, self.index)?,
            hash: to_hash(&self.hash, self.index)?,
        })
    }
}

fn to_hash(bytes: &[u8], index: i64) -> Result<Sha256Hash, ChainError> {
    bytes.try_into().map_err(|_| {
        ChainError::StorageFailure(format!(
            "Block {} has a {}-byte hash column, expected 32",
            index,
            bytes.len()
        ))
    })
}

// Implement the Persistence trait for the rusqlite-backed Database
impl Persistence for Database {
    fn append_block(&self, block: &Block) -> Result<(), ChainError> {
        Database::append_block(self, block)
    }

    fn load_blocks(&self) -> Result<Vec<Block>, ChainError> {
        Database::load_blocks(self)
    }
}

/// Simple in-memory persistence implementation useful for tests and ephemeral runs.
/// Clones share the same underlying storage.
#[derive(Clone, Default)]
pub struct InMemoryPersistence {
    pub blocks: Arc<Mutex<Vec<Block>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Persistence for InMemoryPersistence {
    fn append_block(&self, block: &Block) -> Result<(), ChainError> {
        let mut blocks = self.blocks.lock().map_err(|_| ChainError::StorageFailure("Mutex poisoned".to_string()))?;
        if block.index != blocks.len() as u64 {
            return Err(ChainError::StorageFailure(format!(
                "Out-of-order append: block {} offered at position {}",
                block.index,
                blocks.len()
            )));
        }
        blocks.push(block.clone());
        Ok(())
    }

    fn load_blocks(&self) -> Result<Vec<Block>, ChainError> {
        let blocks = self.blocks.lock().map_err(|_| ChainError::StorageFailure("Mutex poisoned".to_string()))?;
        Ok(blocks.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block(index: u64, previous_hash: Sha256Hash) -> Block {
        let tx = Transaction::new("S1", Volume::from_num(101.25))
            .with_timestamp(1_700_000_000_000 + index)
            .with_metadata("unit", "m3")
            .with_metadata("shift", "day");
        Block::new(index, 1_700_000_000_000 + index, tx, index % 2 == 0, 1.0 / 3.0, previous_hash)
    }

    #[test]
    fn test_database_open() {
        let db = Database::open(":memory:").unwrap();
        assert!(db.conn.lock().unwrap().is_autocommit());
        assert!(db.load_blocks().unwrap().is_empty());
    }

    #[test]
    fn test_blocks_come_back_unchanged() {
        let db = Database::open_in_memory().unwrap();
        let genesis = Block::genesis();
        let first = sample_block(1, genesis.hash);
        db.append_block(&genesis).unwrap();
        db.append_block(&first).unwrap();

        let loaded = db.load_blocks().unwrap();
        assert_eq!(loaded, vec![genesis, first]);
        assert!(loaded.iter().all(Block::has_valid_hash));
    }

    #[test]
    fn test_database_rejects_duplicate_index() {
        let db = Database::open_in_memory().unwrap();
        let genesis = Block::genesis();
        db.append_block(&genesis).unwrap();
        assert!(matches!(db.append_block(&genesis), Err(ChainError::StorageFailure(_))));
    }

    #[test]
    fn test_in_memory_shared_between_clones() {
        let store = InMemoryPersistence::new();
        let handle = store.clone();
        store.append_block(&Block::genesis()).unwrap();
        assert_eq!(handle.load_blocks().unwrap().len(), 1);
    }

    #[test]
    fn test_in_memory_rejects_out_of_order() {
        let store = InMemoryPersistence::new();
        let block = sample_block(3, [0u8; 32]);
        assert!(store.append_block(&block).is_err());
    }
}
