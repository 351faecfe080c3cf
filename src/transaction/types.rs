/// Transaction types for the gas ledger
use crate::error::ChainError;
use fixed::types::I32F32;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Gas volume. Fixed point so that the canonical byte encoding is exact.
pub type Volume = I32F32;

/// Maximum serialized transaction size in bytes (64KB) to keep blocks bounded
pub const MAX_TRANSACTION_SIZE: usize = 64 * 1024;

/// Maximum station identifier length in bytes
pub const MAX_STATION_ID_LEN: usize = 128;

/// A single gas-consumption reading reported by a compressor station.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Transaction {
    pub station_id: String,
    pub volume: Volume,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Transaction {
    /// Create a transaction stamped with the current wall-clock time.
    pub fn new(station_id: impl Into<String>, volume: Volume) -> Self {
        Transaction {
            station_id: station_id.into(),
            volume,
            timestamp: chrono::Utc::now().timestamp_millis().max(0) as u64,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Converts a floating point reading into a `Volume`, rejecting NaN,
    /// infinities and values outside the representable range.
    pub fn volume_from_f64(value: f64) -> Result<Volume, ChainError> {
        if !value.is_finite() {
            return Err(ChainError::InvalidTransaction(format!(
                "Volume must be a finite number, got {}",
                value
            )));
        }
        Volume::checked_from_num(value).ok_or_else(|| {
            ChainError::InvalidTransaction(format!("Volume {} is out of range", value))
        })
    }

    /// The empty payload carried by the genesis block.
    pub fn sentinel(timestamp: u64) -> Self {
        Transaction {
            station_id: String::new(),
            volume: Volume::ZERO,
            timestamp,
            metadata: BTreeMap::new(),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.station_id.is_empty() && self.volume == Volume::ZERO && self.metadata.is_empty()
    }

    pub fn volume_f64(&self) -> f64 {
        self.volume.to_num::<f64>()
    }

    /// Feeds the canonical encoding of this transaction into `hasher`.
    ///
    /// Field order and encoding are part of the persisted format: strings are
    /// length-prefixed (u64 LE), the volume is written as its raw fixed-point
    /// bits and metadata entries follow `BTreeMap` key order.
    pub fn write_canonical(&self, hasher: &mut Sha256) {
        update_len_prefixed(hasher, self.station_id.as_bytes());
        hasher.update(self.volume.to_le_bytes());
        hasher.update(self.timestamp.to_le_bytes());
        hasher.update((self.metadata.len() as u64).to_le_bytes());
        for (key, value) in &self.metadata {
            update_len_prefixed(hasher, key.as_bytes());
            update_len_prefixed(hasher, value.as_bytes());
        }
    }

    /// Digest of the transaction payload alone.
    pub fn hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"gasledger/tx/v1");
        self.write_canonical(&mut hasher);
        hasher.finalize().into()
    }

    pub fn hash_str(&self) -> String {
        hex::encode(self.hash())
    }
}

pub(crate) fn update_len_prefixed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}
