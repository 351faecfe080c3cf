/// Validation logic for transactions separated from type definitions
use crate::error::ChainError;
use crate::transaction::types::{Transaction, MAX_STATION_ID_LEN, MAX_TRANSACTION_SIZE};

impl Transaction {
    /// Stateless checks run before a reading is scored or committed.
    pub fn validate(&self) -> Result<(), ChainError> {
        if self.station_id.trim().is_empty() {
            return Err(ChainError::InvalidTransaction(
                "Station id cannot be empty".to_string(),
            ));
        }

        if self.station_id.len() > MAX_STATION_ID_LEN {
            return Err(ChainError::InvalidTransaction(format!(
                "Station id exceeds maximum length of {} bytes",
                MAX_STATION_ID_LEN
            )));
        }

        if self.volume.is_negative() {
            return Err(ChainError::InvalidTransaction(format!(
                "Gas volume must be non-negative, got {}",
                self.volume
            )));
        }

        self.validate_size()
    }

    /// Validate transaction size so oversized metadata cannot bloat the chain
    pub fn validate_size(&self) -> Result<(), ChainError> {
        let serialized = bincode::serialize(self)?;

        if serialized.len() > MAX_TRANSACTION_SIZE {
            return Err(ChainError::InvalidTransaction(format!(
                "Transaction too large: {} bytes (max: {})",
                serialized.len(),
                MAX_TRANSACTION_SIZE
            )));
        }
        Ok(())
    }
}
