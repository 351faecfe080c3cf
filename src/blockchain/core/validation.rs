use crate::error::ChainError;

use super::chain::{Block, Sha256Hash, ZERO_HASH};

/// Walks a chain from genesis and reports the first block whose digest or
/// linkage does not hold. Read-only; safe to call repeatedly.
pub fn verify_chain<'a, I>(blocks: I) -> Result<(), ChainError>
where
    I: IntoIterator<Item = &'a Block>,
{
    let mut expected_previous = ZERO_HASH;

    for (position, block) in blocks.into_iter().enumerate() {
        let position = position as u64;
        if let Err(reason) = check_link(block, position, &expected_previous) {
            return Err(ChainError::IntegrityViolation {
                index: position,
                reason,
            });
        }

        let recomputed = block.calculate_hash();
        if recomputed != block.hash {
            return Err(ChainError::IntegrityViolation {
                index: position,
                reason: format!(
                    "Hash mismatch. Stored {}, recomputed {}.",
                    hex::encode(block.hash),
                    hex::encode(recomputed)
                ),
            });
        }

        expected_previous = block.hash;
    }

    Ok(())
}

/// Checks that `block` sits at `expected_index` directly after a block whose
/// hash is `expected_previous`.
pub fn check_link(
    block: &Block,
    expected_index: u64,
    expected_previous: &Sha256Hash,
) -> Result<(), String> {
    if block.index != expected_index {
        return Err(format!(
            "Invalid block index. Expected {}, but got {}.",
            expected_index, block.index
        ));
    }

    if &block.previous_hash != expected_previous {
        return Err(format!(
            "Invalid previous block hash. Expected {}, but got {}.",
            hex::encode(expected_previous),
            hex::encode(block.previous_hash)
        ));
    }

    Ok(())
}
