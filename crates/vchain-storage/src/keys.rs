//! Object key layout for chain artifacts.

use vchain_models::ChainId;

use crate::error::{StorageError, StorageResult};

/// Key prefix for everything belonging to one chain.
pub fn chain_prefix(chain_id: &ChainId) -> String {
    format!("chains/{}/", chain_id)
}

/// Key of the final concatenated video.
pub fn final_video_key(chain_id: &ChainId) -> String {
    format!("{}final.mp4", chain_prefix(chain_id))
}

/// Key of the chain thumbnail.
pub fn thumbnail_key(chain_id: &ChainId) -> String {
    format!("{}thumbnail.jpg", chain_prefix(chain_id))
}

/// Reject keys that are empty, absolute, or escape their prefix.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.starts_with('/') || key.split('/').any(|part| part == "..") {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}
