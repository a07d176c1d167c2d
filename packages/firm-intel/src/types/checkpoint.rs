//! Phase checkpoints for crash-safe resume.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A saved mid-pipeline snapshot. One per entity; saving overwrites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Entity the checkpoint belongs to (e.g. "pe-firm-42")
    pub entity_id: String,

    /// Phase the entity had completed when saved
    pub phase: String,

    /// Opaque phase payload
    pub data: Vec<u8>,

    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(entity_id: impl Into<String>, phase: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            entity_id: entity_id.into(),
            phase: phase.into(),
            data,
            created_at: Utc::now(),
        }
    }
}
