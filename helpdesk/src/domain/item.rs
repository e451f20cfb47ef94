//! Free-text items.

use super::RecordId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A row of the `items` table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Backend-assigned identifier
    pub id: RecordId,
    /// Free text
    pub value: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Insert payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NewItem {
    /// Free text
    pub value: String,
}

/// Update payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ItemPatch {
    /// Replacement text
    pub value: String,
}
