//! Inbound message model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An inbound message delivered by the mail collaborator.
///
/// Read-only to the engine: it is retained only long enough to dedupe and
/// to seed a task tree. There is no update or delete path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailMessage {
    /// Provider-assigned unique message identifier.
    pub id: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub timestamp: DateTime<Utc>,
    pub body: String,
}
