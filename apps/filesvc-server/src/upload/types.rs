//! Upload Types
//!
//! Session records, wire requests/responses and the session state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::UnknownStatus;

// ============================================================================
// Session State
// ============================================================================

/// Status of a resumable upload session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created, no chunk accepted yet
    Initiated,
    /// At least one chunk accepted
    Receiving,
    /// Finalized into the catalog
    Committed,
    /// Cancelled by the client or the sweeper
    Aborted,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Initiated => "initiated",
            SessionStatus::Receiving => "receiving",
            SessionStatus::Committed => "committed",
            SessionStatus::Aborted => "aborted",
        }
    }

    /// No chunk writes or commits are accepted in a terminal state
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Committed | SessionStatus::Aborted)
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (Initiated, Receiving) | (Receiving, Receiving) => true,
            (Initiated, Committed) | (Receiving, Committed) => true,
            (Initiated, Aborted) | (Receiving, Aborted) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for SessionStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "initiated" => Ok(SessionStatus::Initiated),
            "receiving" => Ok(SessionStatus::Receiving),
            "committed" => Ok(SessionStatus::Committed),
            "aborted" => Ok(SessionStatus::Aborted),
            _ => Err(UnknownStatus(value)),
        }
    }
}

// ============================================================================
// Records
// ============================================================================

/// Persisted upload session
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UploadSession {
    pub id: String,
    pub filename: String,
    pub expected_size: Option<i64>,
    pub expected_sha256: Option<String>,
    pub temp_path: String,
    #[sqlx(try_from = "String")]
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One accepted chunk of a session
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UploadChunk {
    pub upload_id: String,
    #[sqlx(rename = "idx")]
    pub index: i64,
    pub size: i64,
    pub sha256: String,
    pub created_at: DateTime<Utc>,
}

/// Count and total length of the chunks recorded for a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkStats {
    pub count: i64,
    pub total_bytes: i64,
}

// ============================================================================
// Wire Types
// ============================================================================

/// Body of `POST /uploads/initiate`
#[derive(Debug, Clone, Deserialize)]
pub struct InitiateRequest {
    pub filename: String,
    #[serde(default)]
    pub expected_size: Option<i64>,
    #[serde(default)]
    pub expected_sha256: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitiateResponse {
    pub upload_id: String,
}

/// Result of an accepted chunk
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChunkAccepted {
    pub upload_id: String,
    pub status: SessionStatus,
    pub received_bytes: i64,
    pub next_index: i64,
}

/// Body of `POST /uploads/{id}/commit`; every field overrides or supplements
/// what was captured at initiation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommitRequest {
    #[serde(default)]
    pub expected_size: Option<i64>,
    #[serde(default)]
    pub expected_sha256: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

/// Reply of `GET /uploads/{id}`
#[derive(Debug, Clone, Serialize)]
pub struct UploadStatusResponse {
    pub upload_id: String,
    pub filename: String,
    pub status: SessionStatus,
    pub received_bytes: u64,
    pub chunk_count: i64,
    pub next_index: i64,
    pub expected_size: Option<i64>,
    pub expected_sha256: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What `abort` found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortOutcome {
    Aborted,
    AlreadyAborted,
    NotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!SessionStatus::Initiated.is_terminal());
        assert!(!SessionStatus::Receiving.is_terminal());
        assert!(SessionStatus::Committed.is_terminal());
        assert!(SessionStatus::Aborted.is_terminal());
    }

    #[test]
    fn test_no_transition_out_of_terminal() {
        for next in [
            SessionStatus::Initiated,
            SessionStatus::Receiving,
            SessionStatus::Committed,
            SessionStatus::Aborted,
        ] {
            assert!(!SessionStatus::Committed.can_transition_to(next));
            assert!(!SessionStatus::Aborted.can_transition_to(next));
        }
        assert!(SessionStatus::Initiated.can_transition_to(SessionStatus::Receiving));
        assert!(SessionStatus::Receiving.can_transition_to(SessionStatus::Aborted));
        assert!(!SessionStatus::Receiving.can_transition_to(SessionStatus::Initiated));
    }

    #[test]
    fn test_status_round_trips_through_column_text() {
        let status = SessionStatus::try_from("receiving".to_string()).unwrap();
        assert_eq!(status, SessionStatus::Receiving);
        assert!(SessionStatus::try_from("paused".to_string()).is_err());
    }
}
