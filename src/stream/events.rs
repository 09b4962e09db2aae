use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::{Accumulation, CitationRecord, WorkflowStep};

// ============================================================================
// Inbound frames from the transport
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Started,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamFrame {
    // Text appended to the response buffer
    Content {
        text: String,
        #[serde(default)]
        done: bool,
    },

    // Out-of-band citation metadata
    Citation {
        id: u32,
        source: CitationRecord,
    },

    // Coarse execution progress
    WorkflowStep {
        step: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        status: WorkflowStatus,
    },

    // Terminal frames
    Error {
        message: String,
    },
    Done,
}

impl StreamFrame {
    pub fn content(text: impl Into<String>) -> Self {
        Self::Content {
            text: text.into(),
            done: false,
        }
    }

    pub fn last_content(text: impl Into<String>) -> Self {
        Self::Content {
            text: text.into(),
            done: true,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Error { .. } | Self::Done | Self::Content { done: true, .. }
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<FrameError> for AppError {
    fn from(err: FrameError) -> Self {
        AppError::invalid_frame(err.to_string())
    }
}

/// Decodes one JSON-lines record. Blank lines carry no frame.
pub fn decode_frame(line: &str) -> Result<Option<StreamFrame>, FrameError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(line)?))
}

// ============================================================================
// Outbound view events
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewEvent {
    Started {
        response_id: String,
        timestamp: i64,
    },

    View {
        response_id: String,
        view: Accumulation,
    },

    Citation {
        response_id: String,
        record: CitationRecord,
    },

    Workflow {
        response_id: String,
        steps: Vec<WorkflowStep>,
    },

    Completed {
        response_id: String,
        timestamp: i64,
    },

    Error {
        response_id: String,
        error: String,
        recoverable: bool,
        user_visible: bool,
    },

    Cancelled {
        response_id: String,
        reason: String,
    },
}
