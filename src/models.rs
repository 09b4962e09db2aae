use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use strum_macros::{AsRefStr, Display, EnumString};

// ============================================================================
// Sections decoded from the response buffer
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StepStatus {
    Thinking,
    Complete,
}

impl StepStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReviewedSource {
    pub title: String,
    pub domain: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepSource {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepSection {
    pub step_number: u32,
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<StepSource>>,
    pub status: StepStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, AsRefStr)]
#[serde(tag = "type", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Section {
    Progress {
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        time_remaining: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Search {
        queries: Vec<String>,
    },
    Review {
        sources: Vec<ReviewedSource>,
        count: usize,
    },
    Step(StepSection),
    FinalAnswer {
        text: String,
    },
    EditableOutput {
        text: String,
    },
    Completion {
        finished: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        source_count: Option<u32>,
    },
}

impl Section {
    pub fn as_step(&self) -> Option<&StepSection> {
        match self {
            Self::Step(step) => Some(step),
            _ => None,
        }
    }

    /// Short name for logging.
    pub fn kind(&self) -> &str {
        self.as_ref()
    }
}

/// The full view derived from one buffer state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Accumulation {
    pub sections: Vec<Section>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub editable_output: Option<String>,
    pub finished: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_count: Option<u32>,
    /// `final_answer` is untagged prose, not a `[FINAL_ANSWER]` block.
    #[serde(default)]
    pub promoted_answer: bool,
}

impl Accumulation {
    pub fn steps(&self) -> impl Iterator<Item = &StepSection> {
        self.sections.iter().filter_map(Section::as_step)
    }

    pub fn step(&self, step_number: u32) -> Option<&StepSection> {
        self.steps().find(|s| s.step_number == step_number)
    }
}

// ============================================================================
// Workflow progress ticker
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WorkflowPhase {
    Pending,
    Started,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowStep {
    pub step_index: u32,
    pub name: String,
    pub phase: WorkflowPhase,
}

// ============================================================================
// Citations
// ============================================================================

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum CitationKind {
    Document,
    Vault,
    Web,
    Playbook,
}

impl CitationKind {
    /// File-backed kinds are keyed by handle or path rather than URL.
    pub fn is_file_backed(&self) -> bool {
        !matches!(self, Self::Web)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CitationRecord {
    #[serde(default)]
    pub id: u32,
    pub kind: CitationKind,
    pub title: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_pdf: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paragraph_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    /// Opaque viewer payload, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlight_region: Option<serde_json::Value>,
}

impl CitationRecord {
    pub fn new(id: u32, kind: CitationKind, title: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            title: title.into(),
            snippet: String::new(),
            full_content: None,
            url: None,
            file_handle: None,
            file_path: None,
            is_pdf: None,
            paragraph_index: None,
            page_number: None,
            highlight_region: None,
        }
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_file_handle(mut self, handle: impl Into<String>) -> Self {
        self.file_handle = Some(handle.into());
        self
    }

    pub fn with_file_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page_number = Some(page);
        self
    }

    /// A document citation the resolver may still link to an uploaded file.
    pub fn needs_resolution(&self) -> bool {
        self.kind == CitationKind::Document && self.file_path.is_none() && self.file_handle.is_none()
    }

    /// Whether a viewer can open the backing file rather than an excerpt.
    pub fn is_file_backed(&self) -> bool {
        self.file_handle.is_some() || self.file_path.is_some()
    }

    /// Text shown when no file can be opened.
    pub fn excerpt(&self) -> &str {
        self.full_content.as_deref().unwrap_or(&self.snippet)
    }
}

// ============================================================================
// Uploaded files and aggregated sources
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFileDescriptor {
    pub handle: String,
    pub display_name: String,
    pub mime_kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
}

impl UploadedFileDescriptor {
    pub fn new(
        handle: impl Into<String>,
        display_name: impl Into<String>,
        mime_kind: impl Into<String>,
    ) -> Self {
        Self {
            handle: handle.into(),
            display_name: display_name.into(),
            mime_kind: mime_kind.into(),
            page_count: None,
        }
    }

    pub fn with_page_count(mut self, pages: u32) -> Self {
        self.page_count = Some(pages);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogicalSource {
    pub source_key: String,
    pub display_name: String,
    pub kind: CitationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    pub cited_pages: BTreeSet<u32>,
    pub citation_ids: BTreeSet<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_citation_wire_names() {
        let json = serde_json::json!({
            "kind": "document",
            "title": "contract.pdf",
            "snippet": "Clause 4",
            "pageNumber": 3,
            "fullContent": "Clause 4 in full"
        });
        let record: CitationRecord = serde_json::from_value(json).unwrap();
        assert_eq!(record.kind, CitationKind::Document);
        assert_eq!(record.page_number, Some(3));
        assert_eq!(record.excerpt(), "Clause 4 in full");
        assert!(record.needs_resolution());
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!(CitationKind::from_str("WEB").unwrap(), CitationKind::Web);
        assert_eq!(CitationKind::Vault.to_string(), "vault");
        assert!(!CitationKind::Web.is_file_backed());
    }

    #[test]
    fn test_section_kind() {
        let section = Section::FinalAnswer {
            text: "done".to_string(),
        };
        assert_eq!(section.kind(), "final_answer");
        let json = serde_json::to_value(&section).unwrap();
        assert_eq!(json["type"], "final_answer");
    }

    #[test]
    fn test_status_ordering() {
        assert!(StepStatus::Complete > StepStatus::Thinking);
        assert!(WorkflowPhase::Completed > WorkflowPhase::Started);
    }
}
