//! Links document citations to files the user uploaded in this conversation.
//!
//! The backend often cites an uploaded document by title only. Titles and
//! display names rarely agree exactly ("contract.pdf" vs "Contract.PDF",
//! "Q3 report" vs "Q3 report final.docx"), so matching is case-folded
//! containment in either direction.

use crate::files::is_pdf_descriptor;
use crate::models::{CitationKind, CitationRecord, UploadedFileDescriptor};

/// First descriptor whose name matches `title`, if any.
pub fn find_match<'a>(
    title: &str,
    files: &'a [UploadedFileDescriptor],
) -> Option<&'a UploadedFileDescriptor> {
    let title = title.trim().to_lowercase();
    if title.is_empty() {
        return None;
    }
    files.iter().find(|file| {
        let name = file.display_name.trim().to_lowercase();
        !name.is_empty() && (name == title || name.contains(&title) || title.contains(&name))
    })
}

/// Attaches `file_handle` and `is_pdf` to a document citation lacking a
/// file path. Returns true when the record was resolved by this call.
pub fn resolve_record(record: &mut CitationRecord, files: &[UploadedFileDescriptor]) -> bool {
    if record.kind != CitationKind::Document || record.file_path.is_some() {
        return false;
    }
    if record.file_handle.is_some() {
        return false;
    }

    match find_match(&record.title, files) {
        Some(file) => {
            log::debug!(
                "citation {} resolved to uploaded file {}",
                record.id,
                file.handle
            );
            record.file_handle = Some(file.handle.clone());
            record.is_pdf = Some(is_pdf_descriptor(file));
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uploads() -> Vec<UploadedFileDescriptor> {
        vec![
            UploadedFileDescriptor::new("h-sum", "summary.docx", "docx"),
            UploadedFileDescriptor::new("h-con", "Contract.PDF", "pdf"),
        ]
    }

    #[test]
    fn test_case_insensitive_match() {
        let files = uploads();
        let found = find_match("contract.pdf", &files).unwrap();
        assert_eq!(found.handle, "h-con");
    }

    #[test]
    fn test_no_match_against_other_file() {
        let files = vec![UploadedFileDescriptor::new("h-sum", "summary.docx", "docx")];
        assert!(find_match("contract.pdf", &files).is_none());
    }

    #[test]
    fn test_containment_both_directions() {
        let files = vec![UploadedFileDescriptor::new("h-q3", "Q3 Report.pdf", "pdf")];
        assert!(find_match("q3 report", &files).is_some());

        let short = vec![UploadedFileDescriptor::new("h-nda", "NDA", "txt")];
        assert!(find_match("Signed NDA (final)", &short).is_some());
    }

    #[test]
    fn test_empty_title_never_matches() {
        assert!(find_match("  ", &uploads()).is_none());
    }

    #[test]
    fn test_resolve_sets_handle_and_pdf_flag() {
        let mut record = CitationRecord::new(1, CitationKind::Document, "contract.pdf");
        assert!(resolve_record(&mut record, &uploads()));
        assert_eq!(record.file_handle.as_deref(), Some("h-con"));
        assert_eq!(record.is_pdf, Some(true));

        // Already resolved
        assert!(!resolve_record(&mut record, &uploads()));
    }

    #[test]
    fn test_resolve_skips_path_backed_and_other_kinds() {
        let mut with_path =
            CitationRecord::new(1, CitationKind::Document, "contract.pdf").with_file_path("/v/c.pdf");
        assert!(!resolve_record(&mut with_path, &uploads()));
        assert!(with_path.file_handle.is_none());

        let mut vault = CitationRecord::new(2, CitationKind::Vault, "contract.pdf");
        assert!(!resolve_record(&mut vault, &uploads()));
    }

    #[test]
    fn test_unresolved_keeps_excerpt() {
        let mut record =
            CitationRecord::new(3, CitationKind::Document, "missing.pdf").with_snippet("Clause 9");
        assert!(!resolve_record(&mut record, &uploads()));
        assert!(!record.is_file_backed());
        assert_eq!(record.excerpt(), "Clause 9");
    }
}
