use std::collections::{BTreeSet, HashMap};

use crate::models::{CitationKind, CitationRecord, LogicalSource, UploadedFileDescriptor};

/// Identity of the logical source behind a citation.
///
/// File-backed kinds: handle, then path, then title. Web: url, then title.
pub fn source_key(record: &CitationRecord) -> String {
    let preferred = match record.kind {
        CitationKind::Web => record.url.as_deref(),
        _ => record.file_handle.as_deref().or(record.file_path.as_deref()),
    };
    preferred
        .filter(|key| !key.trim().is_empty())
        .unwrap_or(record.title.trim())
        .to_string()
}

/// Folds citations into one entry per source key, in order of first
/// appearance. `files` supplies display names and page counts for
/// handle-backed sources.
pub fn aggregate<'a, I>(citations: I, files: &[UploadedFileDescriptor]) -> Vec<LogicalSource>
where
    I: IntoIterator<Item = &'a CitationRecord>,
{
    let mut sources: Vec<LogicalSource> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in citations {
        let key = source_key(record);
        let idx = *index.entry(key.clone()).or_insert_with(|| {
            let file = record
                .file_handle
                .as_deref()
                .and_then(|handle| files.iter().find(|f| f.handle == handle));
            sources.push(LogicalSource {
                display_name: file
                    .map(|f| f.display_name.clone())
                    .unwrap_or_else(|| record.title.clone()),
                page_count: file.and_then(|f| f.page_count),
                source_key: key,
                kind: record.kind,
                cited_pages: BTreeSet::new(),
                citation_ids: BTreeSet::new(),
            });
            sources.len() - 1
        });

        let source = &mut sources[idx];
        source.citation_ids.insert(record.id);
        if let Some(page) = record.page_number {
            source.cited_pages.insert(page);
        }
    }

    sources
}
