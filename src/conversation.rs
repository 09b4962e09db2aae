use futures::Stream;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::citations::aggregator::{aggregate, source_key};
use crate::citations::resolver::resolve_record;
use crate::error::Result;
use crate::files::UploadedFileRegistry;
use crate::models::{CitationRecord, LogicalSource, UploadedFileDescriptor};
use crate::stream::events::StreamFrame;
use crate::stream::observer::ViewObserver;
use crate::stream::scanner::ScanOptions;
use crate::stream::session::{CancellationToken, ResponseSession, ResponseSnapshot};

/// One conversation: finished responses plus the user's uploads.
///
/// Responses are streamed one at a time; `stream_response` takes `&mut self`
/// for the whole read loop.
pub struct Conversation {
    options: ScanOptions,
    files: Arc<RwLock<UploadedFileRegistry>>,
    responses: Vec<ResponseSnapshot>,
}

impl Conversation {
    pub fn new(options: ScanOptions) -> Self {
        Self {
            options,
            files: Arc::new(RwLock::new(UploadedFileRegistry::new())),
            responses: Vec::new(),
        }
    }

    /// Shared handle for the file-ingestion side.
    pub fn files(&self) -> Arc<RwLock<UploadedFileRegistry>> {
        self.files.clone()
    }

    pub async fn register_file(&self, descriptor: UploadedFileDescriptor) {
        self.files.write().await.register(descriptor);
    }

    pub fn responses(&self) -> &[ResponseSnapshot] {
        &self.responses
    }

    pub fn start_response(&self, observer: Box<dyn ViewObserver>) -> ResponseSession {
        ResponseSession::new(self.options, self.files.clone(), observer)
    }

    /// Streams one response to completion and records its snapshot. A failed
    /// response is still recorded so its partial view stays visible.
    pub async fn stream_response<S>(
        &mut self,
        frames: S,
        observer: Box<dyn ViewObserver>,
        token: &CancellationToken,
    ) -> Result<&ResponseSnapshot>
    where
        S: Stream<Item = StreamFrame>,
    {
        let mut session = self.start_response(observer);
        let result = session.run(frames, token).await;
        if let Some(snapshot) = session.take_finalized() {
            self.responses.push(snapshot);
        }
        result?;
        self.responses
            .last()
            .ok_or_else(|| crate::error::AppError::internal("response finalized without snapshot"))
    }

    pub fn record(&mut self, snapshot: ResponseSnapshot) {
        self.responses.push(snapshot);
    }

    fn contributing_citations(&self) -> impl Iterator<Item = &CitationRecord> {
        self.responses
            .iter()
            .filter(|r| r.contributes_sources())
            .flat_map(|r| r.citations.iter())
    }

    /// The sidebar source list. `None` until a finished response has
    /// contributed at least one citation.
    pub async fn sources(&self) -> Option<Vec<LogicalSource>> {
        if self.contributing_citations().next().is_none() {
            return None;
        }
        let files = self.files.read().await;
        Some(aggregate(self.contributing_citations(), files.descriptors()))
    }

    /// Maps a click on a source (and optionally a page) back to a citation.
    /// Prefers the citation for that exact page, else the first for the
    /// source. Document citations are resolved against current uploads
    /// before being handed to the viewer.
    pub async fn open_citation(&self, key: &str, page: Option<u32>) -> Option<CitationRecord> {
        let mut first = None;
        let mut exact = None;
        for record in self.contributing_citations() {
            if source_key(record) != key {
                continue;
            }
            if first.is_none() {
                first = Some(record);
            }
            if page.is_some() && record.page_number == page {
                exact = Some(record);
                break;
            }
        }

        let mut record = exact.or(first)?.clone();
        if record.needs_resolution() {
            let files = self.files.read().await;
            resolve_record(&mut record, files.descriptors());
        }
        Some(record)
    }
}
