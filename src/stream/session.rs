use futures::{Stream, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};
use uuid::Uuid;

use crate::citations::render::referenced_ids;
use crate::citations::resolver::resolve_record;
use crate::citations::store::CitationStore;
use crate::error::{AppError, Result, log_error};
use crate::files::UploadedFileRegistry;
use crate::models::{Accumulation, CitationRecord, WorkflowStep};
use crate::stream::accumulator::SectionAccumulator;
use crate::stream::events::StreamFrame;
use crate::stream::observer::ViewObserver;
use crate::stream::scanner::ScanOptions;
use crate::stream::workflow::WorkflowTracker;

// ============================================================================
// CANCELLATION TOKEN
// ============================================================================

#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<RwLock<bool>>,
    notify: Arc<Notify>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn cancel(&self) {
        let mut cancelled = self.cancelled.write().await;
        *cancelled = true;
        self.notify.notify_waiters();
    }

    pub async fn is_cancelled(&self) -> bool {
        *self.cancelled.read().await
    }

    /// Resolves once `cancel` has been called, immediately if it already was.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled().await {
                return;
            }
            notified.await;
        }
    }
}

// ============================================================================
// SNAPSHOT
// ============================================================================

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResponseOutcome {
    Completed,
    Cancelled,
    Failed { error: AppError },
}

/// Immutable record of one finished response.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResponseSnapshot {
    pub response_id: String,
    pub view: Accumulation,
    pub citations: Vec<CitationRecord>,
    pub workflow_steps: Vec<WorkflowStep>,
    pub outcome: ResponseOutcome,
    pub completed_at: chrono::DateTime<chrono::Utc>,
}

impl ResponseSnapshot {
    /// Responses that ended cleanly feed the source list; failed ones don't.
    pub fn contributes_sources(&self) -> bool {
        !matches!(self.outcome, ResponseOutcome::Failed { .. })
    }

    pub fn citation(&self, id: u32) -> Option<&CitationRecord> {
        self.citations.iter().find(|c| c.id == id)
    }

    /// `[n]` markers in the final answer that no citation record backs.
    /// They render as plain text.
    pub fn dangling_citations(&self) -> Vec<u32> {
        self.view
            .final_answer
            .as_deref()
            .map(referenced_ids)
            .unwrap_or_default()
            .into_iter()
            .filter(|id| self.citation(*id).is_none())
            .collect()
    }
}

// ============================================================================
// RESPONSE SESSION
// ============================================================================

enum FrameFlow {
    Continue,
    Finish,
    Fail(AppError),
}

/// Processing state for one outbound response.
pub struct ResponseSession {
    response_id: String,
    buffer: String,
    accumulator: SectionAccumulator,
    citations: CitationStore,
    workflow: WorkflowTracker,
    files: Arc<RwLock<UploadedFileRegistry>>,
    observer: Box<dyn ViewObserver>,
    frames_seen: usize,
    finalized: Option<ResponseSnapshot>,
}

impl ResponseSession {
    pub fn new(
        options: ScanOptions,
        files: Arc<RwLock<UploadedFileRegistry>>,
        observer: Box<dyn ViewObserver>,
    ) -> Self {
        Self {
            response_id: Uuid::now_v7().to_string(),
            buffer: String::new(),
            accumulator: SectionAccumulator::new(options),
            citations: CitationStore::new(),
            workflow: WorkflowTracker::new(),
            files,
            observer,
            frames_seen: 0,
            finalized: None,
        }
    }

    pub fn response_id(&self) -> &str {
        &self.response_id
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Latest derived view.
    pub fn view(&self) -> &Accumulation {
        self.accumulator.latest()
    }

    /// Citations of the message currently streaming.
    pub fn citations(&self) -> &CitationStore {
        &self.citations
    }

    pub fn workflow(&self) -> &WorkflowTracker {
        &self.workflow
    }

    pub fn finalized(&self) -> Option<&ResponseSnapshot> {
        self.finalized.as_ref()
    }

    pub fn take_finalized(&mut self) -> Option<ResponseSnapshot> {
        self.finalized.take()
    }

    /// Reads frames until a terminal frame, the end of the stream, or
    /// cancellation. Cancellation interrupts a transport waiting for its next
    /// frame, and a frame that has arrived is always applied whole.
    ///
    /// A transport error frame finalizes the response as failed and is
    /// returned as `Err`; the failed snapshot stays available through
    /// `finalized()`.
    pub async fn run<S>(&mut self, frames: S, token: &CancellationToken) -> Result<ResponseSnapshot>
    where
        S: Stream<Item = StreamFrame>,
    {
        if let Some(snapshot) = &self.finalized {
            return Ok(snapshot.clone());
        }

        tokio::pin!(frames);
        self.observer.on_started(&self.response_id);
        log::info!("📡 Response {} streaming", self.response_id);

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                frame = frames.next() => Some(frame),
            };
            let cancelled = next.is_none() || token.is_cancelled().await;
            let frame = match next {
                Some(None) => break,
                Some(Some(frame)) if !cancelled => frame,
                _ => {
                    log::info!(
                        "🛑 Response {} cancelled after {} frames",
                        self.response_id,
                        self.frames_seen
                    );
                    return Ok(self.finish(ResponseOutcome::Cancelled).await);
                }
            };
            self.frames_seen += 1;

            match self.apply(frame).await {
                FrameFlow::Continue => {}
                FrameFlow::Finish => return Ok(self.finish(ResponseOutcome::Completed).await),
                FrameFlow::Fail(error) => {
                    log_error(&error);
                    self.observer.on_error(&self.response_id, &error);
                    self.finish(ResponseOutcome::Failed {
                        error: error.clone(),
                    })
                    .await;
                    return Err(error);
                }
            }
        }

        log::debug!("transport closed without a terminal frame");
        Ok(self.finish(ResponseOutcome::Completed).await)
    }

    /// Produces a well-formed snapshot from whatever has accumulated.
    pub async fn finalize_early(&mut self) -> ResponseSnapshot {
        match &self.finalized {
            Some(snapshot) => snapshot.clone(),
            None => self.finish(ResponseOutcome::Cancelled).await,
        }
    }

    /// Retries resolution of document citations, e.g. after an upload
    /// finished. Returns how many became file-backed.
    pub async fn refresh_citations(&mut self) -> usize {
        let resolved = {
            let files = self.files.read().await;
            self.citations.resolve_pending(files.descriptors())
        };
        for id in &resolved {
            if let Some(record) = self.citations.get(*id) {
                self.observer.on_citation(&self.response_id, record);
            }
        }
        resolved.len()
    }

    async fn apply(&mut self, frame: StreamFrame) -> FrameFlow {
        match frame {
            StreamFrame::Content { text, done } => {
                self.buffer.push_str(&text);
                let view = self.accumulator.accumulate(&self.buffer, !done);
                self.observer.on_view(&self.response_id, &view);
                if done { FrameFlow::Finish } else { FrameFlow::Continue }
            }
            StreamFrame::Citation { id, source } => {
                let mut record = source;
                record.id = id;
                {
                    let files = self.files.read().await;
                    resolve_record(&mut record, files.descriptors());
                }
                self.observer.on_citation(&self.response_id, &record);
                self.citations.put(record);
                FrameFlow::Continue
            }
            StreamFrame::WorkflowStep { step, name, status } => {
                if self.workflow.apply(step, name, status) {
                    self.observer
                        .on_workflow(&self.response_id, &self.workflow.steps());
                }
                FrameFlow::Continue
            }
            StreamFrame::Error { message } => FrameFlow::Fail(
                AppError::transport(message)
                    .with_details(serde_json::json!({ "frames_seen": self.frames_seen })),
            ),
            StreamFrame::Done => FrameFlow::Finish,
        }
    }

    async fn finish(&mut self, outcome: ResponseOutcome) -> ResponseSnapshot {
        self.refresh_citations().await;
        let view = self.accumulator.accumulate(&self.buffer, false);

        let snapshot = ResponseSnapshot {
            response_id: self.response_id.clone(),
            view,
            citations: self.citations.snapshot(),
            workflow_steps: self.workflow.steps(),
            outcome,
            completed_at: chrono::Utc::now(),
        };
        self.citations.clear();

        let dangling = snapshot.dangling_citations();
        if !dangling.is_empty() {
            log::debug!("answer cites {:?} without records", dangling);
        }
        log::info!(
            "✅ Response {} finalized: {} sections, {} citations",
            self.response_id,
            snapshot.view.sections.len(),
            snapshot.citations.len()
        );
        self.observer.on_finished(&snapshot);
        self.finalized = Some(snapshot.clone());
        snapshot
    }
}

// ============================================================================
// TESTS
// ============================================================================
