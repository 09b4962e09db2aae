use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{StreamExt, stream};
use research_stream::citations::render_inline;
use research_stream::models::{
    Accumulation, CitationKind, CitationRecord, StepStatus, UploadedFileDescriptor,
};
use research_stream::stream::{
    ChannelObserver, NoopObserver, ResponseOutcome, ScanOptions, SectionAccumulator, StreamFrame,
    ViewEvent, ViewObserver,
};
use research_stream::{CancellationToken, Conversation};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

#[derive(Clone, Default)]
struct Recorder {
    views: Arc<Mutex<Vec<Accumulation>>>,
    citations: Arc<Mutex<Vec<u32>>>,
}

impl ViewObserver for Recorder {
    fn on_view(&mut self, _response_id: &str, view: &Accumulation) {
        self.views.lock().unwrap().push(view.clone());
    }

    fn on_citation(&mut self, _response_id: &str, record: &CitationRecord) {
        self.citations.lock().unwrap().push(record.id);
    }
}

fn citation(id: u32, title: &str) -> StreamFrame {
    StreamFrame::Citation {
        id,
        source: CitationRecord::new(0, CitationKind::Document, title).with_snippet("excerpt"),
    }
}

fn scenario() -> Vec<StreamFrame> {
    vec![
        StreamFrame::content("[STEP 1: Plan]\nPlanning.\n[/STEP]\n"),
        citation(1, "x.pdf"),
        StreamFrame::last_content("[FINAL_ANSWER]Result.[/FINAL_ANSWER]\n[FINISHED]\n[SOURCES: 1]"),
    ]
}

#[tokio::test]
async fn end_to_end_without_uploads() {
    let mut conversation = Conversation::new(ScanOptions::default());
    let snapshot = conversation
        .stream_response(
            stream::iter(scenario()),
            Box::new(NoopObserver),
            &CancellationToken::new(),
        )
        .await
        .unwrap()
        .clone();

    assert_eq!(snapshot.outcome, ResponseOutcome::Completed);
    let steps: Vec<_> = snapshot.view.steps().collect();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].status, StepStatus::Complete);
    assert_eq!(snapshot.view.final_answer.as_deref(), Some("Result."));
    assert!(snapshot.view.finished);
    assert_eq!(snapshot.view.source_count, Some(1));

    assert_eq!(snapshot.citations.len(), 1);
    assert!(snapshot.citations[0].file_handle.is_none());
    assert_eq!(snapshot.citations[0].excerpt(), "excerpt");

    let sources = conversation.sources().await.unwrap();
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].source_key, "x.pdf");
}

#[tokio::test]
async fn end_to_end_with_matching_upload() {
    let mut conversation = Conversation::new(ScanOptions::default());
    conversation
        .register_file(UploadedFileDescriptor::new("h-x", "X.PDF", "application/pdf"))
        .await;

    let snapshot = conversation
        .stream_response(
            stream::iter(scenario()),
            Box::new(NoopObserver),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(snapshot.citations[0].file_handle.as_deref(), Some("h-x"));
    assert_eq!(snapshot.citations[0].is_pdf, Some(true));
}

#[tokio::test]
async fn views_never_regress_or_duplicate_steps() {
    let buffer = concat!(
        "[PROGRESS: Researching]\nTIME: 1 min\n[/PROGRESS]\n",
        "[STEP 1: Search]\nLooking up filings.\n[/STEP]\n",
        "[STEP 2: Read]\nReading the 10-K [1].\n[SOURCES: https://sec.gov/x]\n[/STEP]\n",
        "[FINAL_ANSWER]Revenue grew [1].\n=== CITATIONS ===\n[1] 10-K[/FINAL_ANSWER]\n",
    );
    // Split at every 7 bytes that land on a char boundary.
    let mut frames = Vec::new();
    let mut start = 0;
    while start < buffer.len() {
        let mut end = (start + 7).min(buffer.len());
        while !buffer.is_char_boundary(end) {
            end += 1;
        }
        frames.push(StreamFrame::content(&buffer[start..end]));
        start = end;
    }
    frames.push(StreamFrame::Done);

    let recorder = Recorder::default();
    let mut conversation = Conversation::new(ScanOptions::default());
    let snapshot = conversation
        .stream_response(
            stream::iter(frames),
            Box::new(recorder.clone()),
            &CancellationToken::new(),
        )
        .await
        .unwrap()
        .clone();

    let views = recorder.views.lock().unwrap();
    let mut completed: Vec<u32> = Vec::new();
    for view in views.iter() {
        let numbers: Vec<u32> = view.steps().map(|s| s.step_number).collect();
        let mut unique = numbers.clone();
        unique.dedup();
        assert_eq!(numbers, unique, "duplicate step in {:?}", view);

        for n in &completed {
            assert_eq!(view.step(*n).map(|s| s.status), Some(StepStatus::Complete));
        }
        for step in view.steps().filter(|s| s.status.is_complete()) {
            if !completed.contains(&step.step_number) {
                completed.push(step.step_number);
            }
        }
        if let Some(answer) = &view.final_answer {
            assert!(!answer.contains("[FINAL"), "partial tag leaked: {}", answer);
        }
    }

    assert_eq!(snapshot.view.final_answer.as_deref(), Some("Revenue grew [1]."));
    assert_eq!(
        snapshot.view.step(2).unwrap().sources.as_ref().unwrap()[0].url,
        "https://sec.gov/x"
    );
}

#[tokio::test]
async fn cancellation_between_frames_finalizes_cleanly() {
    let token = CancellationToken::new();
    let cancel = token.clone();
    let frames = async_stream::stream! {
        yield StreamFrame::content("[STEP 1: Plan]\nThinking about");
        yield citation(3, "brief.docx");
        cancel.cancel().await;
        yield StreamFrame::content(" more\n[/STEP]");
        yield StreamFrame::Done;
    };

    let mut conversation = Conversation::new(ScanOptions::default());
    let snapshot = conversation
        .stream_response(frames, Box::new(NoopObserver), &token)
        .await
        .unwrap()
        .clone();

    assert_eq!(snapshot.outcome, ResponseOutcome::Cancelled);
    let step = snapshot.view.step(1).unwrap();
    assert_eq!(step.body, "Thinking about");
    assert_eq!(snapshot.citations.len(), 1);
    assert!(conversation.sources().await.is_some());
}

#[tokio::test]
async fn cancel_while_transport_is_silent_records_the_response() {
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel().await;
    });

    let frames = stream::iter(vec![
        StreamFrame::content("[STEP 1: Plan]\nStill thinking"),
        citation(1, "notes.txt"),
    ])
    .chain(stream::pending());

    let mut conversation = Conversation::new(ScanOptions::default());
    let outcome = tokio::time::timeout(
        Duration::from_secs(2),
        conversation.stream_response(frames, Box::new(NoopObserver), &token),
    )
    .await
    .expect("cancel should end the read loop")
    .unwrap()
    .outcome
    .clone();

    assert_eq!(outcome, ResponseOutcome::Cancelled);
    assert_eq!(conversation.responses().len(), 1);
    let snapshot = &conversation.responses()[0];
    assert_eq!(snapshot.view.step(1).unwrap().body, "Still thinking");
    assert_eq!(snapshot.citations.len(), 1);
    assert!(conversation.sources().await.is_some());
}

#[tokio::test]
async fn completed_event_survives_a_slow_consumer() {
    let (tx, mut rx) = mpsc::channel(4);
    let mut frames: Vec<StreamFrame> = (1..=10)
        .map(|n| StreamFrame::content(format!("[STEP {}: Part]\nbody\n[/STEP]\n", n)))
        .collect();
    frames.push(StreamFrame::Done);

    let mut conversation = Conversation::new(ScanOptions::default());
    conversation
        .stream_response(
            stream::iter(frames),
            Box::new(ChannelObserver::new(tx)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let mut kinds = Vec::new();
    while let Some(event) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("channel should close after the backlog drains")
    {
        kinds.push(match event {
            ViewEvent::Started { .. } => "started",
            ViewEvent::View { .. } => "view",
            ViewEvent::Completed { .. } => "completed",
            _ => "other",
        });
    }

    assert_eq!(kinds.first(), Some(&"started"));
    assert_eq!(kinds.last(), Some(&"completed"));
    assert_eq!(kinds.iter().filter(|k| **k == "completed").count(), 1);
    assert!(kinds.iter().filter(|k| **k == "view").count() < 10);
}

#[tokio::test]
async fn channel_transport_preserves_citation_before_prose() {
    let (tx, rx) = mpsc::channel(16);
    for frame in [
        citation(2, "memo.txt"),
        StreamFrame::content("[FINAL_ANSWER]See [2] and [9]."),
        StreamFrame::last_content("[/FINAL_ANSWER]"),
    ] {
        tx.send(frame).await.unwrap();
    }
    drop(tx);

    let recorder = Recorder::default();
    let mut conversation = Conversation::new(ScanOptions::default());
    let mut session = conversation.start_response(Box::new(recorder.clone()));
    let snapshot = session
        .run(ReceiverStream::new(rx), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(*recorder.citations.lock().unwrap(), vec![2]);
    let views = recorder.views.lock().unwrap();
    let live = &views[0];
    assert_eq!(live.final_answer.as_deref(), Some("See [2] and [9]."));

    // The first rendered view already sees citation 2; 9 stays inert.
    let mut store = research_stream::citations::CitationStore::new();
    for record in &snapshot.citations {
        store.put(record.clone());
    }
    let segments = render_inline(live.final_answer.as_deref().unwrap(), &store);
    assert_eq!(segments.len(), 3);
    drop(views);

    conversation.record(snapshot);
    assert_eq!(conversation.responses().len(), 1);
}

#[test]
fn accumulate_is_idempotent_on_closed_buffer() {
    let buffer = "[STEP 1: A]\nbody\n[STEP 2: B]\nnext\n[/STEP]\n[FINAL_ANSWER]Done";
    let mut accumulator = SectionAccumulator::new(ScanOptions::default());
    let first = accumulator.accumulate(buffer, false);
    let second = accumulator.accumulate(buffer, false);
    assert_eq!(first, second);
    assert_eq!(first.final_answer.as_deref(), Some("Done"));
    assert_eq!(first.steps().count(), 2);
}

#[test]
fn raw_prose_becomes_the_answer() {
    let options = ScanOptions { min_answer_chars: 5 };
    let view = tokio_test::block_on(async {
        let mut conversation = Conversation::new(options);
        conversation
            .stream_response(
                stream::iter(vec![
                    StreamFrame::content("Plain answer "),
                    StreamFrame::last_content("without any tags."),
                ]),
                Box::new(NoopObserver),
                &CancellationToken::new(),
            )
            .await
            .unwrap()
            .view
            .clone()
    });
    assert_eq!(view.final_answer.as_deref(), Some("Plain answer without any tags."));
    assert!(view.finished);
}
