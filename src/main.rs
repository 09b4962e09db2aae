use futures::{Stream, StreamExt};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use research_stream::CancellationToken;
use research_stream::init::app_init;
use research_stream::stream::{ChannelObserver, StreamFrame, ViewEvent, decode_frame};

/// Replays a JSON-lines frame capture up to its first terminal frame. Lines
/// that fail to decode are logged and skipped.
fn frames_from_file(path: PathBuf) -> impl Stream<Item = StreamFrame> {
    async_stream::stream! {
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) => {
                yield StreamFrame::Error { message: format!("cannot open {}: {}", path.display(), e) };
                return;
            }
        };
        let mut lines = BufReader::new(file).lines();
        let mut line_no = 0usize;
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    line_no += 1;
                    match decode_frame(&line) {
                        Ok(Some(frame)) => {
                            let terminal = frame.is_terminal();
                            yield frame;
                            if terminal {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => log::warn!("⚠️  line {}: {}", line_no, e),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    yield StreamFrame::Error { message: format!("read failed: {}", e) };
                    break;
                }
            }
        }
    }
}

fn describe(event: &ViewEvent) {
    match event {
        ViewEvent::Started { response_id, .. } => log::info!("▶️  {}", response_id),
        ViewEvent::View { view, .. } => log::info!(
            "🧩 {} sections, finished={}",
            view.sections.len(),
            view.finished
        ),
        ViewEvent::Citation { record, .. } => log::info!(
            "🔖 [{}] {} ({})",
            record.id,
            record.title,
            if record.is_file_backed() { "file" } else { "excerpt" }
        ),
        ViewEvent::Workflow { steps, .. } => {
            for step in steps {
                log::info!("⏱️  {} {} {}", step.step_index, step.name, step.phase);
            }
        }
        ViewEvent::Completed { .. } => log::info!("✅ Completed"),
        ViewEvent::Error {
            error,
            user_visible: true,
            ..
        } => log::error!("❌ {}", error),
        ViewEvent::Error { error, .. } => log::warn!("⚠️  {}", error),
        ViewEvent::Cancelled { reason, .. } => log::info!("🛑 {}", reason),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    dotenv::dotenv().ok();

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .ok_or("usage: research-stream <frames.jsonl>")?;

    let (config, mut conversation) = app_init().await?;
    log::info!("🚀 Replaying {}", path.display());

    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let printer = tokio::spawn(async move {
        let mut events = ReceiverStream::new(rx);
        while let Some(event) = events.next().await {
            describe(&event);
        }
    });

    let token = CancellationToken::new();
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_token.cancel().await;
        }
    });

    let frames = frames_from_file(path);
    let outcome = conversation
        .stream_response(frames, Box::new(ChannelObserver::new(tx)), &token)
        .await
        .cloned();
    printer.await?;

    // Failed responses are still recorded with their partial view.
    if let Some(snapshot) = conversation.responses().last() {
        println!("{}", serde_json::to_string_pretty(snapshot)?);
    }
    if let Some(sources) = conversation.sources().await {
        println!("{}", serde_json::to_string_pretty(&sources)?);
    }

    outcome?;
    Ok(())
}
