use std::path::{Path, PathBuf};

use crate::conversation::Conversation;
use crate::error::{AppError, ErrorContext, Result};
use crate::models::UploadedFileDescriptor;
use crate::stream::scanner::ScanOptions;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct Config {
    pub min_answer_chars: usize,
    pub channel_capacity: usize,
    pub uploaded_files: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_answer_chars: ScanOptions::default().min_answer_chars,
            channel_capacity: 100,
            uploaded_files: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            min_answer_chars: match std::env::var("STREAM_MIN_ANSWER_CHARS") {
                Ok(v) => v.trim().parse::<usize>().context("STREAM_MIN_ANSWER_CHARS")?,
                Err(_) => defaults.min_answer_chars,
            },
            channel_capacity: match std::env::var("STREAM_CHANNEL_CAPACITY") {
                Ok(v) => v.trim().parse::<usize>().context("STREAM_CHANNEL_CAPACITY")?,
                Err(_) => defaults.channel_capacity,
            },
            uploaded_files: std::env::var("UPLOADED_FILES").ok().map(PathBuf::from),
        })
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            min_answer_chars: self.min_answer_chars,
        }
    }
}

pub async fn load_uploaded_files(path: &Path) -> Result<Vec<UploadedFileDescriptor>> {
    if !tokio::fs::try_exists(path).await? {
        return Err(AppError::not_found(format!("uploads file {}", path.display())));
    }
    let raw = tokio::fs::read_to_string(path)
        .await
        .context(format!("reading {}", path.display()))?;
    let files: Vec<UploadedFileDescriptor> =
        serde_json::from_str(&raw).context(format!("parsing {}", path.display()))?;
    Ok(files)
}

pub async fn app_init() -> Result<(Config, Conversation)> {
    let config = Config::from_env()?;
    log::info!("✅ Configuration loaded");

    let conversation = Conversation::new(config.scan_options());

    if let Some(path) = &config.uploaded_files {
        let files = load_uploaded_files(path).await?;
        log::info!("📂 {} uploaded file descriptors from {}", files.len(), path.display());
        for file in files {
            conversation.register_file(file).await;
        }
    }

    Ok((config, conversation))
}
