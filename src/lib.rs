pub mod citations;
pub mod conversation;
pub mod error;
pub mod files;
pub mod init;
pub mod models;
pub mod stream;

pub use crate::conversation::Conversation;
pub use crate::error::{AppError, ErrorCode, Result};
pub use crate::stream::{CancellationToken, ResponseSession, ResponseSnapshot, StreamFrame};
