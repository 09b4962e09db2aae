// Public module exports
pub mod accumulator;
pub mod events;
pub mod observer;
pub mod scanner;
pub mod session;
pub mod workflow;

// Re-export main types for convenience
pub use accumulator::{SectionAccumulator, derive};
pub use events::{StreamFrame, ViewEvent, WorkflowStatus, decode_frame};
pub use observer::{ChannelObserver, NoopObserver, ViewObserver};
pub use scanner::{ScanOptions, ScanResult, scan};
pub use session::{CancellationToken, ResponseOutcome, ResponseSession, ResponseSnapshot};
pub use workflow::WorkflowTracker;
