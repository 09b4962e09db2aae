pub mod aggregator;
pub mod render;
pub mod resolver;
pub mod store;

pub use aggregator::{aggregate, source_key};
pub use render::{InlineSegment, referenced_ids, render_inline};
pub use resolver::{find_match, resolve_record};
pub use store::CitationStore;
