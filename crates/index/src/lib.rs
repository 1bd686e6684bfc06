pub mod chunker;
pub mod debounce;
pub mod indexer;
pub mod links;
pub mod parser;
pub mod reconcile;
pub mod scanner;
pub mod tracker;
pub mod watcher;

pub use chunker::{ChunkPiece, Chunker};
pub use debounce::{Debouncer, DeliveryQueue, EVENT_QUEUE_CAPACITY};
pub use indexer::{IndexContext, IndexError, IndexOutcome, Indexer, SharedEmbedder};
pub use links::{BfsVisit, LinkGraph};
pub use parser::{
  classify_link, parse_markdown, resolve_internal, ExtractedLink, LinkTarget, ParseError, ParsedDocument,
};
pub use reconcile::{ReconcileReport, Reconciler};
pub use scanner::{read_with_retry, ScannedFile, Scanner};
pub use tracker::{FailedFilesTracker, TrackedState, TrackerStatus};
pub use watcher::{FileEvent, FileEventKind, FileWatcher, WatchError};
