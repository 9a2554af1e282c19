// src/lib.rs
// Public library surface for integration tests (and embedding hosts).
//
// The crate is the ingestion core of a content aggregator: per-source
// fetch/parse/map/validate pipelines (syndication feeds, a video-platform
// playlist API, a podcast-platform API), a routing coordinator, and a
// self-scheduling cycle runner. Subscription storage, content persistence
// and the user-facing HTTP layer are external collaborators reached through
// the traits in `types`.

pub mod config;
pub mod content;
pub mod coordinator;
pub mod net;
pub mod pipelines;
pub mod scheduler;
pub mod subscription;
pub mod types;

// ---- Re-exports for stable public API ----
pub use crate::content::{CandidateContent, CanonicalContent, SourceKind, ValidationError};
pub use crate::coordinator::{Coordinator, CycleSummary, CycleTotals};
pub use crate::net::{FetchError, RetryPolicy};
pub use crate::scheduler::{CycleScheduler, SchedulerConfig};
pub use crate::subscription::{RouteBucket, Subscription};
pub use crate::types::{
    ContentSink, CycleObserver, IngestResult, MemorySink, SubscriptionSource, TracingObserver,
};
