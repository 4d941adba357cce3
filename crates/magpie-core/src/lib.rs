pub mod circuit_breaker;
pub mod criteria;
pub mod dedupe;
pub mod error;
pub mod job;
pub mod llm;
pub mod normalize;
pub mod sink;
pub mod stats;
pub mod testutil;
pub mod throttle;
pub mod traits;

pub use criteria::Criteria;
pub use error::AppError;
pub use job::{AiInsights, EmploymentType, NormalizedJob, RemoteType, compute_hash, job_key};
pub use sink::{JobSink, MemorySink, Upsert};
pub use stats::{ProviderStats, RunSummary, SourceReport};
pub use traits::{FetchResponse, Fetcher, SearchClient, SearchHit};
