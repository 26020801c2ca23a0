//! sams-etl - Extract, validate and load SAMS enrollment data
//!
//! Downloads student and institute records partition by partition from the
//! SAMS API, validates each batch and loads it into DuckDB without
//! duplicates. Completed partitions are checkpointed so reruns only fetch
//! what is missing.

pub mod api;
pub mod checkpoint;
pub mod config;
pub mod counts;
pub mod download;
pub mod error;
pub mod load;
pub mod partition;
pub mod record;
pub mod runner;
pub mod sql;
pub mod store;
pub mod token;
pub mod validate;

pub use api::{ApiClient, Endpoints, Envelope, PageSource};
pub use checkpoint::{Checkpoint, CheckpointStore, CompletionKind};
pub use config::{ApiSettings, ProgramRanges, SyncSettings};
pub use counts::ExpectedCounts;
pub use download::{Downloader, PartitionDownload};
pub use error::{ApiError, AuthError, PartitionError, StorageError, ValidationError};
pub use load::{LoadReport, Loader, RecordOutcome, RowSink};
pub use partition::{AdmissionVariant, Catalog, EntityType, PartitionFilter, PartitionKey, Program, YearRange};
pub use runner::{Orchestrator, PartitionOutcome, PartitionResult, RunError, RunSummary, SyncOptions};
pub use store::DuckStore;
pub use token::{Clock, Credentials, ManualClock, SystemClock, TokenManager};
