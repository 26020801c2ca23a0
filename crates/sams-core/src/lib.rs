//! sams-core - Shared infrastructure for the SAMS sync engine
//!
//! HTTP transport, retry policy, logging, progress, cancellation and the
//! small concurrency primitives the partition workers share. Nothing here
//! knows about students or institutes.

pub mod http;
pub mod logging;
pub mod pool;
pub mod progress;
pub mod retry;
pub mod shutdown;
pub mod work_queue;

// Re-exports for convenience
pub use http::{
    HttpRequest, HttpResponse, HttpTransport, Method, SHARED_RUNTIME, Transport, TransportError,
    http_client,
};
pub use logging::{IndicatifLogger, Verbosity, init_logging};
pub use pool::{Pool, PoolGuard};
pub use progress::{ProgressContext, SharedProgress, fmt_num};
pub use retry::{ERRMAX, RetryPolicy, retry_with_backoff};
pub use shutdown::Shutdown;
pub use work_queue::WorkQueue;
