//! Business logic services

pub mod cache;
pub mod coordinator;
pub mod debrid;
pub mod file_matcher;
pub mod file_utils;
pub mod filename_parser;
pub mod magnet;
pub mod queues;
pub mod rate_limiter;
pub mod resolution;
pub mod text_utils;

pub use cache::TtlMemo;
pub use coordinator::{Flight, RequestCoordinator, SingleFlight};
pub use debrid::{
    AdapterFactory, DebridAdapter, DebridCredentials, DebridError, DebridResult,
    DebridServiceKind, HttpAdapterFactory, ResolutionRequest, ResolvedStream,
};
pub use file_matcher::{match_file, select_movie_file};
pub use queues::{QueueStats, ScanQueueConfig, SerializedQueue};
pub use rate_limiter::{RateLimitConfig, RateLimitedClient, RetryPolicy};
pub use resolution::{PackResolution, ResolutionService, ResolutionSettings};
