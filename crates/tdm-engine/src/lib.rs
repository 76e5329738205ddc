//! Relationship-aware record synchronization.
//!
//! The engine resolves each template operation into ordered upsert plans,
//! fetches and flattens source records, masks them, and dispatches them as
//! adaptively sized concurrent bulk jobs against the target.

pub mod engine;
pub mod errors;
pub mod flatten;
pub mod masking;
pub mod memory;
pub mod model;
pub mod platform;
pub mod resolver;
pub mod scheduler;

pub use engine::SyncEngine;
pub use errors::{SyncError, SyncResult};
pub use flatten::{flatten, flatten_records, reshape};
pub use masking::MaskApplier;
pub use memory::{JobLogEntry, MemoryPlatform};
pub use model::{EngineOptions, OperationReport, OperationState, PassReport, RunReport};
pub use platform::{BulkJobTarget, PlatformError, QueryRequest, QuerySource};
pub use resolver::{
    PlanPass, UpsertPlan, build_plans, not_null_filter, partition_relationships, rewrite_fields,
};
pub use scheduler::{
    BatchRequest, BatchScheduler, MAX_BATCH, MIN_BATCH, chunk_size, split_chunks, thread_count,
};
