pub mod canonical;
pub mod enrich;
pub mod envelope;
pub mod model;
pub mod repo;
pub mod retry;
pub mod runner;

pub use enrich::{EnrichedJob, Enricher};
pub use model::{Job, JobStatus};
pub use repo::JobsRepo;
pub use runner::{CycleStats, JobRunner};
