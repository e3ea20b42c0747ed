//! Peer liveness prober library

pub mod config;
pub mod history;
pub mod lifecycle;
pub mod observability;
pub mod pipeline;
pub mod probe;
pub mod resilience;
pub mod store;
pub mod target;

pub use config::schema::ProberConfig;
pub use lifecycle::Shutdown;
pub use pipeline::{PipelineState, PipelineSupervisor};
