//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProberConfig (validated, immutable)
//!     → per-stage sections handed to loader, pool, recorder
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::ChannelConfig;
pub use schema::ExportConfig;
pub use schema::LoaderConfig;
pub use schema::ObservabilityConfig;
pub use schema::ProbeConfig;
pub use schema::ProberConfig;
pub use schema::RecorderConfig;
pub use schema::StoreConfig;
pub use schema::TargetConfig;

pub use loader::{load_config, ConfigError};
pub use validation::{validate_config, ValidationError};
