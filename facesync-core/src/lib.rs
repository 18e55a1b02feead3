//! facesync-core: shared plumbing for the facesync workspace
//!
//! - Core error type that crate-specific errors convert into
//! - Configuration loading (JSON, TOML or YAML) and environment overrides
//! - Tracing subscriber setup
//! - Injectable clock and jitter sources so timing and randomness stay testable

pub mod error;
pub mod config;
pub mod telemetry;
pub mod clock;
pub mod jitter;

pub use error::{Error, Result};
pub use config::{ConfigError, ConfigFormat};
pub use telemetry::{init_tracing, LoggingConfig};
pub use clock::{Clock, ManualClock, SystemClock};
pub use jitter::{JitterSource, NoJitter, SeededJitter};
