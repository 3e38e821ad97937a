//! The package-cache engine boundary.
//!
//! The slave never resolves dependencies, parses repositories, or
//! fetches files itself — an external engine owns all of that. This
//! crate pins down the narrow call surface the slave consumes
//! ([`CacheEngine`] and its observers), the data that crosses it
//! ([`PackageState`], [`FetchProgress`]), the pure upgrade
//! classification shared by every command reply, and a scripted
//! in-memory engine ([`sim::SimEngine`]) for tests and `--engine sim`
//! runs.

pub mod config;
pub mod error;
pub mod sim;
pub mod status;
pub mod traits;
pub mod types;

pub use config::EngineConfig;
pub use error::EngineError;
pub use status::{classify_upgrades, UpgradeStatus};
pub use traits::{CacheEngine, FetchObserver, OpProgress};
pub use types::{FetchOutcome, FetchProgress, PackageState};
