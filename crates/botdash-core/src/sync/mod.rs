//! Client-side synchronization for dashboard frontends.
//!
//! Keeps a local copy of each guild's config and stats, revalidates over the
//! [`port::DashboardApi`], and applies writes optimistically with rollback.

pub mod config;
pub mod port;
pub mod state;
pub mod stats;

pub use config::ConfigSync;
pub use port::DashboardApi;
pub use state::{CachedEntity, SyncPhase};
pub use stats::{PollHandle, StatsSnapshot, StatsSync, DEFAULT_STATS_POLL_INTERVAL};
