//! ==============================================================================
//! lib.rs - lux host library surface
//! ==============================================================================
//!
//! layout (leaf first):
//!     - domain.rs: Reading, Snapshot
//!     - store.rs: observable reading store
//!     - sensor.rs: GET /lux client (LuxSource trait)
//!     - export.rs: csv spreadsheet export
//!     - persist.rs: local snapshot storage
//!     - poll.rs: start/stop state machine and session timers
//!     - setup.rs: POST /setip device configuration
//!     - server.rs: dashboard + api
//!     - config.rs: host.toml
//!
//! main.rs wires these together; tests/ drives them end to end.
//!
//! ==============================================================================

pub mod config;
pub mod domain;
pub mod error;
pub mod export;
pub mod persist;
pub mod poll;
pub mod sensor;
pub mod server;
pub mod setup;
pub mod store;

pub use domain::{Reading, RecordedReading, Snapshot};
pub use poll::{PollController, PollSettings, PollState};
pub use store::ReadingStore;
