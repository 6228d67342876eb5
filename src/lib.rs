#![deny(rust_2024_compatibility)]
#![deny(clippy::explicit_iter_loop, clippy::manual_let_else)]
#![allow(
    clippy::cast_possible_truncation, // Durations and sizes stay well inside u64
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions, // e.g. BridgeError in bridge
    clippy::must_use_candidate
)]

pub mod app;
pub mod bridge;
pub mod convert;
pub mod domain;
pub mod metrics;
pub mod offsets;
pub mod registry;
pub mod task;

pub use app::{App, Config};
pub use bridge::{Bridge, BridgeConfig, BridgeError, BridgeRecord, FlushOutcome, FlushState};
pub use domain::{KeyValue, SourceOffset, SourcePartition, SourceRecord};
pub use registry::Registry;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
