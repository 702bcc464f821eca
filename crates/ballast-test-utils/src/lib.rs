//! Test utilities and fixtures for Ballast development.
//!
//! - [`init_tracing`] installs a test-friendly `tracing` subscriber once.
//! - [`ops`] generates seeded, reproducible buffer operation streams.
//! - [`recording`] provides a strategy that records every init/dispose.

#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod ops;
pub mod recording;

use std::sync::Once;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use ops::{op_stream, ListOp};
pub use recording::{AllocEvent, RecordingAllocator};

static TRACING: Once = Once::new();

/// Install a compact fmt subscriber writing through the test harness.
///
/// Honours `RUST_LOG`; defaults to `debug`. Safe to call from every test.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().compact().with_test_writer())
            .try_init();
    });
}
