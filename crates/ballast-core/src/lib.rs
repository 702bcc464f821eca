//! Core types for the Ballast native buffer framework.
//!
//! This is the leaf crate with zero internal dependencies. It defines the
//! vocabulary shared by every other Ballast crate: allocator labels, error
//! types, buffer identifiers, and configuration.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod id;
pub mod label;

pub use config::{leak_detection_mode, set_leak_detection_mode, LeakDetectionMode, ListConfig};
pub use error::{AllocError, BufferError};
pub use id::BufferId;
pub use label::AllocatorLabel;
