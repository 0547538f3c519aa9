//! # ShelfSync Testkit
//!
//! Test utilities for ShelfSync.
//!
//! This crate provides:
//! - Test fixtures: temporary blob stores and simulated devices sharing
//!   one in-memory remote
//! - Property-based test generators using proptest
//! - Fuzz testing harnesses
//! - Stress testing utilities
//! - Test log capture through `tracing-subscriber`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use shelfsync_testkit::prelude::*;
//!
//! #[test]
//! fn two_devices_converge() {
//!     let remote = shared_remote();
//!     let laptop = TestDevice::new("laptop", &remote);
//!     let phone = TestDevice::new("phone", &remote);
//!     laptop.create("book-1", 100, Some(b"cover"));
//!     laptop.sync();
//!     phone.sync();
//!     assert_eq!(laptop.item("book-1"), phone.item("book-1"));
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod fuzz;
pub mod generators;
pub mod stress;

use std::sync::Once;
use tracing_subscriber::EnvFilter;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::fuzz::*;
    pub use crate::generators::*;
    pub use crate::init_test_tracing;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use fuzz::*;
pub use generators::*;
pub use stress::*;

static TRACING: Once = Once::new();

/// Routes engine logs to the test harness output.
///
/// Honors `RUST_LOG`; defaults to `warn`. Safe to call from every test.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
