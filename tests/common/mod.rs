//! Common test infrastructure shared across integration tests.
//!
//! This module provides:
//! - `stubs`: the `Counter` rules stub
//! - `test_utils`: a seated `Table` and sink helpers
//!
//! # Usage
//!
//! From any integration test file:
//! ```ignore
//! #[path = "common/mod.rs"]
//! mod common;
//! use common::{Table, GAME};
//! ```

pub mod stubs;
pub mod test_utils;

// Not every test binary uses every helper.
#[allow(unused_imports)]
pub use stubs::{Counter, BLACK, WHITE};
#[allow(unused_imports)]
pub use test_utils::{shown_total, views, Table, GAME, SEED};
