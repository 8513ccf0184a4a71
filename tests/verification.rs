//! Verification tests.
//!
//! - `replay`: reconstruction, collapse and checkpoints over a stored game
//! - `fuzz`: the random-walk driver against well-behaved and broken titles
//! - `property`: proptest properties over arbitrary legal games

#[path = "common/mod.rs"]
mod common;

mod verification {
    pub mod fuzz;
    pub mod property;
    pub mod replay;
}
