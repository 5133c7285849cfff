//! Experiments for the `leakdiff` engine.
//!
//! Each binary in this crate selects a platform with `--platform` and then
//! drives a [`leakdiff::LeakHarness`] (or, for `flush-reload`, a
//! [`leakdiff::host::FlushReload`]):
//!
//! - `diff`: compare the two input classes of a [`catalog::Experiment`]
//! - `observe`: print the cache state left by a single class
//! - `flush-reload`: profile the lines around the GF(2) squaring table

pub mod catalog;
pub mod gf2;
pub mod cli;
