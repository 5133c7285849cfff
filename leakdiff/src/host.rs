//! Flush+Reload against data in a running process image.
//!
//! Used to check the methodology against a real routine: the lookup table
//! the routine indexes with secret data is located by fixed offsets from a
//! reference symbol ([`TableLocator`]), the lines around it are flushed,
//! the routine runs, and one line is timed on reload ([`FlushReload`]).
//! Repeating this over every line of a [`ReloadWindow`] produces a
//! [`HitProfile`], which also shows how far the data prefetcher reaches
//! beyond the table.

pub mod locate;
pub mod reload;

pub use locate::*;
pub use reload::*;
