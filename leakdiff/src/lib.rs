
#![allow(unused_parens)]

pub mod error;
pub mod arch;
pub mod events;
pub mod channel;
pub mod cache;
pub mod harness;
pub mod victim;
pub mod verdict;
pub mod host;
pub mod stats;
pub mod util;

pub use crate::error::{ LeakError, Result };
pub use crate::channel::{ Channel, SimChannel, SimCosts, PerfChannel };
pub use crate::cache::{
    CacheGeometry,
    CacheState,
    ProbeBuffer,
    SetRange,
    RangePreset,
    Comparison,
};
pub use crate::harness::*;
pub use crate::victim::{ Block, Cmp, Victim };
pub use crate::verdict::{ Verdict, diff };
pub use crate::util::LeakEnv;
