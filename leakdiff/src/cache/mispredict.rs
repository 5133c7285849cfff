//! Mispredict mode: snapshots that only record how many branches the victim
//! mispredicted.

use crate::cache::CacheState;
use crate::channel::Channel;

/// Record the current mispredict count in `state`.
pub fn start_branch_count(channel: &mut impl Channel, state: &mut CacheState) {
    channel.barrier();
    state.mispredicts = channel.branch_mispredicts();
    channel.barrier();
}

/// Replace the count recorded by [`start_branch_count`] with the number of
/// mispredicts since.
pub fn stop_branch_count(channel: &mut impl Channel, state: &mut CacheState) {
    channel.barrier();
    let now = channel.branch_mispredicts();
    state.mispredicts = now.wrapping_sub(state.mispredicts);
    channel.barrier();
}

/// True iff the mispredict counts differ.
pub fn compare_mispredicts(a: &CacheState, b: &CacheState) -> bool {
    a.mispredicts != b.mispredicts
}
