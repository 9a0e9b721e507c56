//! Conflict resolution between divergent heads.
//!
//! - [`MergePolicy`] - built-in policies plus resolver-backed variants
//! - [`resolve_heads`] - the coordinator loop that merges heads pairwise

mod coordinator;
mod policy;

pub use coordinator::{resolve_heads, MergeReport, Resolution};
pub use policy::{
    three_way_merge, ConflictResolver, FnResolver, MergeConflict, MergeDecision, MergePolicy,
    ThreeWayMerge,
};
