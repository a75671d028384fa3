//! Bucket tree
//!
//! - `node`: `TreeNode` and its load state
//! - `builder`: pure listing/snapshot to node conversion
//! - `store`: arena keyed by path with per-node copy-on-write
//! - `sync`: `TreeSynchronizer`, the stateful controller

pub mod builder;
pub mod node;
pub mod store;
pub mod sync;

pub use builder::{build_siblings, build_tree};
pub use node::{NodeState, TreeNode};
pub use store::TreeStore;
pub use sync::{ExpandOutcome, TreeSynchronizer};
