//! Context identifiers
//!
//! Every context (launch context or expression node) gets a unique id
//! for the lifetime of a pass. Ids are also how dependency edges refer
//! to nodes, keeping the edge sets disjoint from the ownership tree.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a context within a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic id allocator. Owned by the scope tree so fan-out can mint
/// ids for clones mid-pass.
#[derive(Debug, Default)]
pub struct IdProvider {
    next: AtomicU64,
}

impl IdProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> NodeId {
        NodeId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_monotonic() {
        let ids = IdProvider::new();
        let a = ids.next_id();
        let b = ids.next_id();
        let c = ids.next_id();
        assert!(a < b && b < c);
    }
}
