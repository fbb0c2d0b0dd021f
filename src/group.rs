//! Ordered, duplicate-free groups of nodes.
//!
//! A group addresses the participants of a collective. Its first member is the root that
//! coordinates tag allocation and reductions.

use std::fmt;
use std::slice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::cluster::Node;

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

#[derive(Clone)]
pub struct Group {
    id: usize,
    nodes: Vec<Arc<Node>>,
}

impl Group {
    pub fn new() -> Group {
        Group {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            nodes: Vec::new(),
        }
    }

    /// Builds a group from nodes in the given order; duplicates are dropped.
    pub fn from_nodes<It: IntoIterator<Item = Arc<Node>>>(nodes: It) -> Group {
        let mut g = Group::new();
        g.extend(nodes);
        g
    }

    pub fn single(node: Arc<Node>) -> Group {
        Group::from_nodes(Some(node))
    }

    /// Adds a node at the end. Returns false if it already was a member.
    pub fn push(&mut self, node: Arc<Node>) -> bool {
        if self.contains(&node) {
            return false;
        }
        self.nodes.push(node);
        true
    }

    /// Adds all nodes that are not yet members. Returns true if anything changed.
    pub fn extend<It: IntoIterator<Item = Arc<Node>>>(&mut self, nodes: It) -> bool {
        let mut changed = false;
        for n in nodes {
            changed |= self.push(n);
        }
        changed
    }

    /// A new group with this group's members followed by the other group's remaining members.
    pub fn union(&self, other: &Group) -> Group {
        let mut g = Group::from_nodes(self.nodes.iter().cloned());
        g.extend(other.nodes.iter().cloned());
        g
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, node: &Node) -> bool {
        self.nodes.iter().any(|n| n.rank() == node.rank())
    }

    /// Position of a node within the group.
    pub fn index_of(&self, node: &Node) -> Option<usize> {
        self.nodes.iter().position(|n| n.rank() == node.rank())
    }

    pub fn get(&self, i: usize) -> Option<&Arc<Node>> {
        self.nodes.get(i)
    }

    pub fn root(&self) -> Option<&Arc<Node>> {
        self.nodes.first()
    }

    pub fn iter(&self) -> slice::Iter<'_, Arc<Node>> {
        self.nodes.iter()
    }

    pub fn ranks(&self) -> Vec<usize> {
        self.nodes.iter().map(|n| n.rank()).collect()
    }
}

impl Default for Group {
    fn default() -> Group {
        Group::new()
    }
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Group#{}{:?}", self.id, self.ranks())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::Parameters;
    use crate::transport::local::run_local;

    #[test]
    fn test_membership() {
        run_local(4, Parameters::new().set_workers(1), |c| {
            let n = c.nodes();
            let mut g = Group::from_nodes(vec![n[2].clone(), n[0].clone(), n[2].clone()]);
            assert_eq!(g.ranks(), vec![2, 0]);
            assert!(!g.push(n[0].clone()));
            assert!(g.push(n[3].clone()));
            assert_eq!(g.index_of(&n[3]), Some(2));
            assert_eq!(g.index_of(&n[1]), None);
            assert_eq!(g.root().unwrap().rank(), 2);

            let h = Group::from_nodes(vec![n[1].clone(), n[3].clone()]);
            let u = g.union(&h);
            assert_eq!(u.ranks(), vec![2, 0, 3, 1]);
            assert_eq!(u.iter().map(|n| n.rank()).collect::<Vec<_>>(), u.ranks());
            assert_ne!(u.id(), g.id());
            assert_eq!(g.len(), 3);
            assert!(Group::new().is_empty());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_unique_ids() {
        let a = Group::new();
        let b = Group::new();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }
}
