//! Arena store for the bucket tree.
//!
//! Nodes are kept in a map keyed by their path id, each behind its own `Arc`.
//! Cloning the store is shallow; a write goes through `Arc::make_mut` on the
//! touched node only, so untouched nodes stay pointer-identical between two
//! snapshots of the store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::warn;

use super::node::TreeNode;
use crate::paths;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeStore {
    nodes: HashMap<String, Arc<TreeNode>>,
}

impl Default for TreeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeStore {
    /// Store holding only an unloaded root
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(paths::ROOT_ID.to_string(), Arc::new(TreeNode::root()));
        Self { nodes }
    }

    pub fn root(&self) -> &TreeNode {
        // the root is inserted by `new` and never removed
        self.nodes
            .get(paths::ROOT_ID)
            .map(Arc::as_ref)
            .unwrap_or_else(|| unreachable!("tree store without root"))
    }

    pub fn get(&self, id: &str) -> Option<&TreeNode> {
        self.nodes.get(id).map(Arc::as_ref)
    }

    /// Shared handle of a node, for identity checks across snapshots
    pub fn get_shared(&self, id: &str) -> Option<&Arc<TreeNode>> {
        self.nodes.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut TreeNode> {
        self.nodes.get_mut(id).map(Arc::make_mut)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Number of nodes, root included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.root().children.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &TreeNode> {
        self.nodes.values().map(Arc::as_ref)
    }

    /// Children of `id` in display order
    pub fn children(&self, id: &str) -> Vec<&TreeNode> {
        self.get(id)
            .map(|node| node.children.iter().filter_map(|c| self.get(c)).collect())
            .unwrap_or_default()
    }

    /// Replace the children of `parent_id` with `siblings`.
    ///
    /// Directories already present keep their node (and loaded subtree);
    /// objects are replaced by the incoming entry. Children missing from
    /// `siblings` are removed with their subtrees. Returns the new child
    /// count.
    pub fn replace_children(&mut self, parent_id: &str, siblings: Vec<TreeNode>) -> usize {
        let Some(parent) = self.nodes.get(parent_id) else {
            return 0;
        };
        let old_children = parent.children.clone();

        let mut seen: HashSet<String> = HashSet::new();
        let mut child_ids: Vec<String> = Vec::with_capacity(siblings.len());
        let mut incoming: Vec<TreeNode> = Vec::new();

        for mut node in siblings {
            if node.id == parent_id || !seen.insert(node.id.clone()) {
                continue;
            }
            if let Some(existing) = self.nodes.get(&node.id) {
                if existing.parent_id.as_deref() != Some(parent_id) {
                    warn!(
                        "[Tree] {} already lives under {:?}, not adding it to {}",
                        node.id, existing.parent_id, parent_id
                    );
                    continue;
                }
                if existing.is_directory && node.is_directory {
                    child_ids.push(node.id);
                    continue;
                }
            }
            node.parent_id = Some(parent_id.to_string());
            child_ids.push(node.id.clone());
            incoming.push(node);
        }

        for stale in old_children.iter().filter(|id| !seen.contains(*id)) {
            self.remove_subtree(stale);
        }
        for node in incoming {
            self.nodes.insert(node.id.clone(), Arc::new(node));
        }

        let count = child_ids.len();
        if let Some(parent) = self.get_mut(parent_id) {
            parent.children = child_ids;
        }
        count
    }

    /// Append `siblings` after the current children of `parent_id`.
    ///
    /// A sibling whose path is already among the children is dropped. Returns
    /// how many nodes were added.
    pub fn append_children(&mut self, parent_id: &str, siblings: Vec<TreeNode>) -> usize {
        let Some(parent) = self.nodes.get(parent_id) else {
            return 0;
        };
        let mut existing: HashSet<String> = parent.children.iter().cloned().collect();

        let mut added: Vec<String> = Vec::new();
        for mut node in siblings {
            if node.id == parent_id || !existing.insert(node.id.clone()) {
                continue;
            }
            if self.nodes.contains_key(&node.id) {
                warn!("[Tree] {} already present elsewhere, not appending to {}", node.id, parent_id);
                continue;
            }
            node.parent_id = Some(parent_id.to_string());
            added.push(node.id.clone());
            self.nodes.insert(node.id.clone(), Arc::new(node));
        }

        let count = added.len();
        if let Some(parent) = self.get_mut(parent_id) {
            parent.children.extend(added);
        }
        count
    }

    /// Remove a node and all its descendants. The root cannot be removed.
    pub fn remove_subtree(&mut self, id: &str) -> usize {
        if paths::is_root(id) {
            return 0;
        }
        let Some(node) = self.nodes.get(id) else {
            return 0;
        };
        let parent_id = node.parent_id.clone();

        let removed = self.remove_descendants(id) + usize::from(self.nodes.remove(id).is_some());
        if let Some(parent) = parent_id.and_then(|p| self.nodes.get_mut(&p)) {
            if parent.children.iter().any(|c| c == id) {
                Arc::make_mut(parent).children.retain(|c| c != id);
            }
        }
        removed
    }

    fn remove_descendants(&mut self, id: &str) -> usize {
        let mut stack: Vec<String> = self
            .nodes
            .get(id)
            .map(|n| n.children.clone())
            .unwrap_or_default();
        let mut removed = 0;
        while let Some(child) = stack.pop() {
            if let Some(node) = self.nodes.remove(&child) {
                stack.extend(node.children.iter().cloned());
                removed += 1;
            }
        }
        if let Some(node) = self.get_mut(id) {
            node.children.clear();
        }
        removed
    }

    /// Parent chain of `id`, root first, `id` excluded
    pub fn ancestors(&self, id: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = self.get(id).and_then(|n| n.parent_id.clone());
        while let Some(parent_id) = current {
            current = self.get(&parent_id).and_then(|n| n.parent_id.clone());
            chain.push(parent_id);
        }
        chain.reverse();
        chain
    }

    /// Visible nodes in tree order with their nesting level, honouring the
    /// expansion flag of each directory. The root is included at level 0.
    pub fn visible_nodes(&self) -> Vec<(usize, &TreeNode)> {
        let mut result = Vec::new();
        let mut stack: Vec<(usize, &str)> = vec![(0, paths::ROOT_ID)];
        while let Some((level, id)) = stack.pop() {
            let Some(node) = self.get(id) else {
                continue;
            };
            result.push((level, node));
            if node.is_directory && node.expanded {
                for child in node.children.iter().rev() {
                    stack.push((level + 1, child.as_str()));
                }
            }
        }
        result
    }

    /// Check parent/child consistency and single ownership of every node
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        let mut owners: HashMap<&str, &str> = HashMap::new();
        for node in self.nodes() {
            for child in &node.children {
                assert!(self.contains(child), "{} lists missing child {}", node.id, child);
                let previous = owners.insert(child.as_str(), node.id.as_str());
                assert!(previous.is_none(), "{} owned twice", child);
                assert_eq!(
                    self.get(child).and_then(|c| c.parent_id.as_deref()),
                    Some(node.id.as_str())
                );
            }
        }
        for node in self.nodes() {
            if !node.is_root() {
                assert!(owners.contains_key(node.id.as_str()), "{} is orphaned", node.id);
            }
        }
    }
}
