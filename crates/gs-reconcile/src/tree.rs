//! Snapshot of the remote path tree, indexed by id and by path

use std::collections::HashMap;

use gs_common::{path, HttpMethod, ResourceNode};

#[derive(Debug, Clone, Default)]
pub struct ResourceTree {
    nodes: HashMap<String, ResourceNode>,
    by_path: HashMap<String, String>,
    children: HashMap<String, usize>,
}

impl ResourceTree {
    pub fn new(nodes: Vec<ResourceNode>) -> Self {
        let mut tree = Self::default();
        for node in nodes {
            tree.insert(node);
        }
        tree
    }

    pub fn insert(&mut self, node: ResourceNode) {
        if let Some(parent_id) = &node.parent_id {
            *self.children.entry(parent_id.clone()).or_default() += 1;
        }
        self.by_path.insert(node.path.clone(), node.id.clone());
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn root(&self) -> Option<&ResourceNode> {
        self.find(path::ROOT)
    }

    pub fn get(&self, id: &str) -> Option<&ResourceNode> {
        self.nodes.get(id)
    }

    pub fn find(&self, path: &str) -> Option<&ResourceNode> {
        self.by_path.get(path).and_then(|id| self.nodes.get(id))
    }

    pub fn has_method(&self, path: &str, method: HttpMethod) -> bool {
        self.find(path).is_some_and(|n| n.methods.contains(&method))
    }

    pub fn child_count(&self, id: &str) -> usize {
        self.children.get(id).copied().unwrap_or(0)
    }

    /// No methods and no children: safe to delete
    pub fn is_empty_leaf(&self, node: &ResourceNode) -> bool {
        node.methods.is_empty() && self.child_count(&node.id) == 0
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
