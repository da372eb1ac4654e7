//! Scene container.
//!
//! Nodes live in a [`SlotMap`] and link to each other by [`NodeHandle`].
//! The renderer only reads the scene; world matrices are produced by
//! [`Scene::update_world_matrices`] (or set directly) before rendering.

use glam::{Mat4, Vec3};
use slotmap::SlotMap;

use crate::resources::{Shared, Texture};

use super::node::{Node, NodeHandle};

#[derive(Debug, Clone)]
pub enum Background {
    Color(Vec3),
    /// A 2D texture stretched over the viewport.
    Texture(Shared<Texture>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fog {
    Linear { color: Vec3, near: f32, far: f32 },
    Exp2 { color: Vec3, density: f32 },
}

impl Fog {
    #[must_use]
    pub fn color(&self) -> Vec3 {
        match self {
            Self::Linear { color, .. } | Self::Exp2 { color, .. } => *color,
        }
    }
}

#[derive(Debug, Default)]
pub struct Scene {
    nodes: SlotMap<NodeHandle, Node>,
    roots: Vec<NodeHandle>,
    pub background: Option<Background>,
    pub fog: Option<Fog>,
    /// Environment map applied to materials that have none of their own.
    pub environment: Option<Shared<Texture>>,
}

impl Scene {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a root node.
    pub fn add(&mut self, node: Node) -> NodeHandle {
        let handle = self.nodes.insert(node);
        self.roots.push(handle);
        handle
    }

    /// Adds `node` as the last child of `parent`. Falls back to a root node
    /// when `parent` is stale.
    pub fn add_child(&mut self, parent: NodeHandle, mut node: Node) -> NodeHandle {
        if !self.nodes.contains_key(parent) {
            return self.add(node);
        }
        node.parent = Some(parent);
        let handle = self.nodes.insert(node);
        if let Some(p) = self.nodes.get_mut(parent) {
            p.children.push(handle);
        }
        handle
    }

    /// Moves an existing node under `parent`.
    pub fn attach(&mut self, child: NodeHandle, parent: NodeHandle) {
        if child == parent || !self.nodes.contains_key(parent) || self.is_ancestor(child, parent) {
            return;
        }
        self.detach(child);
        if let Some(node) = self.nodes.get_mut(child) {
            node.parent = Some(parent);
            self.roots.retain(|&r| r != child);
            if let Some(p) = self.nodes.get_mut(parent) {
                p.children.push(child);
            }
        }
    }

    /// Unlinks a node from its parent, making it a root.
    pub fn detach(&mut self, child: NodeHandle) {
        let Some(parent) = self.nodes.get(child).and_then(|n| n.parent) else {
            return;
        };
        if let Some(p) = self.nodes.get_mut(parent) {
            p.children.retain(|&c| c != child);
        }
        if let Some(node) = self.nodes.get_mut(child) {
            node.parent = None;
        }
        self.roots.push(child);
    }

    /// Removes a node and its whole subtree. Returns the removed nodes.
    pub fn remove(&mut self, handle: NodeHandle) -> Vec<Node> {
        self.detach(handle);
        self.roots.retain(|&r| r != handle);

        let mut removed = Vec::new();
        let mut stack = vec![handle];
        while let Some(h) = stack.pop() {
            if let Some(node) = self.nodes.remove(h) {
                stack.extend_from_slice(&node.children);
                removed.push(node);
            }
        }
        removed
    }

    fn is_ancestor(&self, ancestor: NodeHandle, mut node: NodeHandle) -> bool {
        while let Some(parent) = self.nodes.get(node).and_then(|n| n.parent) {
            if parent == ancestor {
                return true;
            }
            node = parent;
        }
        false
    }

    #[inline]
    #[must_use]
    pub fn get(&self, handle: NodeHandle) -> Option<&Node> {
        self.nodes.get(handle)
    }

    #[inline]
    pub fn get_mut(&mut self, handle: NodeHandle) -> Option<&mut Node> {
        self.nodes.get_mut(handle)
    }

    #[inline]
    #[must_use]
    pub fn roots(&self) -> &[NodeHandle] {
        &self.roots
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeHandle, &Node)> {
        self.nodes.iter()
    }

    /// Propagates local transforms to world matrices, parents first.
    ///
    /// Nodes with `matrix_auto_update == false` keep their world matrix and
    /// still act as parents for their children.
    pub fn update_world_matrices(&mut self) {
        let mut stack: Vec<(NodeHandle, Mat4)> =
            self.roots.iter().rev().map(|&r| (r, Mat4::IDENTITY)).collect();
        while let Some((handle, parent_world)) = stack.pop() {
            let Some(node) = self.nodes.get_mut(handle) else {
                continue;
            };
            if node.matrix_auto_update {
                node.world_matrix = parent_world * node.local_matrix();
            }
            let world = node.world_matrix;
            stack.extend(node.children.iter().rev().map(|&c| (c, world)));
        }
    }
}
