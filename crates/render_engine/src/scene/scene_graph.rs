//! Scene graph
//!
//! Nodes live in a generational [`SlotMap`]. Children are owned through the
//! parent's child list; the parent link is a plain [`NodeId`] that confers no
//! ownership, so there are no reference cycles and a stale link is detected
//! by the slot map's generation check instead of dangling.

use std::sync::Arc;

use slotmap::{new_key_type, SlotMap};

use crate::foundation::math::Mat4;
use crate::render::mesh::GpuMesh;

new_key_type! {
    /// Identifier of a node in a [`SceneGraph`]
    pub struct NodeId;
}

/// A node with a transform and an optional mesh
#[derive(Debug, Clone)]
pub struct SceneNode {
    /// Debug name
    pub name: String,
    /// Transform relative to the parent
    pub local_transform: Mat4,
    /// Mesh drawn at this node
    pub mesh: Option<Arc<GpuMesh>>,
    /// Whether the node and its subtree are drawn
    pub visible: bool,
    world_transform: Mat4,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl SceneNode {
    /// Create an empty node with an identity transform
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            local_transform: Mat4::identity(),
            mesh: None,
            visible: true,
            world_transform: Mat4::identity(),
            parent: None,
            children: Vec::new(),
        }
    }

    /// Builder-style local transform
    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.local_transform = transform;
        self
    }

    /// Builder-style mesh
    pub fn with_mesh(mut self, mesh: Arc<GpuMesh>) -> Self {
        self.mesh = Some(mesh);
        self
    }

    /// World transform as of the last [`SceneGraph::update_world_transforms`]
    pub fn world_transform(&self) -> &Mat4 {
        &self.world_transform
    }

    /// Parent node, if any
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Child nodes
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

/// Hierarchy of scene nodes
#[derive(Debug, Default)]
pub struct SceneGraph {
    nodes: SlotMap<NodeId, SceneNode>,
    roots: Vec<NodeId>,
}

impl SceneGraph {
    /// Create an empty scene
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node under `parent`, or as a root
    ///
    /// A stale parent id inserts the node as a root.
    pub fn add_node(&mut self, mut node: SceneNode, parent: Option<NodeId>) -> NodeId {
        let parent = parent.filter(|p| self.nodes.contains_key(*p));
        node.parent = parent;
        node.children.clear();
        let id = self.nodes.insert(node);

        match parent.and_then(|p| self.nodes.get_mut(p)) {
            Some(parent_node) => parent_node.children.push(id),
            None => self.roots.push(id),
        }
        id
    }

    /// Remove a node and its whole subtree, returning the number of nodes removed
    pub fn remove_node(&mut self, id: NodeId) -> usize {
        let Some(parent) = self.nodes.get(id).map(|n| n.parent) else {
            return 0;
        };

        match parent.and_then(|p| self.nodes.get_mut(p)) {
            Some(parent_node) => parent_node.children.retain(|&c| c != id),
            None => self.roots.retain(|&r| r != id),
        }

        let mut removed = 0;
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.remove(current) {
                stack.extend(node.children);
                removed += 1;
            }
        }
        removed
    }

    /// Node lookup
    pub fn node(&self, id: NodeId) -> Option<&SceneNode> {
        self.nodes.get(id)
    }

    /// Mutable node lookup
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut SceneNode> {
        self.nodes.get_mut(id)
    }

    /// Replace a node's local transform
    pub fn set_local_transform(&mut self, id: NodeId, transform: Mat4) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.local_transform = transform;
        }
    }

    /// Root nodes in insertion order
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the scene has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Recompute every world transform as `parent_world × local`, depth first
    pub fn update_world_transforms(&mut self) {
        let mut stack: Vec<(NodeId, Mat4)> = self
            .roots
            .iter()
            .rev()
            .map(|&id| (id, Mat4::identity()))
            .collect();

        while let Some((id, parent_world)) = stack.pop() {
            let Some(node) = self.nodes.get_mut(id) else { continue };
            node.world_transform = parent_world * node.local_transform;
            let world = node.world_transform;
            stack.extend(node.children.iter().rev().map(|&child| (child, world)));
        }
    }

    /// Visit visible nodes with a mesh in depth-first order
    ///
    /// A hidden node hides its subtree. World transforms are used as they
    /// are; call [`SceneGraph::update_world_transforms`] first.
    pub fn visit_meshes(&self, mut visit: impl FnMut(NodeId, &Mat4, &Arc<GpuMesh>)) {
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();

        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(id) else { continue };
            if !node.visible {
                continue;
            }
            if let Some(mesh) = &node.mesh {
                visit(id, &node.world_transform, mesh);
            }
            stack.extend(node.children.iter().rev());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{Point3, Vec3};
    use approx::assert_relative_eq;

    fn translation(x: f32, y: f32, z: f32) -> Mat4 {
        Mat4::new_translation(&Vec3::new(x, y, z))
    }

    #[test]
    fn test_world_transforms_propagate() {
        let mut scene = SceneGraph::new();
        let root = scene.add_node(SceneNode::new("root").with_transform(translation(1.0, 0.0, 0.0)), None);
        let child = scene.add_node(SceneNode::new("child").with_transform(translation(0.0, 2.0, 0.0)), Some(root));
        let grandchild = scene.add_node(
            SceneNode::new("grandchild").with_transform(Mat4::new_scaling(2.0)),
            Some(child),
        );

        scene.update_world_transforms();

        let p = scene.node(grandchild).unwrap().world_transform().transform_point(&Point3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(p, Point3::new(3.0, 2.0, 0.0));
    }

    #[test]
    fn test_transform_change_reflected_after_update() {
        let mut scene = SceneGraph::new();
        let root = scene.add_node(SceneNode::new("root"), None);
        let child = scene.add_node(SceneNode::new("child").with_transform(translation(0.0, 0.0, 1.0)), Some(root));

        scene.update_world_transforms();
        scene.set_local_transform(root, translation(0.0, 5.0, 0.0));
        scene.update_world_transforms();

        let world = scene.node(child).unwrap().world_transform();
        assert_relative_eq!(world[(1, 3)], 5.0);
        assert_relative_eq!(world[(2, 3)], 1.0);
    }

    #[test]
    fn test_remove_detaches_subtree() {
        let mut scene = SceneGraph::new();
        let root = scene.add_node(SceneNode::new("root"), None);
        let child = scene.add_node(SceneNode::new("child"), Some(root));
        let grandchild = scene.add_node(SceneNode::new("grandchild"), Some(child));
        let sibling = scene.add_node(SceneNode::new("sibling"), Some(root));

        assert_eq!(scene.remove_node(child), 2);
        assert!(scene.node(grandchild).is_none());
        assert_eq!(scene.node(root).unwrap().children(), &[sibling]);

        // The stale id does not alias a new node.
        let replacement = scene.add_node(SceneNode::new("new"), None);
        assert_ne!(replacement, child);
        assert_eq!(scene.remove_node(child), 0);
    }

    #[test]
    fn test_stale_parent_becomes_root() {
        let mut scene = SceneGraph::new();
        let gone = scene.add_node(SceneNode::new("gone"), None);
        scene.remove_node(gone);

        let orphan = scene.add_node(SceneNode::new("orphan"), Some(gone));
        assert_eq!(scene.roots(), &[orphan]);
        assert!(scene.node(orphan).unwrap().parent().is_none());
    }
}
