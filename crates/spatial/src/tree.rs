//! Arena-allocated `2^D`-ary spatial tree.
//!
//! Nodes are stored contiguously in a `Vec` and refer to their children by
//! [`NodeId`], so a rebuild is just clearing the arena and filling it again.
//! Leaves hold indices into the caller's particle storage rather than copies.
//!
//! The root cell is the tight bounding box of the input positions. A node
//! splits into `2^D` equal-volume children at its cell centre while it holds
//! more than `leaf_threshold` particles and is shallower than `max_depth`;
//! children that would be empty are never created.

use std::io::{self, Write};

use crate::bbox::BoundingBox;

/// Index into the node arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    fn new(index: usize) -> Self {
        debug_assert!(index < u32::MAX as usize, "NodeId overflow");
        NodeId(index as u32)
    }

    /// Position of the node in the arena.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Shape parameters for tree construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeParams {
    /// Deepest level a node may reach (root is depth 0)
    pub max_depth: u32,
    /// A node holding more particles than this is split
    pub leaf_threshold: usize,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: 16,
            leaf_threshold: 16,
        }
    }
}

/// One node of the tree.
#[derive(Debug, Clone)]
pub struct TreeNode<const D: usize> {
    /// Cell covered by the node (equal-volume subdivision of the root)
    pub bbox: BoundingBox<D>,
    /// Tight box around the particles below this node
    pub extent: BoundingBox<D>,
    /// Depth below the root
    pub depth: u32,
    /// Number of particles below this node
    pub count: usize,
    /// Largest smoothing length below this node
    pub max_smoothing_length: f64,
    children: Vec<NodeId>,
    entities: Vec<u32>,
}

impl<const D: usize> TreeNode<D> {
    /// `true` for nodes without children.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Non-empty children, in orthant order.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Particle indices held by a leaf (empty for internal nodes).
    pub fn entities(&self) -> &[u32] {
        &self.entities
    }
}

/// Spatial tree over a slice of positions.
#[derive(Debug, Clone)]
pub struct Tree<const D: usize> {
    nodes: Vec<TreeNode<D>>,
    params: TreeParams,
    entity_count: usize,
}

impl<const D: usize> Tree<D> {
    /// Empty tree.
    pub fn new(params: TreeParams) -> Self {
        Self {
            nodes: Vec::new(),
            params,
            entity_count: 0,
        }
    }

    /// Build a tree over every position. `radii[i]` is the smoothing length of
    /// particle `i` and feeds the per-node maximum.
    pub fn build(params: TreeParams, positions: &[[f64; D]], radii: &[f64]) -> Self {
        let mut tree = Self::new(params);
        tree.rebuild(positions, radii);
        tree
    }

    /// Clear the arena and rebuild over new positions.
    pub fn rebuild(&mut self, positions: &[[f64; D]], radii: &[f64]) {
        assert_eq!(positions.len(), radii.len(), "one radius per position");
        assert!(positions.len() <= u32::MAX as usize, "too many particles for u32 indices");
        self.nodes.clear();
        self.entity_count = positions.len();
        if positions.is_empty() {
            return;
        }
        let root_box = BoundingBox::from_points(positions.iter());
        let indices: Vec<u32> = (0..positions.len() as u32).collect();
        self.insert_node(root_box, 0, indices, positions, radii);
        tracing::trace!(
            nodes = self.nodes.len(),
            particles = positions.len(),
            "tree rebuilt"
        );
    }

    fn insert_node(
        &mut self,
        bbox: BoundingBox<D>,
        depth: u32,
        indices: Vec<u32>,
        positions: &[[f64; D]],
        radii: &[f64],
    ) -> NodeId {
        let mut extent = BoundingBox::empty();
        let mut max_h = 0.0_f64;
        for &i in &indices {
            extent.include(&positions[i as usize]);
            max_h = max_h.max(radii[i as usize]);
        }

        let id = NodeId::new(self.nodes.len());
        self.nodes.push(TreeNode {
            bbox,
            extent,
            depth,
            count: indices.len(),
            max_smoothing_length: max_h,
            children: Vec::new(),
            entities: Vec::new(),
        });

        if indices.len() <= self.params.leaf_threshold || depth >= self.params.max_depth {
            self.nodes[id.index()].entities = indices;
            return id;
        }

        // Stable partition keeps the input order inside every child.
        let mut buckets: Vec<Vec<u32>> = vec![Vec::new(); 1 << D];
        for i in indices {
            buckets[bbox.orthant(&positions[i as usize])].push(i);
        }

        let mut children = Vec::new();
        for (orthant, bucket) in buckets.into_iter().enumerate() {
            if bucket.is_empty() {
                continue;
            }
            children.push(self.insert_node(bbox.child(orthant), depth + 1, bucket, positions, radii));
        }
        self.nodes[id.index()].children = children;
        id
    }

    /// Root node, `None` for an empty tree.
    pub fn root(&self) -> Option<NodeId> {
        if self.nodes.is_empty() {
            None
        } else {
            Some(NodeId::new(0))
        }
    }

    /// Node by handle.
    pub fn node(&self, id: NodeId) -> &TreeNode<D> {
        &self.nodes[id.index()]
    }

    /// All nodes in arena (pre-order) order.
    pub fn nodes(&self) -> &[TreeNode<D>] {
        &self.nodes
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of particles the tree was built over.
    pub fn entity_count(&self) -> usize {
        self.entity_count
    }

    /// Construction parameters.
    pub fn params(&self) -> TreeParams {
        self.params
    }

    /// Tight box around every particle, empty for an empty tree.
    pub fn extent(&self) -> BoundingBox<D> {
        self.root()
            .map(|root| self.node(root).extent)
            .unwrap_or_else(BoundingBox::empty)
    }

    /// Handles of all leaves, in pre-order.
    pub fn leaves(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_leaf())
            .map(|(i, _)| NodeId::new(i))
    }

    /// Top-level nodes used as branches: every node at `branch_depth`, plus
    /// leaves that end above it. Together they cover every particle exactly
    /// once.
    pub fn branches(&self, branch_depth: u32) -> Vec<NodeId> {
        let mut out = Vec::new();
        let Some(root) = self.root() else {
            return out;
        };
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let node = self.node(id);
            if node.depth >= branch_depth || node.is_leaf() {
                out.push(id);
            } else {
                stack.extend(node.children().iter().rev().copied());
            }
        }
        out
    }

    /// Append every particle index below `id` to `out`.
    pub fn collect_entities(&self, id: NodeId, out: &mut Vec<u32>) {
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            let node = self.node(id);
            if node.is_leaf() {
                out.extend_from_slice(node.entities());
            } else {
                stack.extend(node.children().iter().rev().copied());
            }
        }
    }

    /// Write the tree as a Graphviz digraph. Vertices are labelled with
    /// depth, particle count and cell box; leaves are drawn as boxes.
    pub fn write_dot<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "digraph tree {{")?;
        writeln!(out, "  node [shape=ellipse];")?;
        for (i, node) in self.nodes.iter().enumerate() {
            let shape = if node.is_leaf() { "box" } else { "ellipse" };
            writeln!(
                out,
                "  n{} [shape={}, label=\"d{} n={}\\n{:?}..{:?}\"];",
                i, shape, node.depth, node.count, node.bbox.min, node.bbox.max
            )?;
            for child in node.children() {
                writeln!(out, "  n{} -> n{};", i, child.index())?;
            }
        }
        writeln!(out, "}}")
    }
}
