//! Arena-backed quadtree over the cell grid.
//!
//! The tree shape depends only on the terrain size and is built once when a
//! terrain is bound; heights and weights are read through the surface at
//! visit time, so content edits never touch the tree. Nodes live in a flat
//! arena and reference their children by index, which makes
//! rebuild-on-resize a single arena reset.

use tracing::debug;
use veldt_common::{CellRect, GridSize};

/// Sentinel child index for an absent quadrant.
pub const NO_NODE: u32 = u32::MAX;

/// One rectangular region of cells in the tree.
#[derive(Debug, Clone, Copy)]
pub struct CellNode {
    /// The cells covered by this node, inclusive.
    pub rect: CellRect,
    /// Child indices: top-left, top-right, bottom-left, bottom-right.
    /// [`NO_NODE`] where the quadrant would be empty.
    pub children: [u32; 4],
}

impl CellNode {
    /// Whether this node covers a single cell.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children == [NO_NODE; 4]
    }

    /// Number of cells covered.
    #[must_use]
    pub fn cell_count(&self) -> i64 {
        self.rect.cell_count()
    }
}

/// Complete quadtree over a cell grid.
#[derive(Debug, Clone)]
pub struct CellTree {
    size: GridSize,
    nodes: Vec<CellNode>,
}

impl CellTree {
    /// Builds the tree for a map of the given size.
    ///
    /// Each region splits into up to four quadrants, as evenly as possible,
    /// until a region is a single cell. The top-left quadrant always exists;
    /// right and bottom quadrants are omitted for regions one cell wide or
    /// tall. An empty map yields a tree with no nodes.
    #[must_use]
    pub fn build(size: GridSize) -> Self {
        let mut tree = Self {
            size,
            nodes: Vec::new(),
        };
        if !size.is_empty() {
            tree.alloc(CellRect::full(size));
        }
        debug!(
            width = size.width,
            height = size.height,
            nodes = tree.nodes.len(),
            "built cell quadtree"
        );
        tree
    }

    fn alloc(&mut self, rect: CellRect) -> u32 {
        let index = self.nodes.len() as u32;
        self.nodes.push(CellNode {
            rect,
            children: [NO_NODE; 4],
        });

        if rect.left == rect.right && rect.top == rect.bottom {
            return index;
        }

        let hmid = rect.left + (rect.right - rect.left) / 2;
        let vmid = rect.top + (rect.bottom - rect.top) / 2;
        let has_right = hmid + 1 <= rect.right;
        let has_bottom = vmid + 1 <= rect.bottom;

        let mut children = [NO_NODE; 4];
        children[0] = self.alloc(CellRect::new(rect.left, rect.top, hmid, vmid));
        if has_right {
            children[1] = self.alloc(CellRect::new(hmid + 1, rect.top, rect.right, vmid));
        }
        if has_bottom {
            children[2] = self.alloc(CellRect::new(rect.left, vmid + 1, hmid, rect.bottom));
        }
        if has_right && has_bottom {
            children[3] = self.alloc(CellRect::new(hmid + 1, vmid + 1, rect.right, rect.bottom));
        }
        self.nodes[index as usize].children = children;
        index
    }

    /// The map size the tree was built for.
    #[must_use]
    pub fn size(&self) -> GridSize {
        self.size
    }

    /// Index of the root node, if the tree is non-empty.
    #[must_use]
    pub fn root(&self) -> Option<u32> {
        if self.nodes.is_empty() {
            None
        } else {
            Some(0)
        }
    }

    /// The node at `index`.
    #[must_use]
    pub fn node(&self, index: u32) -> &CellNode {
        &self.nodes[index as usize]
    }

    /// Total number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Recursively checks that children exactly tile their parent.
    fn assert_tiles(tree: &CellTree, index: u32) {
        let node = tree.node(index);
        if node.is_leaf() {
            assert_eq!(node.cell_count(), 1);
            return;
        }
        let mut covered = 0;
        for &child in &node.children {
            if child == NO_NODE {
                continue;
            }
            let child_node = tree.node(child);
            assert!(node.rect.contains_cell(child_node.rect.left, child_node.rect.top));
            assert!(node.rect.contains_cell(child_node.rect.right, child_node.rect.bottom));
            covered += child_node.cell_count();
            assert_tiles(tree, child);
        }
        assert_eq!(covered, node.cell_count());
    }

    #[test]
    fn test_root_covers_whole_map() {
        let tree = CellTree::build(GridSize::new(16, 8));
        let root = tree.node(tree.root().expect("non-empty tree"));
        assert_eq!(root.rect, CellRect::new(0, 0, 15, 7));
        assert_eq!(root.cell_count(), 16 * 8);
    }

    #[test]
    fn test_children_tile_parents_exactly() {
        for (w, h) in [(1, 1), (2, 2), (3, 5), (16, 16), (33, 7)] {
            let tree = CellTree::build(GridSize::new(w, h));
            assert_tiles(&tree, tree.root().expect("non-empty tree"));
        }
    }

    #[test]
    fn test_single_cell_map_is_one_leaf() {
        let tree = CellTree::build(GridSize::new(1, 1));
        assert_eq!(tree.len(), 1);
        assert!(tree.node(0).is_leaf());
    }

    #[test]
    fn test_one_cell_wide_map_has_no_right_children() {
        let tree = CellTree::build(GridSize::new(1, 4));
        let root = tree.node(0);
        assert_ne!(root.children[0], NO_NODE);
        assert_eq!(root.children[1], NO_NODE);
        assert_ne!(root.children[2], NO_NODE);
        assert_eq!(root.children[3], NO_NODE);
    }

    #[test]
    fn test_empty_map_builds_empty_tree() {
        let tree = CellTree::build(GridSize::new(0, 0));
        assert!(tree.is_empty());
        assert_eq!(tree.root(), None);
    }
}
