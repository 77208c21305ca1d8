use crate::parsing::{LabelDict, LabelId, ParsedTree};
use indextree::NodeId;
use itertools::Itertools;

pub trait Indexer {
    fn index_tree(tree: &ParsedTree, label_dict: &LabelDict) -> Self
    where
        Self: Sized;
}

/// Flattened tree representation consumed by the kernel evaluators.
///
/// Nodes are numbered by preorder traversal; the number doubles as the
/// node identity inside the delta cache. Children keep their original
/// sibling order since partial tree fragments are order sensitive.
#[derive(Debug, Default)]
pub struct KernelIndex {
    /// Number of nodes in the tree
    pub tree_size: usize,
    /// Node label, indexed by preorder id
    pub labels: Vec<LabelId>,
    /// Preorder ids of every node's children, in sibling order
    pub children: Vec<Vec<usize>>,
    /// Number of nodes on the longest root-leaf path
    pub height: usize,
    /// Largest child count over all nodes
    pub max_degree: usize,
    /// Preorder ids sorted by label, feeds the merge-join pair generator
    pub nodes_by_label: Vec<usize>,
}

impl Indexer for KernelIndex {
    fn index_tree(tree: &ParsedTree, _label_dict: &LabelDict) -> Self {
        if tree.is_empty() {
            return Self::default();
        }
        let Some(root) = tree.iter().next() else {
            panic!("Unable to get root but tree is not empty!");
        };
        let root_id = tree.get_node_id(root).unwrap();

        let mut labels = Vec::with_capacity(tree.count());
        let mut children = Vec::with_capacity(tree.count());
        let (_, height) = traverse_flatten(root_id, tree, &mut labels, &mut children);

        let max_degree = children.iter().map(|c| c.len()).max().unwrap_or(0);
        let nodes_by_label = (0..labels.len())
            .sorted_by_key(|&nid| (labels[nid], nid))
            .collect_vec();

        Self {
            tree_size: labels.len(),
            labels,
            children,
            height,
            max_degree,
            nodes_by_label,
        }
    }
}

impl KernelIndex {
    #[inline]
    pub fn is_leaf(&self, node: usize) -> bool {
        self.children[node].is_empty()
    }
}

/// Assigns preorder ids and fills the flat label/children arrays,
/// returning the subtree root id and subtree height
fn traverse_flatten(
    nid: NodeId,
    tree: &ParsedTree,
    labels: &mut Vec<LabelId>,
    children: &mut Vec<Vec<usize>>,
) -> (usize, usize) {
    let preorder_id = labels.len();
    labels.push(*tree.get(nid).unwrap().get());
    children.push(Vec::new());

    let mut height = 1;
    let mut child_ids = vec![];
    for cnid in nid.children(tree) {
        let (cid, child_height) = traverse_flatten(cnid, tree, labels, children);
        child_ids.push(cid);
        height = height.max(child_height + 1);
    }
    children[preorder_id] = child_ids;

    (preorder_id, height)
}
