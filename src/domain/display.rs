/*
Renders the logical tree observers see, shadow trees included.
 */
use termtree::Tree;
use tracing::instrument;

use crate::domain::arena::{NodeArena, NodeId, NodeKind};

pub trait TreeDisplay {
    /// Logical tree under `root`, with shadow trees shown under their hosts.
    fn to_tree_string(&self, root: NodeId) -> Tree<String>;
}

impl TreeDisplay for NodeArena {
    #[instrument(level = "debug", skip(self))]
    fn to_tree_string(&self, root: NodeId) -> Tree<String> {
        let mut tree = Tree::new(label(self, root));
        if let Some(shadow) = self.get(root).and_then(|n| n.shadow_root) {
            tree.push(self.to_tree_string(shadow));
        }
        for child in self.children(root) {
            tree.push(self.to_tree_string(child));
        }
        tree
    }
}

/// One-line description of a node, e.g. `<div class="a"> #3`.
pub fn label(arena: &NodeArena, node: NodeId) -> String {
    let text = match arena.kind(node) {
        None => "<gone>".to_string(),
        Some(NodeKind::Document) => "#document".to_string(),
        Some(NodeKind::Fragment) => "#fragment".to_string(),
        Some(NodeKind::ShadowRoot { .. }) => "#shadow-root".to_string(),
        Some(NodeKind::Text(data)) => format!("{:?}", data),
        Some(NodeKind::Comment(data)) => format!("<!--{}-->", data),
        Some(NodeKind::Element { name, attributes }) => {
            let attrs: String = attributes
                .iter()
                .map(|a| format!(" {}={:?}", a.name, a.value))
                .collect();
            format!("<{}{}>", name, attrs)
        }
    };
    format!("{} {}", text, node)
}
