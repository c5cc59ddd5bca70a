//! Tree nodes and element kind resolution.

use crate::error::DocumentError;
use std::collections::BTreeMap;

/// Index of a node in the document arena.
///
/// Node slots are never freed: removed pieces move to the pile rather
/// than leaving the tree, so a `NodeId` stays valid for the lifetime of
/// its document. It is *not* a stable address for clients; serialization
/// identity is the branch path, see [`super::Branch`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    #[must_use]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// One node of the element tree.
#[derive(Clone, Debug)]
pub(crate) struct NodeData {
    /// Element type tag, e.g. "board", "card", "token".
    pub tag: String,
    /// Optional element name (the `#id` part of queries).
    pub id: Option<String>,
    /// Structural class: "space", "piece", or none for the root.
    pub class: Option<String>,
    /// Free-form attributes, stored as strings and JSON-decoded on read.
    pub attrs: BTreeMap<String, String>,
    pub parent: Option<NodeId>,
    /// Ordered children; order is semantically significant.
    pub children: Vec<NodeId>,
}

/// The closed set of element variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElementKind {
    /// The tree root.
    Document,
    /// A container (board, pile, or sub-area).
    Space,
    /// A movable leaf token.
    Piece,
}

/// Resolves a node to its element variant.
///
/// Variants are registered with a predicate each and tried in order; a
/// node matching none is a fatal [`DocumentError::NoWrapper`]. The set is
/// owned by the document instance and injected at construction, not held
/// in a process-global registry.
#[derive(Clone)]
pub struct WrapperSet {
    variants: Vec<(ElementKind, fn(&NodeData) -> bool)>,
}

impl WrapperSet {
    /// The standard document/space/piece variant set.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            variants: vec![
                (ElementKind::Document, |n| n.parent.is_none()),
                (ElementKind::Space, |n| n.class.as_deref() == Some("space")),
                (ElementKind::Piece, |n| n.class.as_deref() == Some("piece")),
            ],
        }
    }

    pub(crate) fn resolve(&self, node: &NodeData) -> Result<ElementKind, DocumentError> {
        self.variants
            .iter()
            .find(|(_, test)| test(node))
            .map(|(kind, _)| *kind)
            .ok_or_else(|| DocumentError::NoWrapper {
                tag: node.tag.clone(),
            })
    }
}

impl std::fmt::Debug for WrapperSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrapperSet")
            .field("variants", &self.variants.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(class: Option<&str>, parent: Option<NodeId>) -> NodeData {
        NodeData {
            tag: "thing".to_string(),
            id: None,
            class: class.map(str::to_string),
            attrs: BTreeMap::new(),
            parent,
            children: Vec::new(),
        }
    }

    #[test]
    fn test_resolve_standard_kinds() {
        let set = WrapperSet::standard();

        assert_eq!(set.resolve(&node(None, None)).unwrap(), ElementKind::Document);
        assert_eq!(
            set.resolve(&node(Some("space"), Some(NodeId(0)))).unwrap(),
            ElementKind::Space
        );
        assert_eq!(
            set.resolve(&node(Some("piece"), Some(NodeId(0)))).unwrap(),
            ElementKind::Piece
        );
    }

    #[test]
    fn test_resolve_unknown_is_fatal() {
        let set = WrapperSet::standard();
        let bad = node(Some("widget"), Some(NodeId(0)));

        assert!(matches!(
            set.resolve(&bad),
            Err(DocumentError::NoWrapper { .. })
        ));
    }
}
