//! The game document: arena tree, structural queries, and mutators.

use super::node::{ElementKind, NodeData, NodeId, WrapperSet};
use super::path::Branch;
use super::query::{Query, QueryCtx};
use crate::core::value::{cmp_values, decode_attr, encode_attr};
use crate::core::GameRng;
use crate::error::DocumentError;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Sort key for [`GameDocument::sort`]: an attribute name or a key
/// function over elements.
pub enum SortKey<'a> {
    Attr(&'a str),
    By(&'a dyn Fn(&GameDocument, NodeId) -> Value),
}

/// How a node is rendered in a player view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaskAction {
    /// Render fully.
    Keep,
    /// Omit the id; attributes and children stay.
    StripIdentity,
    /// Keep identity and attributes, render no children.
    DropChildren,
    /// Render only the tag.
    Clear,
}

/// The per-session element tree.
///
/// The root is a synthetic `game` node owning two permanent spaces: the
/// `board` (visible play area) and the `pile` (off-board holding area).
/// Removing an element relocates it to the pile; node slots are never
/// freed, so `NodeId`s stay valid for the document's lifetime.
#[derive(Clone, Debug)]
pub struct GameDocument {
    nodes: Vec<NodeData>,
    wrappers: WrapperSet,
}

impl GameDocument {
    /// Build an empty document with the standard element variants.
    #[must_use]
    pub fn new() -> Self {
        Self::with_wrappers(WrapperSet::standard())
    }

    /// Build an empty document with an injected variant set.
    #[must_use]
    pub fn with_wrappers(wrappers: WrapperSet) -> Self {
        let root = NodeData {
            tag: "game".to_string(),
            id: None,
            class: None,
            attrs: BTreeMap::new(),
            parent: None,
            children: vec![NodeId(1), NodeId(2)],
        };
        let board = NodeData {
            tag: "board".to_string(),
            id: Some("board".to_string()),
            class: Some("space".to_string()),
            attrs: BTreeMap::new(),
            parent: Some(NodeId(0)),
            children: Vec::new(),
        };
        let pile = NodeData {
            tag: "pile".to_string(),
            id: None,
            class: Some("space".to_string()),
            attrs: BTreeMap::new(),
            parent: Some(NodeId(0)),
            children: Vec::new(),
        };
        Self {
            nodes: vec![root, board, pile],
            wrappers,
        }
    }

    /// The synthetic root.
    #[must_use]
    pub const fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// The board space.
    #[must_use]
    pub const fn board(&self) -> NodeId {
        NodeId(1)
    }

    /// The pile space.
    #[must_use]
    pub const fn pile(&self) -> NodeId {
        NodeId(2)
    }

    pub(crate) fn node(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.index()]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut NodeData {
        &mut self.nodes[id.index()]
    }

    // === Structure ===

    /// Element type tag.
    #[must_use]
    pub fn tag(&self, node: NodeId) -> &str {
        &self.node(node).tag
    }

    /// Element name, if it has one.
    #[must_use]
    pub fn id(&self, node: NodeId) -> Option<&str> {
        self.node(node).id.as_deref()
    }

    #[must_use]
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.node(node).parent
    }

    /// Ordered children of a node.
    #[must_use]
    pub fn children(&self, node: NodeId) -> &[NodeId] {
        &self.node(node).children
    }

    /// Resolve the node's element variant.
    ///
    /// Failure means the tree is corrupt; callers treat it as fatal.
    pub fn kind(&self, node: NodeId) -> Result<ElementKind, DocumentError> {
        self.wrappers.resolve(self.node(node))
    }

    /// Seat index stored in the node's `player` attribute, if any.
    #[must_use]
    pub fn player_of(&self, node: NodeId) -> Option<usize> {
        self.node(node).attrs.get("player")?.parse().ok()
    }

    // === Paths ===

    /// Compute the node's branch path by walking its ancestors.
    ///
    /// Always recomputed from the current tree shape; sibling insertion
    /// and removal invalidate previously computed branches.
    #[must_use]
    pub fn branch(&self, node: NodeId) -> Branch {
        let mut indices = Vec::new();
        let mut current = node;
        while let Some(parent) = self.node(current).parent {
            let position = self.node(parent)
                .children
                .iter()
                .position(|&c| c == current)
                .expect("child listed under its parent");
            // positions are bounded by the u32 node arena
            indices.push(u32::try_from(position + 1).expect("sibling index fits in u32"));
            current = parent;
        }
        let mut branch = Branch::root();
        for index in indices.into_iter().rev() {
            branch.push(index);
        }
        branch
    }

    /// Walk a branch down from the root.
    pub fn resolve(&self, branch: &Branch) -> Result<NodeId, DocumentError> {
        let mut current = self.root();
        for &index in branch.indices() {
            let children = &self.node(current).children;
            current = *children
                .get(index as usize - 1)
                .ok_or_else(|| DocumentError::BadElementRef(branch.to_ref()))?;
        }
        Ok(current)
    }

    /// The node's serialization identity, e.g. `$el(1-3-2)`.
    #[must_use]
    pub fn serialize_element(&self, node: NodeId) -> String {
        self.branch(node).to_ref()
    }

    /// Resolve an element reference literal back to the concrete node.
    ///
    /// Round-trip inverse of [`GameDocument::serialize_element`].
    pub fn piece_at(&self, reference: &str) -> Result<NodeId, DocumentError> {
        self.resolve(&Branch::parse_ref(reference)?)
    }

    // === Queries ===

    fn ancestor_nodes(&self, node: NodeId) -> Vec<&NodeData> {
        let mut out = Vec::new();
        let mut current = node;
        while let Some(parent) = self.node(current).parent {
            out.push(self.node(parent));
            current = parent;
        }
        out
    }

    /// Whether a single node matches a parsed query.
    #[must_use]
    pub fn matches(&self, node: NodeId, query: &Query, ctx: &QueryCtx) -> bool {
        query.node_matches(self.node(node), &self.ancestor_nodes(node), ctx)
    }

    /// Preorder descendants of `scope`, excluding `scope` itself.
    fn descendants(&self, scope: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.node(scope).children.iter().rev().copied().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            for &child in self.node(node).children.iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// All elements matching `query`, in document (preorder) order.
    pub fn find_all(&self, query: &str, ctx: &QueryCtx) -> Result<Vec<NodeId>, DocumentError> {
        self.find_all_in(self.root(), query, ctx)
    }

    /// All matching elements within `scope`'s subtree.
    pub fn find_all_in(
        &self,
        scope: NodeId,
        query: &str,
        ctx: &QueryCtx,
    ) -> Result<Vec<NodeId>, DocumentError> {
        let parsed = Query::parse(query)?;
        Ok(self
            .descendants(scope)
            .into_iter()
            .filter(|&n| self.matches(n, &parsed, ctx))
            .collect())
    }

    /// First element matching `query`, in document order.
    pub fn find(&self, query: &str, ctx: &QueryCtx) -> Result<Option<NodeId>, DocumentError> {
        Ok(self.find_all(query, ctx)?.into_iter().next())
    }

    /// Matching elements that are spaces.
    pub fn spaces(&self, query: &str, ctx: &QueryCtx) -> Result<Vec<NodeId>, DocumentError> {
        self.filter_kind(self.find_all(query, ctx)?, ElementKind::Space)
    }

    /// Matching elements that are pieces.
    pub fn pieces(&self, query: &str, ctx: &QueryCtx) -> Result<Vec<NodeId>, DocumentError> {
        self.filter_kind(self.find_all(query, ctx)?, ElementKind::Piece)
    }

    fn filter_kind(
        &self,
        nodes: Vec<NodeId>,
        want: ElementKind,
    ) -> Result<Vec<NodeId>, DocumentError> {
        let mut out = Vec::new();
        for node in nodes {
            if self.kind(node)? == want {
                out.push(node);
            }
        }
        Ok(out)
    }

    /// Number of elements matching `query`.
    pub fn count(&self, query: &str, ctx: &QueryCtx) -> Result<usize, DocumentError> {
        Ok(self.find_all(query, ctx)?.len())
    }

    /// Whether any element matches `query`.
    pub fn contains(&self, query: &str, ctx: &QueryCtx) -> Result<bool, DocumentError> {
        Ok(self.find(query, ctx)?.is_some())
    }

    /// Whether no element matches, or the first match has no children.
    pub fn is_empty(&self, query: &str, ctx: &QueryCtx) -> Result<bool, DocumentError> {
        Ok(match self.find(query, ctx)? {
            Some(node) => self.node(node).children.is_empty(),
            None => true,
        })
    }

    /// Matching element with the smallest key, ties broken by document order.
    pub fn lowest(
        &self,
        query: &str,
        key: &SortKey<'_>,
        ctx: &QueryCtx,
    ) -> Result<Option<NodeId>, DocumentError> {
        let matches = self.find_all(query, ctx)?;
        Ok(self.extreme(&matches, key, true))
    }

    /// Matching element with the largest key, ties broken by document order.
    pub fn highest(
        &self,
        query: &str,
        key: &SortKey<'_>,
        ctx: &QueryCtx,
    ) -> Result<Option<NodeId>, DocumentError> {
        let matches = self.find_all(query, ctx)?;
        Ok(self.extreme(&matches, key, false))
    }

    fn sort_value(&self, node: NodeId, key: &SortKey<'_>) -> Value {
        match key {
            SortKey::Attr(name) => self.get_attr(node, name).unwrap_or(Value::Null),
            SortKey::By(f) => f(self, node),
        }
    }

    fn extreme(&self, nodes: &[NodeId], key: &SortKey<'_>, lowest: bool) -> Option<NodeId> {
        let mut best: Option<(NodeId, Value)> = None;
        for &node in nodes {
            let value = self.sort_value(node, key);
            let better = match &best {
                None => true,
                Some((_, best_value)) => {
                    let ord = cmp_values(&value, best_value);
                    if lowest {
                        ord == std::cmp::Ordering::Less
                    } else {
                        ord == std::cmp::Ordering::Greater
                    }
                }
            };
            if better {
                best = Some((node, value));
            }
        }
        best.map(|(node, _)| node)
    }

    // === Mutation ===

    fn add_element(
        &mut self,
        parent: NodeId,
        name: &str,
        tag: &str,
        class: &str,
        attrs: &[(&str, Value)],
    ) -> Result<NodeId, DocumentError> {
        let id = name
            .strip_prefix('#')
            .ok_or_else(|| DocumentError::BadName(name.to_string()))?;
        let mut stored = BTreeMap::new();
        for (key, value) in attrs {
            if let Some(encoded) = encode_attr(value) {
                stored.insert((*key).to_string(), encoded);
            }
        }
        let node = NodeId(self.nodes.len() as u32);
        self.nodes.push(NodeData {
            tag: tag.to_string(),
            id: Some(id.to_string()),
            class: Some(class.to_string()),
            attrs: stored,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.node_mut(parent).children.push(node);
        Ok(node)
    }

    /// Append a new space under `parent`. `name` must start with `#`.
    pub fn add_space(
        &mut self,
        parent: NodeId,
        name: &str,
        tag: &str,
        attrs: &[(&str, Value)],
    ) -> Result<NodeId, DocumentError> {
        self.add_element(parent, name, tag, "space", attrs)
    }

    /// Append `count` identical spaces under `parent`.
    pub fn add_spaces(
        &mut self,
        count: usize,
        parent: NodeId,
        name: &str,
        tag: &str,
        attrs: &[(&str, Value)],
    ) -> Result<Vec<NodeId>, DocumentError> {
        (0..count)
            .map(|_| self.add_space(parent, name, tag, attrs))
            .collect()
    }

    /// Append a new piece under `parent`.
    ///
    /// Pieces added to the board itself land in the pile: game setup
    /// stocks the pile and deals onto board spaces from there.
    pub fn add_piece(
        &mut self,
        parent: NodeId,
        name: &str,
        tag: &str,
        attrs: &[(&str, Value)],
    ) -> Result<NodeId, DocumentError> {
        let parent = if parent == self.board() {
            self.pile()
        } else {
            parent
        };
        self.add_element(parent, name, tag, "piece", attrs)
    }

    /// Append `count` identical pieces under `parent`.
    pub fn add_pieces(
        &mut self,
        count: usize,
        parent: NodeId,
        name: &str,
        tag: &str,
        attrs: &[(&str, Value)],
    ) -> Result<Vec<NodeId>, DocumentError> {
        (0..count)
            .map(|_| self.add_piece(parent, name, tag, attrs))
            .collect()
    }

    fn detach_and_append(&mut self, node: NodeId, to: NodeId) {
        debug_assert_ne!(node, to);
        if let Some(old_parent) = self.node(node).parent {
            self.node_mut(old_parent).children.retain(|&c| c != node);
        }
        self.node_mut(to).children.push(node);
        self.node_mut(node).parent = Some(to);
    }

    /// Relocate specific nodes to be the last children of `to`, in the
    /// given order.
    pub(crate) fn move_nodes(&mut self, nodes: &[NodeId], to: NodeId) {
        for &node in nodes {
            self.detach_and_append(node, to);
        }
    }

    /// Move up to `count` pieces matching `pieces` into the space
    /// matching `to_space`, preserving their relative order.
    ///
    /// Fails with [`DocumentError::NoSuchSpace`] when the destination
    /// does not resolve to a space.
    pub fn move_pieces(
        &mut self,
        pieces: &str,
        to_space: &str,
        count: Option<usize>,
        ctx: &QueryCtx,
    ) -> Result<Vec<NodeId>, DocumentError> {
        let space = self
            .spaces(to_space, ctx)?
            .into_iter()
            .next()
            .ok_or_else(|| DocumentError::NoSuchSpace(to_space.to_string()))?;
        let mut movables = self.pieces(pieces, ctx)?;
        if let Some(limit) = count {
            movables.truncate(limit);
        }
        self.move_nodes(&movables, space);
        Ok(movables)
    }

    /// Move up to `count` matching pieces from the pile into `to`.
    pub fn add_from_pile(
        &mut self,
        to: NodeId,
        pieces: &str,
        count: usize,
        ctx: &QueryCtx,
    ) -> Result<Vec<NodeId>, DocumentError> {
        let mut movables = self.filter_kind(
            self.find_all_in(self.pile(), pieces, ctx)?,
            ElementKind::Piece,
        )?;
        movables.truncate(count);
        self.move_nodes(&movables, to);
        Ok(movables)
    }

    /// Relocate a single piece to the pile.
    pub fn remove(&mut self, piece: NodeId) {
        let pile = self.pile();
        self.detach_and_append(piece, pile);
    }

    /// Move up to `count` matching pieces within `space` to the pile.
    pub fn clear(
        &mut self,
        space: NodeId,
        pieces: &str,
        count: Option<usize>,
        ctx: &QueryCtx,
    ) -> Result<Vec<NodeId>, DocumentError> {
        let mut movables =
            self.filter_kind(self.find_all_in(space, pieces, ctx)?, ElementKind::Piece)?;
        if let Some(limit) = count {
            movables.truncate(limit);
        }
        let pile = self.pile();
        self.move_nodes(&movables, pile);
        Ok(movables)
    }

    /// In-place random permutation of a node's children.
    pub fn shuffle(&mut self, space: NodeId, rng: &mut GameRng) {
        let mut children = std::mem::take(&mut self.node_mut(space).children);
        rng.shuffle(&mut children);
        self.node_mut(space).children = children;
    }

    /// Reorder a node's children by ascending key; ties keep their
    /// original order.
    pub fn sort(&mut self, space: NodeId, key: &SortKey<'_>) {
        let children = self.node(space).children.clone();
        let keys: Vec<Value> = children
            .iter()
            .map(|&child| self.sort_value(child, key))
            .collect();
        let mut order: Vec<usize> = (0..children.len()).collect();
        order.sort_by(|&a, &b| cmp_values(&keys[a], &keys[b]));
        self.node_mut(space).children = order.into_iter().map(|i| children[i]).collect();
    }

    // === Attributes ===

    /// All attributes, JSON-decoded.
    #[must_use]
    pub fn attributes(&self, node: NodeId) -> Map<String, Value> {
        self.node(node)
            .attrs
            .iter()
            .map(|(k, v)| (k.clone(), decode_attr(v)))
            .collect()
    }

    /// One attribute, JSON-decoded, falling back to the raw string.
    #[must_use]
    pub fn get_attr(&self, node: NodeId, name: &str) -> Option<Value> {
        self.node(node).attrs.get(name).map(|raw| decode_attr(raw))
    }

    /// Set an attribute. `false`, `null`, and the empty string remove it.
    pub fn set_attr(&mut self, node: NodeId, name: &str, value: &Value) {
        match encode_attr(value) {
            Some(encoded) => {
                self.node_mut(node).attrs.insert(name.to_string(), encoded);
            }
            None => {
                self.node_mut(node).attrs.remove(name);
            }
        }
    }

    // === Rendering ===

    /// Render a subtree as JSON, consulting `mask` per node.
    pub fn render(&self, node: NodeId, mask: &dyn Fn(NodeId) -> MaskAction) -> Value {
        let action = mask(node);
        if action == MaskAction::Clear {
            return json!({
                "tag": self.tag(node),
                "attrs": {},
                "children": [],
            });
        }
        let mut out = Map::new();
        out.insert("tag".to_string(), json!(self.tag(node)));
        if action != MaskAction::StripIdentity {
            if let Some(id) = self.id(node) {
                out.insert("id".to_string(), json!(id));
            }
        }
        out.insert("attrs".to_string(), Value::Object(self.attributes(node)));
        let children: Vec<Value> = if action == MaskAction::DropChildren {
            Vec::new()
        } else {
            self.children(node)
                .iter()
                .map(|&child| self.render(child, mask))
                .collect()
        };
        out.insert("children".to_string(), Value::Array(children));
        Value::Object(out)
    }
}

impl Default for GameDocument {
    fn default() -> Self {
        Self::new()
    }
}
