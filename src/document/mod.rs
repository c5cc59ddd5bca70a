//! Game document: the per-session element tree.
//!
//! Board state is a single ordered tree of elements. The synthetic root
//! owns two permanent spaces: the `board` (visible play area) and the
//! `pile` (off-board holding area). Spaces contain other elements; pieces
//! are the movable leaf tokens.
//!
//! Elements have no long-lived identity of their own: an element is
//! addressed by its *branch*, the sequence of 1-based sibling indices from
//! the root, recomputed on demand because sibling insertion and removal
//! shift the paths of everything after them.

pub mod node;
pub mod path;
pub mod query;
pub mod tree;

pub use node::{ElementKind, NodeId, WrapperSet};
pub use path::Branch;
pub use query::{Query, QueryCtx};
pub use tree::{GameDocument, MaskAction, SortKey};
