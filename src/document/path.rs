//! Branch paths: positional element identity.
//!
//! A branch is the ordered sequence of 1-based sibling indices from the
//! root down to an element, excluding the synthetic root itself. Branches
//! are recomputed from the current tree shape every time they are needed,
//! never cached, because inserting or removing a sibling shifts the paths
//! of everything after it.
//!
//! The wire form is `"$el(<dash-joined indices>)"`, e.g. `"$el(1-3-2)"`.

use crate::error::DocumentError;
use smallvec::SmallVec;
use std::fmt;

/// A branch path: 1-based sibling indices from the root.
///
/// Indices are `u32`, matching the node arena's capacity, so no board
/// fan-out can overflow a path component.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Branch(pub(crate) SmallVec<[u32; 8]>);

impl Branch {
    /// The root's branch (empty).
    #[must_use]
    pub fn root() -> Self {
        Self(SmallVec::new())
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// The 1-based indices, outermost first.
    #[must_use]
    pub fn indices(&self) -> &[u32] {
        &self.0
    }

    pub(crate) fn push(&mut self, index: u32) {
        self.0.push(index);
    }

    /// Render the element reference literal, e.g. `$el(1-3-2)`.
    #[must_use]
    pub fn to_ref(&self) -> String {
        format!("$el({})", self)
    }

    /// Parse an element reference literal produced by [`Branch::to_ref`].
    pub fn parse_ref(text: &str) -> Result<Self, DocumentError> {
        let inner = text
            .strip_prefix("$el(")
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(|| DocumentError::BadElementRef(text.to_string()))?;
        if inner.is_empty() {
            return Ok(Self::root());
        }
        let mut indices = SmallVec::new();
        for part in inner.split('-') {
            let index: u32 = part
                .parse()
                .map_err(|_| DocumentError::BadElementRef(text.to_string()))?;
            if index == 0 {
                return Err(DocumentError::BadElementRef(text.to_string()));
            }
            indices.push(index);
        }
        Ok(Self(indices))
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for index in &self.0 {
            if !first {
                write!(f, "-")?;
            }
            write!(f, "{index}")?;
            first = false;
        }
        Ok(())
    }
}
