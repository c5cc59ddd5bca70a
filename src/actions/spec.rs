//! Action specifications and the per-session registry.
//!
//! An action is a chain of argument-collecting steps ending in an
//! effect. Only `Leaf` carries an effect closure and only non-leaf
//! steps carry a `next` link, so effect and continuation are mutually
//! exclusive by construction, and `Box` ownership keeps chains acyclic.

use super::engine::GameState;
use crate::error::EngineError;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Effect closure run when an action commits. Receives the full
/// collected argument list.
pub type ActionFn =
    Arc<dyn Fn(&mut GameState, &[Value]) -> Result<(), EngineError> + Send + Sync>;

/// Where a `Select` step's valid choices come from.
#[derive(Clone)]
pub enum ChoiceSource {
    /// A fixed list of serialized values.
    List(Vec<Value>),
    /// Elements matching a document query, serialized as `$el` paths.
    Query(String),
    /// Computed against the current state, for the given seat.
    Compute(Arc<dyn Fn(&GameState, usize) -> Vec<Value> + Send + Sync>),
}

impl fmt::Debug for ChoiceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChoiceSource::List(values) => f.debug_tuple("List").field(values).finish(),
            ChoiceSource::Query(query) => f.debug_tuple("Query").field(query).finish(),
            ChoiceSource::Compute(_) => f.write_str("Compute(..)"),
        }
    }
}

/// One step of an action chain.
#[derive(Clone)]
pub enum ActionSpec {
    /// Terminal step: run the effect with all collected arguments.
    Leaf { run: ActionFn },
    /// Collect one value from a valid set.
    Select {
        prompt: String,
        choices: ChoiceSource,
        next: Option<Box<ActionSpec>>,
    },
    /// Collect one integer in `min..=max`.
    Range {
        prompt: String,
        min: i64,
        max: i64,
        next: Option<Box<ActionSpec>>,
    },
    /// Collect a piece and a destination space, then relocate the piece.
    /// Optional trailing numeric x/y arguments position it.
    Drag {
        prompt: String,
        /// Prompt shown once a piece is held; falls back to `prompt`.
        prompt_onto: Option<String>,
        piece: String,
        space: String,
        next: Option<Box<ActionSpec>>,
    },
    /// Consumes no argument; groups a chain under one name.
    Composite { next: Box<ActionSpec> },
}

impl fmt::Debug for ActionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionSpec::Leaf { .. } => f.write_str("Leaf"),
            ActionSpec::Select { prompt, choices, next } => f
                .debug_struct("Select")
                .field("prompt", prompt)
                .field("choices", choices)
                .field("next", next)
                .finish(),
            ActionSpec::Range { prompt, min, max, next } => f
                .debug_struct("Range")
                .field("prompt", prompt)
                .field("min", min)
                .field("max", max)
                .field("next", next)
                .finish(),
            ActionSpec::Drag { prompt, piece, space, next, .. } => f
                .debug_struct("Drag")
                .field("prompt", prompt)
                .field("piece", piece)
                .field("space", space)
                .field("next", next)
                .finish(),
            ActionSpec::Composite { next } => {
                f.debug_struct("Composite").field("next", next).finish()
            }
        }
    }
}

impl ActionSpec {
    fn next(&self) -> Option<&ActionSpec> {
        match self {
            ActionSpec::Leaf { .. } => None,
            ActionSpec::Select { next, .. }
            | ActionSpec::Range { next, .. }
            | ActionSpec::Drag { next, .. } => next.as_deref(),
            ActionSpec::Composite { next } => Some(next),
        }
    }

    /// The innermost `Drag` step, skipping grouping wrappers. Used to
    /// advertise drag candidates to clients.
    #[must_use]
    pub(crate) fn as_drag(&self) -> Option<&ActionSpec> {
        match self {
            ActionSpec::Drag { .. } => Some(self),
            ActionSpec::Composite { next } => next.as_drag(),
            _ => None,
        }
    }

    fn validate(&self, name: &str) -> Result<(), EngineError> {
        let invalid = |reason: &str| EngineError::InvalidSpec {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        match self {
            ActionSpec::Select {
                choices: ChoiceSource::List(values),
                ..
            } if values.is_empty() => {
                return Err(invalid("select with an empty choice list"));
            }
            ActionSpec::Range { min, max, .. } if min > max => {
                return Err(invalid("range with min above max"));
            }
            _ => {}
        }
        match self.next() {
            Some(next) => next.validate(name),
            None => Ok(()),
        }
    }
}

/// Name → spec table, resolved once when a rule module is loaded.
#[derive(Clone, Debug, Default)]
pub struct ActionRegistry {
    actions: FxHashMap<String, ActionSpec>,
}

impl ActionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, spec: ActionSpec) {
        self.actions.insert(name.into(), spec);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ActionSpec> {
        self.actions.get(name)
    }

    /// Registered action names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Load-time structural checks over every registered chain.
    pub fn validate(&self) -> Result<(), EngineError> {
        for (name, spec) in &self.actions {
            spec.validate(name)?;
        }
        Ok(())
    }
}

impl FromIterator<(String, ActionSpec)> for ActionRegistry {
    fn from_iter<I: IntoIterator<Item = (String, ActionSpec)>>(iter: I) -> Self {
        Self {
            actions: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop() -> ActionFn {
        Arc::new(|_, _| Ok(()))
    }

    #[test]
    fn test_validate_catches_empty_select() {
        let mut registry = ActionRegistry::new();
        registry.register(
            "pick",
            ActionSpec::Select {
                prompt: "pick one".to_string(),
                choices: ChoiceSource::List(vec![]),
                next: None,
            },
        );
        assert!(matches!(
            registry.validate(),
            Err(EngineError::InvalidSpec { .. })
        ));
    }

    #[test]
    fn test_validate_catches_inverted_range_in_chain() {
        let mut registry = ActionRegistry::new();
        registry.register(
            "wager",
            ActionSpec::Select {
                prompt: "color".to_string(),
                choices: ChoiceSource::List(vec![json!("red"), json!("black")]),
                next: Some(Box::new(ActionSpec::Range {
                    prompt: "amount".to_string(),
                    min: 5,
                    max: 1,
                    next: None,
                })),
            },
        );
        assert!(matches!(
            registry.validate(),
            Err(EngineError::InvalidSpec { .. })
        ));
    }

    #[test]
    fn test_validate_accepts_well_formed() {
        let mut registry = ActionRegistry::new();
        registry.register("pass", ActionSpec::Leaf { run: noop() });
        registry.register(
            "guess",
            ActionSpec::Range {
                prompt: "guess a number".to_string(),
                min: 1,
                max: 10,
                next: Some(Box::new(ActionSpec::Leaf { run: noop() })),
            },
        );
        assert!(registry.validate().is_ok());
        assert_eq!(registry.names(), vec!["guess", "pass"]);
    }
}
