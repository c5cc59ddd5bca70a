//! Action protocol: specifications, dry runs, and the commit path.
//!
//! Rule modules declare actions as chains of argument-collecting steps
//! (`Select`, `Range`, `Drag`) ending in an effect (`Leaf`). The engine
//! owns the single pending waiting point, validates submitted arguments
//! against the valid sets, and commits one action per sequence number.

pub mod engine;
mod pending;
pub mod spec;

pub use engine::{ActionTest, Delivery, DragOptions, GameEngine, GameState, LogSink, Phase};
pub use spec::{ActionFn, ActionRegistry, ActionSpec, ChoiceSource};
