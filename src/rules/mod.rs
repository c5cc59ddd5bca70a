//! The rule module boundary.
//!
//! A rule module supplies everything game-specific: player limits, the
//! action registry, board setup, and the async `play` routine that
//! drives a session from start to finish. The host owns scheduling and
//! persistence; rule code sees the game only through [`GameHandle`].
//!
//! `play` runs on the session's own single-threaded runtime, so its
//! future does not need to be `Send`; the module itself is shared
//! across sessions and does.

use crate::actions::{GameEngine, GameState, Phase};
use crate::error::EngineError;
use async_trait::async_trait;
use serde_json::Value;
use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

pub use crate::actions::ActionRegistry;

/// One game's rules, as implemented by the embedder.
#[async_trait(?Send)]
pub trait RuleModule: Send + Sync {
    fn min_players(&self) -> usize;

    fn max_players(&self) -> usize;

    /// Variables set before `setup` runs.
    fn initial_variables(&self) -> Vec<(String, Value)> {
        Vec::new()
    }

    /// The action registry, resolved once at session start.
    fn actions(&self) -> ActionRegistry;

    /// Build the initial board. Runs after players are seated, before
    /// the phase flips to playing.
    fn setup(&self, _state: &mut GameState) -> Result<(), EngineError> {
        Ok(())
    }

    /// Drive the game. Suspends on the handle's waiting points; returns
    /// when the game is over.
    async fn play(&self, game: GameHandle) -> Result<(), EngineError>;

    /// Selector for elements hidden from the given seat, if any.
    fn hidden(&self, _seat: usize) -> Option<String> {
        None
    }
}

/// Rule code's view of the engine.
///
/// Cheap to clone; all methods borrow the engine only for their own
/// duration, never across an await.
#[derive(Clone)]
pub struct GameHandle {
    engine: Rc<RefCell<GameEngine>>,
}

impl GameHandle {
    #[must_use]
    pub fn new(engine: Rc<RefCell<GameEngine>>) -> Self {
        Self { engine }
    }

    /// Offer `names` to the current player and suspend until one
    /// commits. Resolves to the committed `(name, args)` pair.
    pub async fn current_player_play(
        &self,
        names: &[&str],
    ) -> Result<(String, Vec<Value>), EngineError> {
        let rx = {
            let mut engine = self.engine.borrow_mut();
            let seat = engine.state().current_player();
            engine.register_wait(to_names(names), Some(seat))?
        };
        rx.await.map_err(|_| EngineError::Interrupted)
    }

    /// Offer `names` to every seated player and suspend until one
    /// commits.
    pub async fn any_player_play(
        &self,
        names: &[&str],
    ) -> Result<(String, Vec<Value>), EngineError> {
        let rx = self.engine.borrow_mut().register_wait(to_names(names), None)?;
        rx.await.map_err(|_| EngineError::Interrupted)
    }

    /// One waiting point per seat, in turn order, starting from the
    /// current player. Ends each player's turn after their callback.
    pub async fn players_in_turn<F, Fut>(&self, mut f: F) -> Result<(), EngineError>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<(), EngineError>>,
    {
        for _ in 0..self.player_count() {
            let seat = self.current_player();
            f(seat).await?;
            self.end_turn();
        }
        Ok(())
    }

    /// Run a round body `times` times, passing the iteration index.
    pub async fn repeat<F, Fut>(&self, times: usize, mut f: F) -> Result<(), EngineError>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<(), EngineError>>,
    {
        for round in 0..times {
            f(round).await?;
        }
        Ok(())
    }

    // === Variables ===

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.engine.borrow().state().get_var(name).cloned()
    }

    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.engine.borrow_mut().state_mut().set_var(name, value);
    }

    pub fn delete(&self, name: &str) {
        self.engine.borrow_mut().state_mut().delete_var(name);
    }

    pub fn hide(&self, name: impl Into<String>) {
        self.engine.borrow_mut().state_mut().hide_var(name);
    }

    // === Turn order ===

    #[must_use]
    pub fn current_player(&self) -> usize {
        self.engine.borrow().state().current_player()
    }

    #[must_use]
    pub fn player_count(&self) -> usize {
        self.engine.borrow().state().players().len()
    }

    pub fn end_turn(&self) {
        self.engine.borrow_mut().state_mut().end_turn();
    }

    pub fn set_current_player(&self, seat: usize) -> Result<(), EngineError> {
        self.engine.borrow_mut().state_mut().set_current_player(seat)
    }

    // === Lifecycle ===

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.engine.borrow().state().phase()
    }

    /// End the game.
    pub fn finish(&self) {
        self.engine.borrow_mut().finish();
    }

    /// Declare which pieces players may reposition outside of actions.
    pub fn players_may_always_move(&self, selector: impl Into<String>) {
        self.engine
            .borrow_mut()
            .state_mut()
            .players_may_always_move(selector);
    }

    /// Direct state access, for setup-style mutation from `play`.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut GameState) -> R) -> R {
        f(self.engine.borrow_mut().state_mut())
    }
}

fn to_names(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| (*s).to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{ActionSpec, Delivery};
    use crate::core::UserId;
    use serde_json::json;
    use std::sync::Arc;

    struct OneRoundGame;

    #[async_trait(?Send)]
    impl RuleModule for OneRoundGame {
        fn min_players(&self) -> usize {
            1
        }

        fn max_players(&self) -> usize {
            2
        }

        fn actions(&self) -> ActionRegistry {
            let mut registry = ActionRegistry::new();
            registry.register(
                "pass",
                ActionSpec::Leaf {
                    run: Arc::new(|_, _| Ok(())),
                },
            );
            registry
        }

        async fn play(&self, game: GameHandle) -> Result<(), EngineError> {
            let (name, _args) = game.current_player_play(&["pass"]).await?;
            game.set("last", json!(name));
            game.finish();
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_play_suspends_and_resumes() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let engine = Rc::new(RefCell::new(GameEngine::new(7, 1, 2)));
                engine.borrow_mut().add_player(UserId(1)).unwrap();
                engine.borrow_mut().start(&OneRoundGame).unwrap();

                let handle = GameHandle::new(Rc::clone(&engine));
                let play =
                    tokio::task::spawn_local(async move { OneRoundGame.play(handle).await });

                while !engine.borrow().has_pending() {
                    tokio::task::yield_now().await;
                }
                let delivery = engine.borrow_mut().deliver_action(0, 0, "pass", vec![]);
                assert!(matches!(delivery, Delivery::Committed { .. }));

                play.await.unwrap().unwrap();
                assert_eq!(engine.borrow().state().phase(), Phase::Finished);
                assert_eq!(engine.borrow().state().get_var("last"), Some(&json!("pass")));
            })
            .await;
    }

    #[tokio::test]
    async fn test_aborted_wait_interrupts_play() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let engine = Rc::new(RefCell::new(GameEngine::new(7, 1, 2)));
                engine.borrow_mut().add_player(UserId(1)).unwrap();
                engine.borrow_mut().start(&OneRoundGame).unwrap();

                let handle = GameHandle::new(Rc::clone(&engine));
                let play =
                    tokio::task::spawn_local(async move { OneRoundGame.play(handle).await });

                while !engine.borrow().has_pending() {
                    tokio::task::yield_now().await;
                }
                engine.borrow_mut().abort_pending();

                let result = play.await.unwrap();
                assert!(matches!(result, Err(EngineError::Interrupted)));
            })
            .await;
    }
}
