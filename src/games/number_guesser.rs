//! A minimal complete game: guess the hidden number.
//!
//! One or two players take turns guessing an integer from 1 to 10. The
//! target lives in a hidden variable, so player views never leak it.
//! The first correct guess wins for the seat that made it.

use crate::actions::{ActionRegistry, ActionSpec};
use crate::error::EngineError;
use crate::rules::{GameHandle, RuleModule};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

pub struct NumberGuesser {
    /// Fixed target for deterministic tests; `None` rolls one at setup.
    secret: Option<i64>,
}

impl NumberGuesser {
    #[must_use]
    pub fn new(secret: Option<i64>) -> Self {
        Self { secret }
    }
}

impl Default for NumberGuesser {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait(?Send)]
impl RuleModule for NumberGuesser {
    fn min_players(&self) -> usize {
        1
    }

    fn max_players(&self) -> usize {
        2
    }

    fn initial_variables(&self) -> Vec<(String, serde_json::Value)> {
        vec![("guesses".to_string(), json!(0))]
    }

    fn actions(&self) -> ActionRegistry {
        let mut registry = ActionRegistry::new();
        registry.register(
            "guess",
            ActionSpec::Range {
                prompt: "guess a number from 1 to 10".to_string(),
                min: 1,
                max: 10,
                next: Some(Box::new(ActionSpec::Leaf {
                    run: Arc::new(|state, args| {
                        let guess = args[0].as_i64().ok_or(EngineError::InvalidChoice)?;
                        let guesses = state
                            .get_var("guesses")
                            .and_then(serde_json::Value::as_i64)
                            .unwrap_or(0);
                        state.set_var("guesses", json!(guesses + 1));
                        state.set_var("lastGuess", json!(guess));
                        if state.get_var("correct") == Some(&json!(guess)) {
                            state.set_var("winner", json!(state.current_player()));
                        }
                        Ok(())
                    }),
                })),
            },
        );
        registry
    }

    fn setup(&self, state: &mut crate::actions::GameState) -> Result<(), EngineError> {
        let correct = self.secret.unwrap_or_else(|| state.rng.gen_range(1..11));
        state.set_var("correct", json!(correct));
        state.hide_var("correct");
        Ok(())
    }

    async fn play(&self, game: GameHandle) -> Result<(), EngineError> {
        loop {
            game.current_player_play(&["guess"]).await?;
            if game.get("winner").is_some() {
                game.finish();
                return Ok(());
            }
            game.end_turn();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::GameState;

    #[test]
    fn test_setup_hides_the_target() {
        let game = NumberGuesser::new(Some(10));
        let mut state = GameState::new(1);
        game.setup(&mut state).unwrap();

        assert_eq!(state.get_var("correct"), Some(&json!(10)));
        assert!(!state.shown_variables().contains_key("correct"));
    }

    #[test]
    fn test_random_target_is_seed_deterministic() {
        let game = NumberGuesser::default();
        let mut a = GameState::new(42);
        let mut b = GameState::new(42);
        game.setup(&mut a).unwrap();
        game.setup(&mut b).unwrap();

        assert_eq!(a.get_var("correct"), b.get_var("correct"));
        let correct = a.get_var("correct").unwrap().as_i64().unwrap();
        assert!((1..=10).contains(&correct));
    }
}
