//! Per-player views: masking and the `state` payload.

use crate::actions::{ActionTest, DragOptions, GameEngine, Phase};
use crate::core::UserId;
use crate::document::{ElementKind, MaskAction, Query, QueryCtx};
use crate::rules::RuleModule;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// How elements matched by a rule module's hidden selector are
/// degraded in views.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MaskPolicy {
    /// Hidden pieces keep their position but lose their id; hidden
    /// containers render no children.
    #[default]
    PiecesLoseIdentity,
    /// The inverse: hidden containers lose their id, hidden pieces
    /// render no children.
    ContainersLoseIdentity,
}

/// One seat's masked snapshot of a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    /// Shown variables only; hidden keys are filtered out.
    pub variables: Map<String, Value>,
    pub phase: Phase,
    pub players: Vec<UserId>,
    pub current_player: usize,
    pub sequence: u64,
    /// The element tree, rendered through the mask.
    pub doc: Value,
    /// Selector for pieces this player may drag freely.
    pub allowed_move: Option<String>,
    /// Dry-run results for each action offered to this seat.
    pub allowed_actions: BTreeMap<String, ActionTest>,
    pub allowed_drags: Vec<DragOptions>,
}

/// Build one seat's view of the current engine state.
///
/// Needs `&mut` only for the dry runs; committed state is unchanged.
pub fn player_view(
    engine: &mut GameEngine,
    rule: &dyn RuleModule,
    seat: usize,
    policy: MaskPolicy,
) -> PlayerView {
    let ctx = QueryCtx::for_player(seat);
    let hidden = rule.hidden(seat).and_then(|selector| {
        match Query::parse(&selector) {
            Ok(query) => Some(query),
            Err(err) => {
                log::error!("ignoring hidden selector for seat {seat}: {err}");
                None
            }
        }
    });

    let state = engine.state();
    let doc = &state.doc;
    let mask = |node| -> MaskAction {
        let Some(query) = &hidden else {
            return MaskAction::Keep;
        };
        if !doc.matches(node, query, &ctx) {
            return MaskAction::Keep;
        }
        let is_piece = matches!(doc.kind(node), Ok(ElementKind::Piece));
        match (policy, is_piece) {
            (MaskPolicy::PiecesLoseIdentity, true)
            | (MaskPolicy::ContainersLoseIdentity, false) => MaskAction::StripIdentity,
            (MaskPolicy::PiecesLoseIdentity, false)
            | (MaskPolicy::ContainersLoseIdentity, true) => MaskAction::DropChildren,
        }
    };
    let rendered = doc.render(doc.root(), &mask);

    let variables = state.shown_variables();
    let phase = state.phase();
    let players = state.players().to_vec();
    let current_player = state.current_player();
    let sequence = state.sequence();
    let allowed_move = state.free_move().map(str::to_string);

    PlayerView {
        variables,
        phase,
        players,
        current_player,
        sequence,
        doc: rendered,
        allowed_move,
        allowed_actions: engine.choices_from_actions(seat),
        allowed_drags: engine.allowed_drags(seat),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{ActionRegistry, ActionSpec};
    use crate::error::EngineError;
    use crate::rules::GameHandle;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;

    struct HiddenHandGame;

    #[async_trait(?Send)]
    impl RuleModule for HiddenHandGame {
        fn min_players(&self) -> usize {
            2
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

        fn setup(&self, state: &mut crate::actions::GameState) -> Result<(), EngineError> {
            let board = state.doc.board();
            for seat in 0..2 {
                let hand = state
                    .doc
                    .add_space(board, "#hand", "hand", &[("player", json!(seat))])?;
                state
                    .doc
                    .add_piece(hand, "#ace", "card", &[("rank", json!(14))])?;
            }
            Ok(())
        }

        async fn play(&self, _game: GameHandle) -> Result<(), EngineError> {
            Ok(())
        }

        fn hidden(&self, seat: usize) -> Option<String> {
            Some(format!("hand[player={}] card", 1 - seat))
        }
    }

    fn engine_with_hands() -> GameEngine {
        let mut engine = GameEngine::new(3, 2, 2);
        engine.add_player(UserId(1)).unwrap();
        engine.add_player(UserId(2)).unwrap();
        engine.start(&HiddenHandGame).unwrap();
        engine
    }

    fn card_in_hand(view: &PlayerView, hand_index: usize) -> &Value {
        &view.doc["children"][0]["children"][hand_index]["children"][0]
    }

    #[test]
    fn test_opponent_cards_lose_identity() {
        let mut engine = engine_with_hands();
        let view = player_view(&mut engine, &HiddenHandGame, 0, MaskPolicy::default());

        // own hand card keeps its id, the opponent's does not
        assert_eq!(card_in_hand(&view, 0)["id"], json!("ace"));
        assert_eq!(card_in_hand(&view, 1).get("id"), None);
        // masked pieces keep their attributes and position
        assert_eq!(card_in_hand(&view, 1)["attrs"]["rank"], json!(14));
    }

    #[test]
    fn test_hidden_variables_filtered() {
        let mut engine = engine_with_hands();
        engine.state_mut().set_var("correct", json!(10));
        engine.state_mut().set_var("guesses", json!(0));
        engine.state_mut().hide_var("correct");

        let view = player_view(&mut engine, &HiddenHandGame, 0, MaskPolicy::default());
        assert!(!view.variables.contains_key("correct"));
        assert_eq!(view.variables.get("guesses"), Some(&json!(0)));
    }

    #[test]
    fn test_view_building_leaves_state_unchanged() {
        let mut engine = engine_with_hands();
        let before = engine.state().digest();
        let _ = player_view(&mut engine, &HiddenHandGame, 0, MaskPolicy::default());
        let _ = player_view(&mut engine, &HiddenHandGame, 1, MaskPolicy::default());
        assert_eq!(engine.state().digest(), before);
    }

    #[test]
    fn test_no_hidden_selector_keeps_everything() {
        struct OpenGame;

        #[async_trait(?Send)]
        impl RuleModule for OpenGame {
            fn min_players(&self) -> usize {
                1
            }
            fn max_players(&self) -> usize {
                2
            }
            fn actions(&self) -> ActionRegistry {
                HiddenHandGame.actions()
            }
            fn setup(&self, state: &mut crate::actions::GameState) -> Result<(), EngineError> {
                HiddenHandGame.setup(state)
            }
            async fn play(&self, _game: GameHandle) -> Result<(), EngineError> {
                Ok(())
            }
        }

        let mut engine = GameEngine::new(3, 1, 2);
        engine.add_player(UserId(1)).unwrap();
        engine.start(&OpenGame).unwrap();

        let view = player_view(&mut engine, &OpenGame, 0, MaskPolicy::default());
        assert_eq!(card_in_hand(&view, 0)["id"], json!("ace"));
        assert_eq!(card_in_hand(&view, 1)["id"], json!("ace"));
    }
}
