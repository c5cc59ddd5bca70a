//! Integration tests for the action protocol: validation, sequencing,
//! dry-run purity, and log replay convergence.

use proptest::prelude::*;
use serde_json::{json, Value};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use tabletop_core::games::NumberGuesser;
use tabletop_core::{
    ActionRegistry, ActionSpec, ChoiceSource, Delivery, EngineError, GameEngine, Phase, UserId,
};

type Logged = (u64, usize, String, Vec<Value>);

/// Register a waiting point if none is outstanding, emulating a play
/// routine that re-offers the same actions after each commit.
fn offer(engine: &mut GameEngine, names: &[&str], seat: Option<usize>) {
    if !engine.has_pending() {
        let _ = engine
            .register_wait(names.iter().map(|s| (*s).to_string()).collect(), seat)
            .unwrap();
    }
}

fn attach_log(engine: &mut GameEngine) -> Rc<RefCell<Vec<Logged>>> {
    let log: Rc<RefCell<Vec<Logged>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    engine.set_log_sink(Box::new(move |sequence, seat, name, args| {
        sink.borrow_mut()
            .push((sequence, seat, name.to_string(), args.to_vec()));
        Ok(())
    }));
    log
}

fn guessing_engine(seed: u64, secret: i64) -> GameEngine {
    let mut engine = GameEngine::new(seed, 1, 2);
    engine.add_player(UserId(1)).unwrap();
    engine.add_player(UserId(2)).unwrap();
    engine.start(&NumberGuesser::new(Some(secret))).unwrap();
    engine
}

/// Drive the number guesser the way its play routine would: one guess
/// per turn, pass the turn after a miss, finish on a win.
fn run_guesses(seed: u64, secret: i64, guesses: &[i64]) -> (GameEngine, Vec<Logged>) {
    let mut engine = guessing_engine(seed, secret);
    let log = attach_log(&mut engine);
    for &guess in guesses {
        if engine.state().phase() != Phase::Playing {
            break;
        }
        let seat = engine.state().current_player();
        offer(&mut engine, &["guess"], Some(seat));
        let delivery =
            engine.deliver_action(seat, engine.state().sequence(), "guess", vec![json!(guess)]);
        assert!(matches!(delivery, Delivery::Committed { .. }));
        if engine.state().get_var("winner").is_some() {
            engine.finish();
        } else {
            engine.state_mut().end_turn();
        }
    }
    let entries = log.borrow().clone();
    (engine, entries)
}

/// Rebuild from scratch and feed the logged actions back through.
fn replay_guesses(seed: u64, secret: i64, entries: &[Logged]) -> GameEngine {
    let mut engine = guessing_engine(seed, secret);
    engine.set_replaying(true);
    for (sequence, seat, name, args) in entries {
        offer(&mut engine, &[name.as_str()], Some(*seat));
        let delivery = engine.deliver_action(*seat, *sequence, name, args.clone());
        assert!(matches!(delivery, Delivery::Committed { .. }));
        if engine.state().get_var("winner").is_some() {
            engine.finish();
        } else {
            engine.state_mut().end_turn();
        }
    }
    engine.set_replaying(false);
    engine
}

// === Scenario: a Select action with three choices ===

fn color_engine() -> GameEngine {
    let mut registry = ActionRegistry::new();
    registry.register(
        "choose",
        ActionSpec::Select {
            prompt: "choose a color".to_string(),
            choices: ChoiceSource::List(vec![json!("red"), json!("green"), json!("blue")]),
            next: Some(Box::new(ActionSpec::Leaf {
                run: Arc::new(|state, args| {
                    state.set_var("color", args[0].clone());
                    Ok(())
                }),
            })),
        },
    );

    struct ColorGame(ActionRegistry);

    #[async_trait::async_trait(?Send)]
    impl tabletop_core::RuleModule for ColorGame {
        fn min_players(&self) -> usize {
            1
        }
        fn max_players(&self) -> usize {
            1
        }
        fn actions(&self) -> ActionRegistry {
            self.0.clone()
        }
        async fn play(&self, _game: tabletop_core::GameHandle) -> Result<(), EngineError> {
            Ok(())
        }
    }

    let mut engine = GameEngine::new(5, 1, 1);
    engine.add_player(UserId(7)).unwrap();
    engine.start(&ColorGame(registry)).unwrap();
    engine
}

#[test]
fn test_select_without_argument_lists_all_choices() {
    let mut engine = color_engine();
    offer(&mut engine, &["choose"], Some(0));

    match engine.deliver_action(0, 0, "choose", vec![]) {
        Delivery::Denied {
            error: EngineError::IncompleteAction { prompt, choices },
            ..
        } => {
            assert_eq!(prompt, "choose a color");
            assert_eq!(choices, vec![json!("red"), json!("green"), json!("blue")]);
        }
        other => panic!("expected incomplete action, got {other:?}"),
    }
    // nothing committed
    assert_eq!(engine.state().sequence(), 0);
    assert_eq!(engine.state().get_var("color"), None);
}

#[test]
fn test_select_rejects_value_outside_the_set() {
    let mut engine = color_engine();
    offer(&mut engine, &["choose"], Some(0));
    let before = engine.state().digest();

    let delivery = engine.deliver_action(0, 0, "choose", vec![json!("mauve")]);
    assert!(matches!(
        delivery,
        Delivery::Denied {
            error: EngineError::InvalidChoice,
            ..
        }
    ));
    assert_eq!(engine.state().digest(), before);

    // the same waiting point then accepts a valid value
    let delivery = engine.deliver_action(0, 0, "choose", vec![json!("green")]);
    assert!(matches!(delivery, Delivery::Committed { sequence: 0 }));
    assert_eq!(engine.state().get_var("color"), Some(&json!("green")));
}

// === Scenario: dragging a card onto a space ===

fn drag_engine() -> GameEngine {
    let mut registry = ActionRegistry::new();
    registry.register(
        "discard",
        ActionSpec::Drag {
            prompt: "discard a card".to_string(),
            prompt_onto: Some("onto the discard row".to_string()),
            piece: "hand card".to_string(),
            space: "#discard".to_string(),
            next: None,
        },
    );
    registry.register(
        "name_card",
        ActionSpec::Select {
            prompt: "name a card".to_string(),
            choices: ChoiceSource::Query("deck card".to_string()),
            next: None,
        },
    );

    struct DragGame(ActionRegistry);

    #[async_trait::async_trait(?Send)]
    impl tabletop_core::RuleModule for DragGame {
        fn min_players(&self) -> usize {
            1
        }
        fn max_players(&self) -> usize {
            1
        }
        fn actions(&self) -> ActionRegistry {
            self.0.clone()
        }
        fn setup(&self, state: &mut tabletop_core::GameState) -> Result<(), EngineError> {
            let board = state.doc.board();
            let deck = state.doc.add_space(board, "#deck", "deck", &[])?;
            let hand = state.doc.add_space(board, "#hand", "hand", &[])?;
            state.doc.add_space(board, "#discard", "row", &[])?;
            for rank in 1..=3 {
                state
                    .doc
                    .add_piece(deck, "#card", "card", &[("rank", json!(rank))])?;
            }
            state
                .doc
                .add_piece(hand, "#held", "card", &[("rank", json!(9))])?;
            Ok(())
        }
        async fn play(&self, _game: tabletop_core::GameHandle) -> Result<(), EngineError> {
            Ok(())
        }
    }

    let mut engine = GameEngine::new(2, 1, 1);
    engine.add_player(UserId(3)).unwrap();
    engine.start(&DragGame(registry)).unwrap();
    engine
}

#[test]
fn test_drag_moves_the_piece_and_positions_it() {
    let mut engine = drag_engine();
    offer(&mut engine, &["discard"], Some(0));

    let drags = engine.allowed_drags(0);
    assert_eq!(drags.len(), 1);
    assert_eq!(drags[0].action, "discard");
    assert_eq!(drags[0].pieces.len(), 1);
    assert_eq!(drags[0].spaces.len(), 1);

    let piece = drags[0].pieces[0].clone();
    let space = drags[0].spaces[0].clone();
    let delivery = engine.deliver_action(
        0,
        0,
        "discard",
        vec![json!(piece), json!(space), json!(12.0), json!(8.0)],
    );
    assert!(matches!(delivery, Delivery::Committed { .. }));

    let ctx = tabletop_core::QueryCtx::default();
    let state = engine.state();
    let moved = state.doc.find("#discard card", &ctx).unwrap().unwrap();
    assert_eq!(state.doc.get_attr(moved, "rank"), Some(json!(9)));
    assert_eq!(state.doc.get_attr(moved, "x"), Some(json!(12.0)));
    assert!(state.doc.find("hand card", &ctx).unwrap().is_none());
}

#[test]
fn test_drag_rejects_piece_outside_the_selector() {
    let mut engine = drag_engine();
    offer(&mut engine, &["discard"], Some(0));
    let ctx = tabletop_core::QueryCtx::default();
    let before = engine.state().digest();

    // a deck card is not draggable by this action
    let (deck_card, discard) = {
        let state = engine.state();
        (
            state
                .doc
                .serialize_element(state.doc.find("deck card", &ctx).unwrap().unwrap()),
            state
                .doc
                .serialize_element(state.doc.find("#discard", &ctx).unwrap().unwrap()),
        )
    };
    let delivery = engine.deliver_action(0, 0, "discard", vec![json!(deck_card), json!(discard)]);
    assert!(matches!(
        delivery,
        Delivery::Denied {
            error: EngineError::InvalidChoice,
            ..
        }
    ));
    assert_eq!(engine.state().digest(), before);
}

#[test]
fn test_query_sourced_choices_list_element_refs() {
    let mut engine = drag_engine();
    offer(&mut engine, &["name_card"], Some(0));

    match engine.deliver_action(0, 0, "name_card", vec![]) {
        Delivery::Denied {
            error: EngineError::IncompleteAction { choices, .. },
            ..
        } => {
            assert_eq!(choices.len(), 3);
            for choice in &choices {
                assert!(choice.as_str().unwrap().starts_with("$el("));
            }
        }
        other => panic!("expected incomplete action, got {other:?}"),
    }
}

// === Sequencing ===

#[test]
fn test_sequence_advances_by_exactly_one_per_commit() {
    let (engine, entries) = run_guesses(11, 10, &[3, 7, 10]);
    assert_eq!(engine.state().sequence(), 3);
    let sequences: Vec<u64> = entries.iter().map(|e| e.0).collect();
    assert_eq!(sequences, vec![0, 1, 2]);
}

#[test]
fn test_misses_commit_and_pass_the_turn() {
    let (engine, _) = run_guesses(11, 10, &[4]);
    // a wrong guess is still a real move
    assert_eq!(engine.state().sequence(), 1);
    assert_eq!(engine.state().get_var("guesses"), Some(&json!(1)));
    assert_eq!(engine.state().current_player(), 1);
    assert_eq!(engine.state().phase(), Phase::Playing);
}

#[test]
fn test_win_records_the_acting_seat() {
    let (engine, _) = run_guesses(11, 10, &[4, 10]);
    assert_eq!(engine.state().get_var("winner"), Some(&json!(1)));
    assert_eq!(engine.state().phase(), Phase::Finished);
}

#[test]
fn test_actions_after_finish_are_rejected() {
    let (mut engine, _) = run_guesses(11, 10, &[10]);
    assert_eq!(engine.state().phase(), Phase::Finished);

    let delivery = engine.deliver_action(0, 1, "guess", vec![json!(5)]);
    assert!(matches!(
        delivery,
        Delivery::Denied {
            error: EngineError::GameNotActive,
            ..
        }
    ));
    assert_eq!(engine.state().sequence(), 1);
    assert_eq!(engine.state().get_var("guesses"), Some(&json!(1)));
}

// === Dry-run purity ===

#[test]
fn test_probing_actions_never_perturbs_the_game() {
    let mut probed = guessing_engine(21, 7);
    let mut control = guessing_engine(21, 7);

    offer(&mut probed, &["guess"], Some(0));
    offer(&mut control, &["guess"], Some(0));
    for _ in 0..5 {
        let offered = probed.choices_from_actions(0);
        assert!(offered.contains_key("guess"));
    }

    // both engines now evolve identically, RNG stream included
    for engine in [&mut probed, &mut control] {
        engine.deliver_action(0, 0, "guess", vec![json!(3)]);
        engine.state_mut().end_turn();
        let roll = engine.state_mut().rng.gen_range(0..1_000_000);
        engine.state_mut().set_var("trace", json!(roll));
    }
    assert_eq!(probed.state().digest(), control.state().digest());
}

// === Replay convergence ===

#[test]
fn test_replay_reproduces_the_live_state() {
    let (live, entries) = run_guesses(33, 10, &[2, 9, 5, 10]);
    let replayed = replay_guesses(33, 10, &entries);

    assert_eq!(replayed.state().digest(), live.state().digest());
    assert_eq!(replayed.state().sequence(), live.state().sequence());
}

proptest! {
    #[test]
    fn prop_replay_converges(
        seed in any::<u64>(),
        secret in 1i64..=10,
        guesses in prop::collection::vec(1i64..=10, 1..25),
    ) {
        let (live, entries) = run_guesses(seed, secret, &guesses);
        let replayed = replay_guesses(seed, secret, &entries);
        prop_assert_eq!(replayed.state().digest(), live.state().digest());
    }
}
