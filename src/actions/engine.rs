//! The action protocol engine: game state, dry runs, and the commit path.

use super::pending::PendingPlay;
use super::spec::{ActionRegistry, ActionSpec, ChoiceSource};
use crate::core::{GameRng, UserId};
use crate::document::{GameDocument, Query, QueryCtx};
use crate::error::{EngineError, SessionError};
use crate::rules::RuleModule;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tokio::sync::{mpsc, oneshot};

/// Session lifecycle phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Setup,
    Playing,
    Finished,
}

/// The complete game state of one session: everything a dry run
/// snapshots and everything replay must reproduce.
///
/// Cloning is cheap: the variable maps are persistent structures and
/// the document arena is a flat vector.
#[derive(Clone, Debug)]
pub struct GameState {
    /// The element tree.
    pub doc: GameDocument,
    /// The session RNG. Part of the snapshot: probing an action never
    /// advances the live stream.
    pub rng: GameRng,
    vars: im::HashMap<String, Value>,
    hidden_vars: im::HashSet<String>,
    players: Vec<UserId>,
    current_player: usize,
    phase: Phase,
    sequence: u64,
    free_move: Option<String>,
}

impl GameState {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            doc: GameDocument::new(),
            rng: GameRng::new(seed),
            vars: im::HashMap::new(),
            hidden_vars: im::HashSet::new(),
            players: Vec::new(),
            current_player: 0,
            phase: Phase::Setup,
            sequence: 0,
            free_move: None,
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Joined users, in seat order.
    #[must_use]
    pub fn players(&self) -> &[UserId] {
        &self.players
    }

    /// Seat whose turn it is, 0-based.
    #[must_use]
    pub fn current_player(&self) -> usize {
        self.current_player
    }

    /// Next sequence number to be committed.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Selector for pieces players may reposition outside of actions.
    #[must_use]
    pub fn free_move(&self) -> Option<&str> {
        self.free_move.as_deref()
    }

    #[must_use]
    pub fn seat_of(&self, user: UserId) -> Option<usize> {
        self.players.iter().position(|&u| u == user)
    }

    // === Variables ===

    #[must_use]
    pub fn get_var(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn set_var(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    pub fn delete_var(&mut self, name: &str) {
        self.vars.remove(name);
        self.hidden_vars.remove(name);
    }

    /// Exclude a variable from player views. The value stays live for
    /// rule code.
    pub fn hide_var(&mut self, name: impl Into<String>) {
        self.hidden_vars.insert(name.into());
    }

    /// Variables visible to players, hidden keys filtered out.
    #[must_use]
    pub fn shown_variables(&self) -> Map<String, Value> {
        self.vars
            .iter()
            .filter(|(name, _)| !self.hidden_vars.contains(name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    // === Turn order ===

    /// Advance `current_player` to the next seat, wrapping.
    pub fn end_turn(&mut self) {
        if !self.players.is_empty() {
            self.current_player = (self.current_player + 1) % self.players.len();
        }
    }

    pub fn set_current_player(&mut self, seat: usize) -> Result<(), EngineError> {
        if seat >= self.players.len() {
            return Err(EngineError::NoSuchPlayer(seat));
        }
        self.current_player = seat;
        Ok(())
    }

    /// Declare the selector for free player repositioning.
    pub fn players_may_always_move(&mut self, selector: impl Into<String>) {
        self.free_move = Some(selector.into());
    }

    /// Canonical text form of the observable state, for convergence
    /// checks in tests.
    #[must_use]
    pub fn digest(&self) -> String {
        let vars: BTreeMap<&String, &Value> = self.vars.iter().collect();
        json!({
            "phase": self.phase,
            "players": self.players,
            "currentPlayer": self.current_player,
            "sequence": self.sequence,
            "vars": vars,
            "doc": self.doc.render(self.doc.root(), &|_| crate::document::MaskAction::Keep),
        })
        .to_string()
    }
}

/// Dry-run outcome of one offered action.
#[derive(Clone, Debug, PartialEq)]
pub enum ActionTest {
    /// The action would commit with no arguments.
    Ready,
    /// The action needs a first choice from this valid set.
    Choices { prompt: String, choices: Vec<Value> },
}

impl Serialize for ActionTest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        match self {
            ActionTest::Ready => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("ready", &true)?;
                map.end()
            }
            ActionTest::Choices { prompt, choices } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("prompt", prompt)?;
                map.serialize_entry("choices", choices)?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for ActionTest {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(default)]
            ready: bool,
            prompt: Option<String>,
            choices: Option<Vec<Value>>,
        }
        let raw = Raw::deserialize(deserializer)?;
        if raw.ready {
            return Ok(ActionTest::Ready);
        }
        Ok(ActionTest::Choices {
            prompt: raw
                .prompt
                .ok_or_else(|| serde::de::Error::missing_field("prompt"))?,
            choices: raw.choices.unwrap_or_default(),
        })
    }
}

/// Drag candidates advertised for one offered action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DragOptions {
    pub action: String,
    /// `$el` paths of draggable pieces.
    pub pieces: Vec<String>,
    /// `$el` paths of drop targets.
    pub spaces: Vec<String>,
}

/// Outcome of delivering one submitted action.
#[derive(Debug)]
pub enum Delivery {
    /// Applied and persisted at this sequence number.
    Committed { sequence: u64 },
    /// Rejected with a player-directed error; committed state untouched.
    Denied { seat: usize, error: EngineError },
    /// Dropped without a response (stale, unmatched, or a defect).
    Ignored,
}

/// Callback run on the commit path before any outward notification.
/// Arguments: sequence, acting seat, action name, collected args.
pub type LogSink = Box<dyn FnMut(u64, usize, &str, &[Value]) -> Result<(), SessionError>>;

/// One session's protocol engine.
///
/// Single-writer: the engine lives on its session's thread and is never
/// shared across sessions. The play routine suspends on the single
/// pending slot; `deliver_action` is the only commit path.
pub struct GameEngine {
    state: GameState,
    registry: ActionRegistry,
    min_players: usize,
    max_players: usize,
    pending: Option<PendingPlay>,
    replaying: bool,
    log_sink: Option<LogSink>,
    updates: Option<mpsc::UnboundedSender<u64>>,
}

impl GameEngine {
    #[must_use]
    pub fn new(seed: u64, min_players: usize, max_players: usize) -> Self {
        Self {
            state: GameState::new(seed),
            registry: ActionRegistry::new(),
            min_players,
            max_players,
            pending: None,
            replaying: false,
            log_sink: None,
            updates: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut GameState {
        &mut self.state
    }

    /// Whether the play routine is suspended waiting for an action.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// While replaying, outward updates and log appends are suppressed.
    pub fn set_replaying(&mut self, replaying: bool) {
        self.replaying = replaying;
    }

    pub fn set_log_sink(&mut self, sink: LogSink) {
        self.log_sink = Some(sink);
    }

    pub fn set_update_channel(&mut self, tx: mpsc::UnboundedSender<u64>) {
        self.updates = Some(tx);
    }

    fn emit_update(&self) {
        if self.replaying {
            return;
        }
        if let Some(tx) = &self.updates {
            let _ = tx.send(self.state.sequence);
        }
    }

    // === Lifecycle ===

    /// Seat a user. Re-joining returns the existing seat.
    pub fn add_player(&mut self, user: UserId) -> Result<usize, EngineError> {
        if let Some(seat) = self.state.seat_of(user) {
            return Ok(seat);
        }
        if self.state.phase != Phase::Setup {
            return Err(EngineError::GameNotActive);
        }
        if self.state.players.len() >= self.max_players {
            return Err(EngineError::GameFull);
        }
        self.state.players.push(user);
        Ok(self.state.players.len() - 1)
    }

    /// Load the rule module's registry, run its setup, and begin play.
    pub fn start(&mut self, rule: &dyn RuleModule) -> Result<(), EngineError> {
        let registry = rule.actions();
        let vars = rule.initial_variables();
        self.start_inner(registry, vars, |state| rule.setup(state))
    }

    fn start_inner(
        &mut self,
        registry: ActionRegistry,
        vars: Vec<(String, Value)>,
        setup: impl FnOnce(&mut GameState) -> Result<(), EngineError>,
    ) -> Result<(), EngineError> {
        if self.state.phase != Phase::Setup {
            return Err(EngineError::GameNotActive);
        }
        if self.state.players.len() < self.min_players {
            return Err(EngineError::NotEnoughPlayers);
        }
        registry.validate()?;
        self.registry = registry;
        for (name, value) in vars {
            self.state.vars.insert(name, value);
        }
        setup(&mut self.state)?;
        self.state.phase = Phase::Playing;
        self.emit_update();
        Ok(())
    }

    /// End the game. Further actions are denied.
    pub fn finish(&mut self) {
        self.state.phase = Phase::Finished;
        self.pending = None;
        self.emit_update();
    }

    /// Drop the pending slot, waking the play routine with an
    /// interruption error. Used on session teardown.
    pub fn abort_pending(&mut self) {
        self.pending = None;
    }

    // === Waiting ===

    /// Suspend on the single pending slot until one of `names` commits.
    ///
    /// `seat: None` lets any seated player act. A second registration
    /// while one is outstanding is a rule-module defect.
    pub fn register_wait(
        &mut self,
        names: Vec<String>,
        seat: Option<usize>,
    ) -> Result<oneshot::Receiver<(String, Vec<Value>)>, EngineError> {
        if self.state.phase != Phase::Playing {
            return Err(EngineError::GameNotActive);
        }
        if self.pending.is_some() {
            log::error!("wait registered while another is outstanding: {names:?}");
            return Err(EngineError::Reentrancy);
        }
        for name in &names {
            if self.registry.get(name).is_none() {
                return Err(EngineError::UnknownAction(name.clone()));
            }
        }
        let (tx, rx) = oneshot::channel();
        self.pending = Some(PendingPlay { names, seat, tx });
        self.emit_update();
        Ok(rx)
    }

    // === Commit path ===

    /// Deliver one submitted action against the expected sequence.
    ///
    /// Exactly one of three things happens: the action commits and the
    /// sequence advances by one, it is denied with a player-directed
    /// error and committed state is untouched, or it is ignored.
    pub fn deliver_action(
        &mut self,
        seat: usize,
        sequence: u64,
        name: &str,
        mut args: Vec<Value>,
    ) -> Delivery {
        if self.state.phase != Phase::Playing {
            return Delivery::Denied {
                seat,
                error: EngineError::GameNotActive,
            };
        }
        let expected = self.state.sequence;
        if sequence > expected {
            log::warn!("ignoring \"{name}\": sequence {sequence} is ahead of {expected}");
            return Delivery::Ignored;
        }
        if sequence < expected {
            return Delivery::Denied {
                seat,
                error: EngineError::SequenceConflict {
                    got: sequence,
                    expected,
                },
            };
        }
        let Some(pending) = &self.pending else {
            log::warn!("ignoring \"{name}\": nothing is waiting for input");
            return Delivery::Ignored;
        };
        if !pending.offers(name) {
            log::warn!("ignoring \"{name}\": not among the offered actions");
            return Delivery::Ignored;
        }
        if !pending.allows_seat(seat) {
            return Delivery::Denied {
                seat,
                error: EngineError::NotYourTurn,
            };
        }
        let Some(spec) = self.registry.get(name).cloned() else {
            return Delivery::Denied {
                seat,
                error: EngineError::UnknownAction(name.to_string()),
            };
        };

        let snapshot = self.state.clone();
        if let Err(error) = run_action(&mut self.state, &spec, seat, &mut args, 0) {
            self.state = snapshot;
            if error.is_fatal() {
                log::error!("dropping \"{name}\": {error}");
                return Delivery::Ignored;
            }
            return Delivery::Denied { seat, error };
        }
        if !self.replaying {
            if let Some(sink) = &mut self.log_sink {
                if let Err(err) = sink(expected, seat, name, &args) {
                    log::error!("failed to persist \"{name}\" at sequence {expected}: {err}");
                    self.state = snapshot;
                    return Delivery::Ignored;
                }
            }
        }
        self.state.sequence = expected + 1;
        if let Some(pending) = self.pending.take() {
            let _ = pending.tx.send((name.to_string(), args));
        }
        self.emit_update();
        Delivery::Committed { sequence: expected }
    }

    // === Dry runs ===

    /// Probe an action with no arguments against a snapshot.
    ///
    /// Committed state, including the RNG stream, is restored
    /// unconditionally. `None` means the action is not available.
    pub fn test_action(&mut self, name: &str, seat: usize) -> Option<ActionTest> {
        let spec = self.registry.get(name)?.clone();
        let snapshot = self.state.clone();
        let mut args = Vec::new();
        let result = run_action(&mut self.state, &spec, seat, &mut args, 0);
        self.state = snapshot;
        match result {
            Ok(()) => Some(ActionTest::Ready),
            Err(EngineError::IncompleteAction { prompt, choices }) => {
                if choices.is_empty() {
                    None
                } else {
                    Some(ActionTest::Choices { prompt, choices })
                }
            }
            Err(_) => None,
        }
    }

    /// Dry-run every offered action for a seat. Empty unless the seat
    /// is allowed to act at the current waiting point.
    pub fn choices_from_actions(&mut self, seat: usize) -> BTreeMap<String, ActionTest> {
        let Some(pending) = &self.pending else {
            return BTreeMap::new();
        };
        if !pending.allows_seat(seat) {
            return BTreeMap::new();
        }
        let names = pending.names.clone();
        names
            .into_iter()
            .filter_map(|name| {
                let test = self.test_action(&name, seat)?;
                Some((name, test))
            })
            .collect()
    }

    /// Drag candidates for every offered drag action, for a seat.
    #[must_use]
    pub fn allowed_drags(&self, seat: usize) -> Vec<DragOptions> {
        let Some(pending) = &self.pending else {
            return Vec::new();
        };
        if !pending.allows_seat(seat) {
            return Vec::new();
        }
        let ctx = QueryCtx::for_player(seat);
        let mut out = Vec::new();
        for name in &pending.names {
            let Some(spec) = self.registry.get(name) else {
                continue;
            };
            let Some(ActionSpec::Drag { piece, space, .. }) = spec.as_drag() else {
                continue;
            };
            let Ok(pieces) = self.state.doc.pieces(piece, &ctx) else {
                continue;
            };
            let Ok(spaces) = self.state.doc.spaces(space, &ctx) else {
                continue;
            };
            out.push(DragOptions {
                action: name.clone(),
                pieces: pieces
                    .into_iter()
                    .map(|n| self.state.doc.serialize_element(n))
                    .collect(),
                spaces: spaces
                    .into_iter()
                    .map(|n| self.state.doc.serialize_element(n))
                    .collect(),
            });
        }
        out
    }

    // === Free movement ===

    /// Reposition a piece outside the action protocol.
    ///
    /// Allowed only when the piece matches the declared free-move
    /// selector; otherwise logged and dropped with no state change.
    pub fn move_element(&mut self, seat: usize, piece_ref: &str, x: f64, y: f64) -> bool {
        let Some(selector) = self.state.free_move.clone() else {
            log::info!("dropping move of {piece_ref}: no free-move selector declared");
            return false;
        };
        let query = match Query::parse(&selector) {
            Ok(q) => q,
            Err(err) => {
                log::error!("bad free-move selector: {err}");
                return false;
            }
        };
        let node = match self.state.doc.piece_at(piece_ref) {
            Ok(n) => n,
            Err(err) => {
                log::warn!("dropping move: {err}");
                return false;
            }
        };
        let ctx = QueryCtx::for_player(seat);
        if !self.state.doc.matches(node, &query, &ctx) {
            log::info!("dropping move of {piece_ref}: not freely movable");
            return false;
        }
        self.state.doc.set_attr(node, "x", &json!(x));
        self.state.doc.set_attr(node, "y", &json!(y));
        true
    }
}

/// Walk an action chain, consuming arguments from `args` starting at
/// `idx`. Auto-selected single choices are spliced into `args` so the
/// committed argument list is complete for the log.
pub(crate) fn run_action(
    state: &mut GameState,
    spec: &ActionSpec,
    seat: usize,
    args: &mut Vec<Value>,
    idx: usize,
) -> Result<(), EngineError> {
    match spec {
        ActionSpec::Leaf { run } => run(state, args),
        ActionSpec::Composite { next } => run_action(state, next, seat, args, idx),
        ActionSpec::Select {
            prompt,
            choices,
            next,
        } => {
            let valid = resolve_choices(choices, state, seat)?;
            select_arg(args, idx, &valid, prompt)?;
            descend(state, next.as_deref(), seat, args, idx + 1)
        }
        ActionSpec::Range {
            prompt,
            min,
            max,
            next,
        } => {
            let valid: Vec<Value> = (*min..=*max).map(|n| json!(n)).collect();
            select_arg(args, idx, &valid, prompt)?;
            descend(state, next.as_deref(), seat, args, idx + 1)
        }
        ActionSpec::Drag {
            prompt,
            prompt_onto,
            piece,
            space,
            next,
        } => {
            let ctx = QueryCtx::for_player(seat);
            let piece_choices = serialize_nodes(state, state.doc.pieces(piece, &ctx)?);
            let piece_arg = select_arg(args, idx, &piece_choices, prompt)?;

            let onto = prompt_onto.as_deref().unwrap_or(prompt);
            let space_choices = serialize_nodes(state, state.doc.spaces(space, &ctx)?);
            let space_arg = select_arg(args, idx + 1, &space_choices, onto)?;

            let piece_node = resolve_ref(state, &piece_arg)?;
            let space_node = resolve_ref(state, &space_arg)?;
            state.doc.move_nodes(&[piece_node], space_node);

            // trailing numeric x/y position the dropped piece
            let mut next_idx = idx + 2;
            let x = args.get(idx + 2).and_then(Value::as_f64);
            let y = args.get(idx + 3).and_then(Value::as_f64);
            if let (Some(x), Some(y)) = (x, y) {
                state.doc.set_attr(piece_node, "x", &json!(x));
                state.doc.set_attr(piece_node, "y", &json!(y));
                next_idx = idx + 4;
            }
            descend(state, next.as_deref(), seat, args, next_idx)
        }
    }
}

fn descend(
    state: &mut GameState,
    next: Option<&ActionSpec>,
    seat: usize,
    args: &mut Vec<Value>,
    idx: usize,
) -> Result<(), EngineError> {
    match next {
        Some(spec) => run_action(state, spec, seat, args, idx),
        None => Ok(()),
    }
}

fn resolve_choices(
    choices: &ChoiceSource,
    state: &GameState,
    seat: usize,
) -> Result<Vec<Value>, EngineError> {
    Ok(match choices {
        ChoiceSource::List(values) => values.clone(),
        ChoiceSource::Query(query) => serialize_nodes(
            state,
            state.doc.find_all(query, &QueryCtx::for_player(seat))?,
        ),
        ChoiceSource::Compute(f) => f(state, seat),
    })
}

fn serialize_nodes(state: &GameState, nodes: Vec<crate::document::NodeId>) -> Vec<Value> {
    nodes
        .into_iter()
        .map(|n| Value::String(state.doc.serialize_element(n)))
        .collect()
}

fn resolve_ref(state: &GameState, value: &Value) -> Result<crate::document::NodeId, EngineError> {
    let text = value.as_str().ok_or(EngineError::InvalidChoice)?;
    Ok(state.doc.piece_at(text)?)
}

/// Take the argument at `idx`, validating it against the valid set by
/// serialized equality. A missing argument auto-selects when the set
/// has exactly one entry and at least one argument was already given.
fn select_arg(
    args: &mut Vec<Value>,
    idx: usize,
    valid: &[Value],
    prompt: &str,
) -> Result<Value, EngineError> {
    if let Some(arg) = args.get(idx) {
        if valid.contains(arg) {
            Ok(arg.clone())
        } else {
            Err(EngineError::InvalidChoice)
        }
    } else if idx > 0 && valid.len() == 1 {
        let only = valid[0].clone();
        args.push(only.clone());
        Ok(only)
    } else {
        Err(EngineError::IncompleteAction {
            prompt: prompt.to_string(),
            choices: valid.to_vec(),
        })
    }
}
