//! The session runner: one writer thread per hosted session.
//!
//! Each session runs on its own thread with a single-threaded runtime,
//! so the engine, the play routine, and event dispatch never race. The
//! cluster-wide session lock guarantees at most one writer per session
//! across processes; everything durable goes through the storage seams
//! so the runner itself is host-agnostic.

use super::locks::{ElementLockManager, SessionLockProvider};
use super::log::{ActionLog, ActionLogEntry};
use super::queue::{EventQueue, Recipient, SessionEvent, SessionUpdate, StatePublisher};
use super::view::{player_view, MaskPolicy};
use crate::actions::{Delivery, GameEngine};
use crate::core::{SessionId, UserId};
use crate::error::SessionError;
use crate::protocol::{ActionCall, ServerMessage};
use crate::rules::{GameHandle, RuleModule};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Everything needed to host one session.
#[derive(Clone)]
pub struct SessionMeta {
    pub rule: Arc<dyn RuleModule>,
    /// RNG seed; replay on any process reproduces the same shuffles.
    pub seed: u64,
    /// Seated users, in seat order.
    pub players: Vec<UserId>,
}

/// Storage seam for session metadata.
pub trait SessionStore: Send + Sync {
    fn load(&self, session: SessionId) -> Result<SessionMeta, SessionError>;
}

/// In-memory store for tests and single-process deployments.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<SessionId, SessionMeta>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: SessionId, meta: SessionMeta) {
        self.sessions.lock().unwrap().insert(session, meta);
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self, session: SessionId) -> Result<SessionMeta, SessionError> {
        self.sessions
            .lock()
            .unwrap()
            .get(&session)
            .cloned()
            .ok_or(SessionError::UnknownSession(session))
    }
}

/// Runner tuning.
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// How long a queue pop blocks before re-checking liveness.
    pub queue_poll: Duration,
    /// Backoff between attempts on a held session lock.
    pub lock_retry: Duration,
    pub mask_policy: MaskPolicy,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            queue_poll: Duration::from_secs(1),
            lock_retry: Duration::from_millis(250),
            mask_policy: MaskPolicy::default(),
        }
    }
}

#[derive(Clone)]
struct SessionContext {
    id: SessionId,
    config: RunnerConfig,
    store: Arc<dyn SessionStore>,
    log: Arc<dyn ActionLog>,
    locks: Arc<dyn SessionLockProvider>,
    queue: Arc<dyn EventQueue>,
    publisher: Arc<dyn StatePublisher>,
    element_locks: Arc<ElementLockManager>,
    live: Arc<AtomicBool>,
}

struct RunningSession {
    live: Arc<AtomicBool>,
    handle: std::thread::JoinHandle<()>,
}

/// Hosts sessions, one writer thread each.
pub struct SessionRunner {
    config: RunnerConfig,
    store: Arc<dyn SessionStore>,
    log: Arc<dyn ActionLog>,
    locks: Arc<dyn SessionLockProvider>,
    queue: Arc<dyn EventQueue>,
    publisher: Arc<dyn StatePublisher>,
    element_locks: Arc<ElementLockManager>,
    running: Mutex<HashMap<SessionId, RunningSession>>,
}

impl SessionRunner {
    #[must_use]
    pub fn new(
        config: RunnerConfig,
        store: Arc<dyn SessionStore>,
        log: Arc<dyn ActionLog>,
        locks: Arc<dyn SessionLockProvider>,
        queue: Arc<dyn EventQueue>,
        publisher: Arc<dyn StatePublisher>,
        element_locks: Arc<ElementLockManager>,
    ) -> Self {
        Self {
            config,
            store,
            log,
            locks,
            queue,
            publisher,
            element_locks,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Begin hosting a session. Idempotent: a second call while the
    /// session is live does nothing.
    pub fn start_session(&self, id: SessionId) -> Result<(), SessionError> {
        let mut running = self.running.lock().unwrap();
        if let Some(existing) = running.get(&id) {
            if !existing.handle.is_finished() {
                return Ok(());
            }
            running.remove(&id);
        }

        let live = Arc::new(AtomicBool::new(true));
        let ctx = SessionContext {
            id,
            config: self.config.clone(),
            store: Arc::clone(&self.store),
            log: Arc::clone(&self.log),
            locks: Arc::clone(&self.locks),
            queue: Arc::clone(&self.queue),
            publisher: Arc::clone(&self.publisher),
            element_locks: Arc::clone(&self.element_locks),
            live: Arc::clone(&live),
        };
        let handle = std::thread::Builder::new()
            .name(id.to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        log::error!("{id}: failed to build runtime: {err}");
                        return;
                    }
                };
                let local = tokio::task::LocalSet::new();
                if let Err(err) = local.block_on(&runtime, session_main(ctx)) {
                    log::error!("{id}: session ended with error: {err}");
                }
            })
            .map_err(|err| SessionError::Spawn(err.to_string()))?;

        running.insert(id, RunningSession { live, handle });
        Ok(())
    }

    /// Stop hosting a session. Blocks until the writer thread exits;
    /// in-flight dispatch completes first.
    pub fn stop_session(&self, id: SessionId) {
        let session = self.running.lock().unwrap().remove(&id);
        if let Some(session) = session {
            session.live.store(false, Ordering::SeqCst);
            if session.handle.join().is_err() {
                log::error!("{id}: writer thread panicked");
            }
        }
    }

    #[must_use]
    pub fn is_running(&self, id: SessionId) -> bool {
        self.running
            .lock()
            .unwrap()
            .get(&id)
            .is_some_and(|s| !s.handle.is_finished())
    }
}

impl Drop for SessionRunner {
    fn drop(&mut self) {
        let sessions: Vec<SessionId> = self.running.lock().unwrap().keys().copied().collect();
        for id in sessions {
            self.stop_session(id);
        }
    }
}

async fn session_main(ctx: SessionContext) -> Result<(), SessionError> {
    let id = ctx.id;

    let _guard = loop {
        if !ctx.live.load(Ordering::SeqCst) {
            return Ok(());
        }
        match ctx.locks.try_acquire(id)? {
            Some(guard) => break guard,
            None => tokio::time::sleep(ctx.config.lock_retry).await,
        }
    };

    let meta = ctx.store.load(id)?;
    let rule = Arc::clone(&meta.rule);
    let engine = Rc::new(RefCell::new(GameEngine::new(
        meta.seed,
        rule.min_players(),
        rule.max_players(),
    )));
    {
        let mut engine = engine.borrow_mut();
        for &user in &meta.players {
            engine.add_player(user)?;
        }
        let log = Arc::clone(&ctx.log);
        engine.set_log_sink(Box::new(move |sequence, seat, name, args| {
            log.append(ActionLogEntry {
                session: id,
                sequence,
                player: seat,
                action: ActionCall::new(name, args.to_vec()),
            })
        }));
    }
    let (update_tx, mut update_rx) = mpsc::unbounded_channel();
    engine.borrow_mut().set_update_channel(update_tx);

    // replay: everything at or below the committed horizon stays quiet
    let history = ctx.log.load(id)?;
    engine.borrow_mut().set_replaying(true);
    engine.borrow_mut().start(&*rule)?;

    let play = {
        let handle = GameHandle::new(Rc::clone(&engine));
        let rule = Arc::clone(&rule);
        tokio::task::spawn_local(async move {
            if let Err(err) = rule.play(handle).await {
                log::error!("{id}: play routine failed: {err}");
            }
        })
    };
    settle(&engine, &play).await;

    for entry in history {
        let delivery = engine.borrow_mut().deliver_action(
            entry.player,
            entry.sequence,
            &entry.action.name,
            entry.action.args.clone(),
        );
        if !matches!(delivery, Delivery::Committed { .. }) {
            log::error!(
                "{id}: replay diverged at sequence {}: {delivery:?}",
                entry.sequence
            );
            break;
        }
        settle(&engine, &play).await;
    }
    engine.borrow_mut().set_replaying(false);
    while update_rx.try_recv().is_ok() {}

    publish_players(&ctx, &engine).await?;
    publish_views(&ctx, &engine, &*rule, None).await?;

    while ctx.live.load(Ordering::SeqCst) {
        tokio::select! {
            update = update_rx.recv() => {
                if update.is_none() {
                    break;
                }
                while update_rx.try_recv().is_ok() {}
                settle(&engine, &play).await;
                publish_views(&ctx, &engine, &*rule, None).await?;
            }
            // losing the race drops the pop future; the seam requires
            // cancel-safe pops, see EventQueue::pop
            event = ctx.queue.pop(id, ctx.config.queue_poll) => {
                if let Some(event) = event? {
                    handle_event(&ctx, &engine, &*rule, &play, event).await?;
                }
            }
        }
    }

    engine.borrow_mut().abort_pending();
    let _ = tokio::time::timeout(Duration::from_millis(100), play).await;
    Ok(())
}

/// Yield until the play routine has either registered its next waiting
/// point or finished. Dispatch and view building wait on this so the
/// offered actions are current.
async fn settle(engine: &Rc<RefCell<GameEngine>>, play: &tokio::task::JoinHandle<()>) {
    while !engine.borrow().has_pending() && !play.is_finished() {
        tokio::task::yield_now().await;
    }
}

async fn handle_event(
    ctx: &SessionContext,
    engine: &Rc<RefCell<GameEngine>>,
    rule: &dyn RuleModule,
    play: &tokio::task::JoinHandle<()>,
    event: SessionEvent,
) -> Result<(), SessionError> {
    let id = ctx.id;
    match event {
        SessionEvent::Action {
            user,
            sequence,
            call,
        } => {
            let Some(seat) = engine.borrow().state().seat_of(user) else {
                log::warn!("{id}: ignoring action from unseated {user}");
                return Ok(());
            };
            let delivery =
                engine
                    .borrow_mut()
                    .deliver_action(seat, sequence, &call.name, call.args);
            match delivery {
                Delivery::Committed { .. } => {
                    // views flow from the engine's update channel
                    settle(engine, play).await;
                }
                Delivery::Denied { seat, error } => {
                    let committed = engine.borrow().state().sequence();
                    ctx.publisher
                        .publish(SessionUpdate {
                            session: id,
                            sequence: committed,
                            to: Recipient::Player(seat),
                            message: ServerMessage::Error {
                                message: error.to_string(),
                            },
                        })
                        .await?;
                    publish_views(ctx, engine, rule, Some(seat)).await?;
                }
                Delivery::Ignored => {}
            }
        }
        SessionEvent::Refresh { user } => {
            let seat = match user {
                Some(user) => match engine.borrow().state().seat_of(user) {
                    Some(seat) => Some(seat),
                    None => {
                        log::warn!("{id}: ignoring refresh from unseated {user}");
                        return Ok(());
                    }
                },
                None => None,
            };
            if seat.is_none() {
                publish_players(ctx, engine).await?;
            }
            publish_views(ctx, engine, rule, seat).await?;
        }
        SessionEvent::Drag { user, key, x, y } => {
            let Some(seat) = engine.borrow().state().seat_of(user) else {
                log::warn!("{id}: ignoring drag from unseated {user}");
                return Ok(());
            };
            if engine.borrow_mut().move_element(seat, &key, x, y) {
                let committed = engine.borrow().state().sequence();
                ctx.publisher
                    .publish(SessionUpdate {
                        session: id,
                        sequence: committed,
                        to: Recipient::All,
                        message: ServerMessage::UpdateElement { key, x, y },
                    })
                    .await?;
            }
        }
        SessionEvent::RequestLock { user, key } => {
            ctx.element_locks.acquire(id, user, &key);
            publish_locks(ctx, engine).await?;
        }
        SessionEvent::ReleaseLock { user, key } => {
            ctx.element_locks.release(id, user, &key);
            publish_locks(ctx, engine).await?;
        }
    }
    Ok(())
}

async fn publish_views(
    ctx: &SessionContext,
    engine: &Rc<RefCell<GameEngine>>,
    rule: &dyn RuleModule,
    seat: Option<usize>,
) -> Result<(), SessionError> {
    let (committed, seat_count) = {
        let engine = engine.borrow();
        (engine.state().sequence(), engine.state().players().len())
    };
    let seats: Vec<usize> = match seat {
        Some(seat) => vec![seat],
        None => (0..seat_count).collect(),
    };
    for seat in seats {
        let view = player_view(
            &mut engine.borrow_mut(),
            rule,
            seat,
            ctx.config.mask_policy,
        );
        ctx.publisher
            .publish(SessionUpdate {
                session: ctx.id,
                sequence: committed,
                to: Recipient::Player(seat),
                message: ServerMessage::State(view),
            })
            .await?;
    }
    Ok(())
}

async fn publish_players(
    ctx: &SessionContext,
    engine: &Rc<RefCell<GameEngine>>,
) -> Result<(), SessionError> {
    let (committed, players) = {
        let engine = engine.borrow();
        (
            engine.state().sequence(),
            engine.state().players().to_vec(),
        )
    };
    ctx.publisher
        .publish(SessionUpdate {
            session: ctx.id,
            sequence: committed,
            to: Recipient::All,
            message: ServerMessage::Players { players },
        })
        .await
}

async fn publish_locks(
    ctx: &SessionContext,
    engine: &Rc<RefCell<GameEngine>>,
) -> Result<(), SessionError> {
    let committed = engine.borrow().state().sequence();
    ctx.publisher
        .publish(SessionUpdate {
            session: ctx.id,
            sequence: committed,
            to: Recipient::All,
            message: ServerMessage::UpdateLocks {
                locks: ctx.element_locks.list(ctx.id),
            },
        })
        .await
}
