//! Per-session state: mode, output routing, and the in-flight command set.
//!
//! A session is the unit the engine executes against. The local session is
//! created with the engine and speaks to the shared terminal wire; remote
//! sessions are attached later and speak through a [`SessionRelay`]. Each
//! session tracks at most one in-flight command set at a time: the root
//! command plus any subcommands registered while it runs. The set resolves
//! once every registered unit has completed, or immediately on cancellation.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use conch_io::SessionRelay;
use conch_types::{ConchError, EngineEvent, Result, SessionId};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::context::{CancelToken, ExecContext};
use crate::engine::EngineInner;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Set outcome
// ---------------------------------------------------------------------------

/// How a command set ended.
pub(crate) struct SetOutcome {
    /// The root command's result, or `Err(Cancelled)` after a cancellation.
    pub(crate) result: Result<Value>,
    /// Whether the set was cancelled rather than run to completion.
    pub(crate) cancelled: bool,
}

// ---------------------------------------------------------------------------
// Active command set
// ---------------------------------------------------------------------------

/// Book-keeping for the set currently executing on a session.
///
/// `registered` starts at one for the root command and grows as piped stages
/// are fed. The set is finished when `completed` catches up.
struct ActiveSet {
    registered: u32,
    completed: u32,
    /// Result delivered by the root command, if it has completed.
    response: Option<Result<Value>>,
    /// Caller waiting on the set. `None` for synchronous execution, which
    /// reads the outcome back through the session's outcome slot.
    reply: Option<oneshot::Sender<SetOutcome>>,
    /// Root context, head of the pipe chain.
    root: ExecContext,
    /// Driver task for an awaitable root action.
    task: Option<JoinHandle<()>>,
    token: CancelToken,
    /// Cleared for substituted help runs, which carry no cancel hooks.
    run_cancel_hooks: bool,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

enum SessionMode {
    Root,
    InMode { name: String, overlay: String },
}

#[derive(Clone)]
enum Sink {
    Local,
    Relay(Arc<dyn SessionRelay>),
}

struct SessionState {
    mode: SessionMode,
    active: Option<ActiveSet>,
    sync_outcome: Option<SetOutcome>,
    /// Candidate list shown on the last tab press, for damping repeats.
    last_tab: Option<Vec<String>>,
}

/// One connection's view of the engine.
pub struct Session {
    id: SessionId,
    engine: Weak<EngineInner>,
    sink: Sink,
    state: Mutex<SessionState>,
}

impl Session {
    pub(crate) fn local(id: SessionId, engine: Weak<EngineInner>) -> Self {
        Self::with_sink(id, engine, Sink::Local)
    }

    pub(crate) fn remote(
        id: SessionId,
        engine: Weak<EngineInner>,
        relay: Arc<dyn SessionRelay>,
    ) -> Self {
        Self::with_sink(id, engine, Sink::Relay(relay))
    }

    fn with_sink(id: SessionId, engine: Weak<EngineInner>, sink: Sink) -> Self {
        Self {
            id,
            engine,
            sink,
            state: Mutex::new(SessionState {
                mode: SessionMode::Root,
                active: None,
                sync_outcome: None,
                last_tab: None,
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Whether output from this session goes through a relay instead of the
    /// local terminal wire.
    pub fn is_remote(&self) -> bool {
        matches!(self.sink, Sink::Relay(_))
    }

    // -- output ------------------------------------------------------------

    /// Write one chunk of output on behalf of this session.
    pub fn log(&self, text: &str) {
        match &self.sink {
            Sink::Local => {
                if let Some(engine) = self.engine.upgrade() {
                    engine.wire().render(text);
                }
            },
            Sink::Relay(relay) => relay.forward(self.id, text),
        }
    }

    // -- mode and delimiter ------------------------------------------------

    pub(crate) fn enter_mode(&self, name: &str, overlay: &str) {
        lock(&self.state).mode = SessionMode::InMode {
            name: name.to_string(),
            overlay: overlay.to_string(),
        };
    }

    /// Leave the current mode, returning its name.
    pub(crate) fn exit_mode(&self) -> Option<String> {
        let mut state = lock(&self.state);
        match std::mem::replace(&mut state.mode, SessionMode::Root) {
            SessionMode::Root => None,
            SessionMode::InMode { name, .. } => Some(name),
        }
    }

    pub fn in_mode(&self) -> bool {
        self.mode_name().is_some()
    }

    /// Name of the mode command this session is inside, if any.
    pub fn mode_name(&self) -> Option<String> {
        match &lock(&self.state).mode {
            SessionMode::Root => None,
            SessionMode::InMode { name, .. } => Some(name.clone()),
        }
    }

    /// The prompt for this session: the engine delimiter plus the mode
    /// overlay while inside a mode.
    pub fn full_delimiter(&self) -> String {
        let base = match self.engine.upgrade() {
            Some(engine) => engine.base_delimiter(),
            None => String::new(),
        };
        match &lock(&self.state).mode {
            SessionMode::Root => base,
            SessionMode::InMode { overlay, .. } => format!("{base}{overlay}"),
        }
    }

    // -- command set -------------------------------------------------------

    /// Arm the session with a fresh command set rooted at `root` and return
    /// the channel its outcome will arrive on.
    pub(crate) fn begin_set(
        &self,
        root: ExecContext,
        token: CancelToken,
        run_cancel_hooks: bool,
    ) -> oneshot::Receiver<SetOutcome> {
        let (reply, rx) = oneshot::channel();
        self.arm(root, token, run_cancel_hooks, Some(reply));
        rx
    }

    /// Arm a set whose outcome is read back with [`Session::take_sync_outcome`].
    pub(crate) fn begin_set_sync(
        &self,
        root: ExecContext,
        token: CancelToken,
        run_cancel_hooks: bool,
    ) {
        self.arm(root, token, run_cancel_hooks, None);
    }

    fn arm(
        &self,
        root: ExecContext,
        token: CancelToken,
        run_cancel_hooks: bool,
        reply: Option<oneshot::Sender<SetOutcome>>,
    ) {
        let mut state = lock(&self.state);
        state.sync_outcome = None;
        state.active = Some(ActiveSet {
            registered: 1,
            completed: 0,
            response: None,
            reply,
            root,
            task: None,
            token,
            run_cancel_hooks,
        });
    }

    /// Outcome of the last synchronous set, if one has finished.
    pub(crate) fn take_sync_outcome(&self) -> Option<SetOutcome> {
        lock(&self.state).sync_outcome.take()
    }

    /// Whether a command set is currently executing on this session.
    pub fn has_active(&self) -> bool {
        lock(&self.state).active.is_some()
    }

    /// Drop the current set without resolving it. Used when a synchronous
    /// caller gives up on an action that deferred past its return.
    pub(crate) fn abandon_set(&self) {
        lock(&self.state).active = None;
    }

    /// Hand the set the driver task for its awaitable root action. If the
    /// set has already resolved the task's result is no longer wanted.
    pub(crate) fn attach_task(&self, task: JoinHandle<()>) {
        let mut state = lock(&self.state);
        match state.active.as_mut() {
            Some(set) => set.task = Some(task),
            None => task.abort(),
        }
    }

    /// Grow the current set by one expected completion.
    pub fn register_command(&self) {
        let mut state = lock(&self.state);
        if let Some(set) = state.active.as_mut() {
            set.registered += 1;
        }
    }

    /// Record one finished unit of subcommand work. A no-op when no set is
    /// active, so completions racing a cancellation land harmlessly.
    pub fn complete_command(&self, result: Result<Value>) {
        let finished = {
            let mut state = lock(&self.state);
            match state.active.as_mut() {
                None => return,
                Some(set) => {
                    set.completed += 1;
                    if set.completed >= set.registered {
                        state.active.take()
                    } else {
                        None
                    }
                },
            }
        };
        // Errors from non-root stages never reach the caller, so surface
        // them on the session.
        if let Err(err) = result {
            self.log(&err.to_string());
        }
        if let Some(set) = finished {
            self.finish(set, false);
        }
    }

    /// Record the root command's completion and its result.
    pub(crate) fn complete_root(&self, result: Result<Value>) {
        let finished = {
            let mut state = lock(&self.state);
            match state.active.as_mut() {
                None => return,
                Some(set) => {
                    if set.response.is_none() {
                        set.response = Some(result);
                    }
                    set.completed += 1;
                    if set.completed >= set.registered {
                        state.active.take()
                    } else {
                        None
                    }
                },
            }
        };
        if let Some(set) = finished {
            self.finish(set, false);
        }
    }

    /// Cancel the in-flight command set, if any.
    ///
    /// Raises the shared cancellation token, walks cancel hooks from the
    /// root stage to the innermost, aborts the driver task, and resolves
    /// the caller with a cancellation outcome. The set is gone afterwards,
    /// so a later natural completion is ignored.
    pub fn cancel(&self) {
        let set = {
            let mut state = lock(&self.state);
            match state.active.take() {
                Some(set) => set,
                None => return,
            }
        };
        set.token.cancel();
        if set.run_cancel_hooks {
            let mut stage = Some(&set.root);
            while let Some(ctx) = stage {
                if let Some(hook) = ctx.command().cancel_hook() {
                    hook(ctx);
                }
                stage = ctx.downstream();
            }
        }
        if let Some(task) = &set.task {
            task.abort();
        }
        self.emit(EngineEvent::CommandCancelled {
            command: set.root.command().name().to_string(),
        });
        self.finish(set, true);
    }

    fn finish(&self, set: ActiveSet, cancelled: bool) {
        let result = if cancelled {
            Err(ConchError::Cancelled)
        } else {
            set.response.unwrap_or(Ok(Value::Null))
        };
        let outcome = SetOutcome { result, cancelled };
        match set.reply {
            Some(reply) => {
                // The caller may have given up waiting. Nothing to do then.
                let _ = reply.send(outcome);
            },
            None => {
                lock(&self.state).sync_outcome = Some(outcome);
            },
        }
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(engine) = self.engine.upgrade() {
            engine.emit(event);
        }
    }

    // -- tab damping -------------------------------------------------------

    /// Decide whether a candidate list should be shown. Repeating the list
    /// from the previous tab press is suppressed unless the completion came
    /// from a path-style source, which re-lists on every press.
    pub(crate) fn filter_tab_candidates(
        &self,
        items: Vec<String>,
        fresh: bool,
    ) -> Option<Vec<String>> {
        let mut state = lock(&self.state);
        if !fresh && state.last_tab.as_deref() == Some(items.as_slice()) {
            return None;
        }
        state.last_tab = Some(items.clone());
        Some(items)
    }

    /// Forget the last shown candidate list. Any non-tab key does this.
    pub(crate) fn reset_tab_state(&self) {
        lock(&self.state).last_tab = None;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        let mode = match &state.mode {
            SessionMode::Root => None,
            SessionMode::InMode { name, .. } => Some(name.as_str()),
        };
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("remote", &self.is_remote())
            .field("mode", &mode)
            .field("active", &state.active.is_some())
            .finish_non_exhaustive()
    }
}
