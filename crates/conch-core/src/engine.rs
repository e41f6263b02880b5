//! The execution engine: command registry, sessions, and the dispatch queue.
//!
//! One engine owns one local session, any number of attached remote
//! sessions, and a FIFO queue of execution requests. Requests are drained
//! strictly one at a time: a queued line is not dispatched until the
//! previous invocation has fully completed, including all of its pipe
//! stages and any fan-in work its action registered. Independent engine
//! instances share nothing but an optionally common terminal wire.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

use conch_io::{History, LocalStorage, SessionRelay, StdTerminal, TerminalWire};
use conch_types::{
    Args, ConchError, EngineConfig, EngineEvent, EngineId, Key, KeypressOutcome, Result, SessionId,
};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::builtins;
use crate::command::{ActionFn, Command};
use crate::complete::{Completion, complete_line};
use crate::context::{ActionFlow, CancelToken, ExecContext};
use crate::parser::{ParseError, ParsedStage, parse_line};
use crate::registry::Registry;
use crate::session::{Session, SetOutcome};

static NEXT_ENGINE: AtomicU64 = AtomicU64::new(1);
static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn next_session_id() -> SessionId {
    SessionId(NEXT_SESSION.fetch_add(1, Ordering::Relaxed))
}

// ---------------------------------------------------------------------------
// Queue plumbing
// ---------------------------------------------------------------------------

struct QueueEntry {
    session: Arc<Session>,
    line: String,
    reply: oneshot::Sender<Result<Value>>,
}

/// Drains the queue one entry at a time for as long as the engine lives.
async fn dispatch(engine: Weak<EngineInner>, mut rx: mpsc::UnboundedReceiver<QueueEntry>) {
    while let Some(entry) = rx.recv().await {
        let Some(inner) = engine.upgrade() else {
            break;
        };
        log::debug!("{}: dequeue {:?}", inner.id, entry.line);
        let result = inner.process(&entry.session, &entry.line).await;
        let _ = entry.reply.send(result);
    }
}

// ---------------------------------------------------------------------------
// Engine internals
// ---------------------------------------------------------------------------

/// A request after the pre-action pipeline: mode redirect, parse, help
/// interception, validation, and mode entry have all been applied.
struct Prepared {
    root: ExecContext,
    action: Option<ActionFn>,
    run_cancel_hooks: bool,
}

pub(crate) struct EngineInner {
    id: EngineId,
    registry: Arc<Registry>,
    session: Arc<Session>,
    remotes: Mutex<HashMap<SessionId, Arc<Session>>>,
    wire: Arc<TerminalWire>,
    observers: Mutex<Vec<Arc<dyn Fn(&EngineEvent) + Send + Sync>>>,
    history: Mutex<History>,
    storage: Mutex<LocalStorage>,
    delimiter: Mutex<String>,
    data_dir: Option<PathBuf>,
    normalize: AtomicBool,
    fatal: AtomicBool,
    help_width: usize,
    queue: OnceLock<mpsc::UnboundedSender<QueueEntry>>,
}

impl EngineInner {
    pub(crate) fn wire(&self) -> &TerminalWire {
        &self.wire
    }

    pub(crate) fn base_delimiter(&self) -> String {
        lock(&self.delimiter).clone()
    }

    /// Deliver a lifecycle event to every observer.
    pub(crate) fn emit(&self, event: EngineEvent) {
        log::debug!("{}: {event:?}", self.id);
        let observers: Vec<_> = lock(&self.observers).iter().map(Arc::clone).collect();
        for observer in observers {
            observer(&event);
        }
    }

    fn is_local(&self, session: &Arc<Session>) -> bool {
        Arc::ptr_eq(session, &self.session)
    }

    fn leave_mode(&self, session: &Arc<Session>) {
        if let Some(name) = session.exit_mode() {
            if self.is_local(session) {
                lock(&self.history).exit_mode();
            }
            self.emit(EngineEvent::ModeExited { command: name });
        }
    }

    async fn process(&self, session: &Arc<Session>, line: &str) -> Result<Value> {
        let prepared = match self.prepare(session, line) {
            Ok(Some(prepared)) => prepared,
            Ok(None) => return Ok(Value::Null),
            Err(err) => return Err(err),
        };
        let Prepared {
            root,
            action,
            run_cancel_hooks,
        } = prepared;
        let token = root.cancel_token().clone();
        let rx = session.begin_set(root.clone(), token, run_cancel_hooks);
        self.start_action(session, &root, action);
        match rx.await {
            Ok(outcome) => self.settle(&root, outcome),
            Err(_) => Err(ConchError::Cancelled),
        }
    }

    /// Everything that happens to a request before its action is invoked.
    fn prepare(&self, session: &Arc<Session>, line: &str) -> Result<Option<Prepared>> {
        let line = line.trim();
        if self.is_local(session) {
            lock(&self.history).append(line);
        }

        // Inside a mode the line is not parsed: it goes to the mode command
        // verbatim. The exit token pops the mode instead.
        if let Some(mode) = session.mode_name() {
            if line == "exit" {
                self.leave_mode(session);
                return Ok(None);
            }
            let Some(command) = self.registry.find(&mode) else {
                return Err(ConchError::UnknownCommand(mode));
            };
            let action = command.action_hook();
            let root = ExecContext::new(
                command,
                Args::from_raw(line),
                line.to_string(),
                Arc::clone(session),
                None,
                true,
                CancelToken::new(),
            );
            return Ok(Some(Prepared {
                root,
                action,
                run_cancel_hooks: true,
            }));
        }

        let normalize = self.normalize.load(Ordering::Relaxed);
        let parsed = match parse_line(&self.registry, line, normalize) {
            Ok(parsed) => parsed,
            Err(failure) => return Err(self.report_parse_failure(session, line, failure)),
        };
        let stages = parsed.stages;
        let command = Arc::clone(&stages[0].command);

        // A requested `--help` replaces the run: a custom help hook becomes
        // the action (validate and cancel hooks do not apply), and without
        // one the standard help text completes the request by itself.
        if stages[0].args.help_requested() {
            match command.help_hook() {
                Some(help) => {
                    let root = self.build_chain(session, &stages);
                    return Ok(Some(Prepared {
                        root,
                        action: Some(help),
                        run_cancel_hooks: false,
                    }));
                },
                None => {
                    session.log(&command.help_information());
                    self.emit(EngineEvent::CommandExecuted {
                        command: command.name().to_string(),
                    });
                    return Ok(None);
                },
            }
        }

        if let Some(validate) = command.validate_hook()
            && let Err(err) = validate(&stages[0].args)
        {
            self.emit(EngineEvent::CommandError {
                command: command.name().to_string(),
                message: err.to_string(),
            });
            return Err(err);
        }

        // Entering a mode runs the init hook instead of the action.
        let action = if command.is_mode() {
            let overlay = command
                .mode_delimiter()
                .unwrap_or_else(|| format!("{}: ", command.name()));
            session.enter_mode(command.name(), &overlay);
            if self.is_local(session) {
                lock(&self.history).enter_mode(command.name());
            }
            self.emit(EngineEvent::ModeEntered {
                command: command.name().to_string(),
            });
            command.init_hook()
        } else {
            command.action_hook()
        };

        let root = self.build_chain(session, &stages);
        Ok(Some(Prepared {
            root,
            action,
            run_cancel_hooks: true,
        }))
    }

    fn report_parse_failure(
        &self,
        session: &Session,
        line: &str,
        failure: ParseError,
    ) -> ConchError {
        match &failure.command {
            Some(command) => session.log(&command.help_information()),
            None => session.log(&builtins::summary(&self.registry, self.help_width)),
        }
        let command = failure
            .command
            .as_ref()
            .map_or_else(|| line.to_string(), |cmd| cmd.name().to_string());
        self.emit(EngineEvent::CommandError {
            command,
            message: failure.error.to_string(),
        });
        failure.error
    }

    /// Build the context chain tail-first so each stage owns its downstream.
    fn build_chain(&self, session: &Arc<Session>, stages: &[ParsedStage]) -> ExecContext {
        let token = CancelToken::new();
        let mut downstream: Option<ExecContext> = None;
        for stage in stages.iter().skip(1).rev() {
            downstream = Some(ExecContext::new(
                Arc::clone(&stage.command),
                stage.args.clone(),
                stage.raw.clone(),
                Arc::clone(session),
                downstream,
                false,
                token.clone(),
            ));
        }
        let root = &stages[0];
        ExecContext::new(
            Arc::clone(&root.command),
            root.args.clone(),
            root.raw.clone(),
            Arc::clone(session),
            downstream,
            true,
            token,
        )
    }

    fn start_action(&self, session: &Arc<Session>, root: &ExecContext, action: Option<ActionFn>) {
        let Some(action) = action else {
            session.complete_root(Ok(Value::Null));
            return;
        };
        match action(root.clone(), root.args().clone()) {
            ActionFlow::Done(result) => session.complete_root(result),
            ActionFlow::Pending(fut) => match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let completer = Arc::clone(session);
                    let task = handle.spawn(async move {
                        completer.complete_root(fut.await);
                    });
                    session.attach_task(task);
                },
                Err(_) => session.complete_root(Err(ConchError::Usage(
                    "asynchronous action outside an async runtime".to_string(),
                ))),
            },
            // The action completes itself through its context.
            ActionFlow::Deferred => {},
        }
    }

    /// Post-completion work: done hooks outer-to-inner, then the lifecycle
    /// event. Cancelled sets already ran their cancel hooks instead.
    fn settle(&self, root: &ExecContext, outcome: SetOutcome) -> Result<Value> {
        if !outcome.cancelled {
            let mut stage = Some(root);
            while let Some(ctx) = stage {
                if let Some(done) = ctx.command().done_hook() {
                    done(ctx);
                }
                stage = ctx.downstream();
            }
            let command = root.command().name().to_string();
            match &outcome.result {
                Ok(_) => self.emit(EngineEvent::CommandExecuted { command }),
                Err(err) => self.emit(EngineEvent::CommandError {
                    command,
                    message: err.to_string(),
                }),
            }
        }
        outcome.result
    }

    fn exec_sync_raw(&self, line: &str) -> Result<Value> {
        let session = Arc::clone(&self.session);
        if session.has_active() {
            return Err(ConchError::Usage(
                "another command is executing".to_string(),
            ));
        }
        let prepared = match self.prepare(&session, line) {
            Ok(Some(prepared)) => prepared,
            Ok(None) => return Ok(Value::Null),
            Err(err) => return Err(err),
        };
        let Prepared {
            root,
            action,
            run_cancel_hooks,
        } = prepared;
        let token = root.cancel_token().clone();
        session.begin_set_sync(root.clone(), token, run_cancel_hooks);
        match action {
            None => session.complete_root(Ok(Value::Null)),
            Some(action) => match action(root.clone(), root.args().clone()) {
                ActionFlow::Done(result) => session.complete_root(result),
                ActionFlow::Pending(_) => session.complete_root(Err(ConchError::Usage(
                    "asynchronous action in synchronous execution".to_string(),
                ))),
                ActionFlow::Deferred => {},
            },
        }
        match session.take_sync_outcome() {
            Some(outcome) => self.settle(&root, outcome),
            None => {
                session.abandon_set();
                Err(ConchError::Usage(
                    "action did not complete synchronously".to_string(),
                ))
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Public handle
// ---------------------------------------------------------------------------

/// An interactive-shell engine instance.
///
/// Cheap to clone; clones share the same registry, sessions, and queue.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Build an engine writing to the process stdout.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_wire(config, Arc::new(TerminalWire::new(Arc::new(StdTerminal))))
    }

    /// Build an engine on an explicit terminal wire, which may be shared
    /// with other engines.
    pub fn with_wire(config: EngineConfig, wire: Arc<TerminalWire>) -> Result<Self> {
        let EngineConfig {
            delimiter,
            data_dir,
            id: instance,
            normalize_key_values,
            fatal_errors,
            help_width,
        } = config;
        let inner = Arc::new_cyclic(|weak: &Weak<EngineInner>| {
            let session = Arc::new(Session::local(next_session_id(), Weak::clone(weak)));
            EngineInner {
                id: EngineId(NEXT_ENGINE.fetch_add(1, Ordering::Relaxed)),
                registry: Arc::new(Registry::new()),
                session,
                remotes: Mutex::new(HashMap::new()),
                wire,
                observers: Mutex::new(Vec::new()),
                history: Mutex::new(History::new()),
                storage: Mutex::new(LocalStorage::new()),
                delimiter: Mutex::new(delimiter),
                data_dir,
                normalize: AtomicBool::new(normalize_key_values),
                fatal: AtomicBool::new(fatal_errors),
                help_width,
                queue: OnceLock::new(),
            }
        });
        let engine = Engine { inner };
        builtins::register_builtins(&engine)?;
        if let Some(instance) = instance {
            engine.history(&instance);
            engine.local_storage(&instance);
        }
        Ok(engine)
    }

    pub fn id(&self) -> EngineId {
        self.inner.id
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    /// The engine's local session.
    pub fn session(&self) -> &Arc<Session> {
        &self.inner.session
    }

    pub fn wire(&self) -> &Arc<TerminalWire> {
        &self.inner.wire
    }

    pub(crate) fn help_width(&self) -> usize {
        self.inner.help_width
    }

    // -- registration ------------------------------------------------------

    /// Register a command from its template, e.g. `"deploy <env> [tag]"`.
    pub fn command(&self, template: &str) -> Result<Arc<Command>> {
        let command = self.inner.registry.register(template)?;
        self.inner.emit(EngineEvent::CommandRegistered {
            name: command.name().to_string(),
        });
        Ok(command)
    }

    /// Register a mode command, a sticky sub-REPL entered by running it.
    pub fn mode(&self, template: &str) -> Result<Arc<Command>> {
        let command = self.inner.registry.register_mode(template)?;
        self.inner.emit(EngineEvent::CommandRegistered {
            name: command.name().to_string(),
        });
        Ok(command)
    }

    /// Register the fallback command for otherwise unmatched input.
    pub fn catch(&self, template: &str) -> Result<Arc<Command>> {
        let command = self.inner.registry.register_catch(template)?;
        self.inner.emit(EngineEvent::CommandRegistered {
            name: command.name().to_string(),
        });
        Ok(command)
    }

    /// Add an alias to a registered command.
    pub fn alias(&self, command: &Arc<Command>, alias: &str) -> Result<()> {
        self.inner.registry.add_alias(command, alias)
    }

    pub fn find(&self, name: &str) -> Option<Arc<Command>> {
        self.inner.registry.find(name)
    }

    pub fn remove(&self, command: &Arc<Command>) {
        self.inner.registry.remove(command);
    }

    // -- execution ---------------------------------------------------------

    /// Queue a line on the local session and await its result.
    pub async fn exec(&self, line: &str) -> Result<Value> {
        self.enqueue(Arc::clone(&self.inner.session), line).await
    }

    /// Queue a line on a specific session.
    pub async fn exec_in(&self, session: SessionId, line: &str) -> Result<Value> {
        let target = self
            .session_for(session)
            .ok_or_else(|| ConchError::Usage(format!("unknown session {session}")))?;
        self.enqueue(target, line).await
    }

    /// Run a line immediately on the local session, without the queue.
    ///
    /// Only synchronous actions can complete here; an action returning an
    /// awaitable yields a usage error.
    pub fn exec_sync(&self, line: &str) -> Result<Value> {
        self.exec_sync_inner(line, false)
    }

    /// Like [`Engine::exec_sync`], but an error panics even when the
    /// engine-wide fatal flag is off.
    pub fn exec_sync_fatal(&self, line: &str) -> Result<Value> {
        self.exec_sync_inner(line, true)
    }

    fn exec_sync_inner(&self, line: &str, fatal: bool) -> Result<Value> {
        let result = self.inner.exec_sync_raw(line);
        if (fatal || self.inner.fatal.load(Ordering::Relaxed))
            && let Err(err) = &result
        {
            panic!("{err}");
        }
        result
    }

    async fn enqueue(&self, session: Arc<Session>, line: &str) -> Result<Value> {
        let (reply, rx) = oneshot::channel();
        let entry = QueueEntry {
            session,
            line: line.to_string(),
            reply,
        };
        if self.queue_sender().send(entry).is_err() {
            return Err(ConchError::Usage("engine queue is closed".to_string()));
        }
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(ConchError::Cancelled),
        }
    }

    fn queue_sender(&self) -> mpsc::UnboundedSender<QueueEntry> {
        self.inner
            .queue
            .get_or_init(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                tokio::spawn(dispatch(Arc::downgrade(&self.inner), rx));
                tx
            })
            .clone()
    }

    /// Cancel the active command set, or pop the current mode, or do
    /// nothing. The host's interrupt key (for example Ctrl-C) calls this.
    pub fn interrupt(&self) {
        let session = &self.inner.session;
        if session.has_active() {
            session.cancel();
        } else if session.in_mode() {
            self.inner.leave_mode(session);
        }
    }

    // -- keypresses --------------------------------------------------------

    /// React to one keypress on the local session's input line.
    pub async fn keypress(&self, key: Key, line: &str, cursor: usize) -> Option<KeypressOutcome> {
        let session = &self.inner.session;
        match key {
            Key::Up => {
                session.reset_tab_state();
                lock(&self.inner.history)
                    .previous()
                    .map(KeypressOutcome::ReplaceLine)
            },
            Key::Down => {
                session.reset_tab_state();
                lock(&self.inner.history)
                    .next()
                    .map(KeypressOutcome::ReplaceLine)
            },
            Key::Tab => match complete_line(&self.inner.registry, line, cursor).await {
                Some(Completion::Line(replacement)) => {
                    session.reset_tab_state();
                    Some(KeypressOutcome::ReplaceLine(replacement))
                },
                Some(Completion::List { items, fresh }) => session
                    .filter_tab_candidates(items, fresh)
                    .map(KeypressOutcome::Candidates),
                None => None,
            },
            Key::Other => {
                session.reset_tab_state();
                None
            },
        }
    }

    // -- sessions ----------------------------------------------------------

    /// Attach a remote session whose output goes through `relay`.
    pub fn attach_remote(&self, relay: Arc<dyn SessionRelay>) -> SessionId {
        let id = next_session_id();
        let session = Arc::new(Session::remote(id, Arc::downgrade(&self.inner), relay));
        lock(&self.inner.remotes).insert(id, session);
        id
    }

    /// Drop a remote session. Returns whether it existed.
    pub fn detach_remote(&self, id: SessionId) -> bool {
        lock(&self.inner.remotes).remove(&id).is_some()
    }

    fn session_for(&self, id: SessionId) -> Option<Arc<Session>> {
        if self.inner.session.id() == id {
            return Some(Arc::clone(&self.inner.session));
        }
        lock(&self.inner.remotes).get(&id).map(Arc::clone)
    }

    // -- terminal ----------------------------------------------------------

    /// Claim the terminal wire, displacing any other engine holding it.
    pub fn show(&self) {
        self.inner.wire.attach(self.inner.id);
    }

    /// Release the terminal wire if this engine holds it.
    pub fn hide(&self) {
        self.inner.wire.detach(self.inner.id);
    }

    pub fn is_shown(&self) -> bool {
        self.inner.wire.is_owner(self.inner.id)
    }

    /// Set the base prompt delimiter.
    pub fn delimiter(&self, text: &str) {
        *lock(&self.inner.delimiter) = text.to_string();
    }

    // -- observers ---------------------------------------------------------

    /// Register an observer for engine lifecycle events.
    pub fn observe<F>(&self, observer: F)
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        lock(&self.inner.observers).push(Arc::new(observer));
    }

    // -- history and storage -----------------------------------------------

    /// Turn on persistent history under the configured data directory.
    pub fn history(&self, id: &str) {
        let mut history = lock(&self.inner.history);
        if let Some(dir) = &self.inner.data_dir {
            history.set_storage_path(dir.clone());
        }
        history.set_id(id);
    }

    /// Entries of the current history scope, oldest first.
    pub fn history_entries(&self) -> Vec<String> {
        lock(&self.inner.history).entries().to_vec()
    }

    pub fn clear_history(&self) {
        lock(&self.inner.history).clear();
    }

    /// Initialize namespaced local storage for this engine instance.
    pub fn local_storage(&self, id: &str) {
        let mut storage = lock(&self.inner.storage);
        if let Some(dir) = &self.inner.data_dir {
            storage.set_storage_path(dir.clone());
        }
        storage.init(id);
    }

    pub fn get_item(&self, key: &str) -> Result<Option<String>> {
        lock(&self.inner.storage).get_item(key)
    }

    pub fn set_item(&self, key: &str, value: &str) -> Result<()> {
        lock(&self.inner.storage).set_item(key, value)
    }

    pub fn remove_item(&self, key: &str) -> Result<Option<String>> {
        lock(&self.inner.storage).remove_item(key)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use conch_io::{CapturedRelay, CapturedTerminal, Terminal};
    use serde_json::json;

    use super::*;

    fn test_engine() -> (Engine, Arc<CapturedTerminal>) {
        let terminal = Arc::new(CapturedTerminal::new());
        let wire = Arc::new(TerminalWire::new(Arc::clone(&terminal) as Arc<dyn Terminal>));
        let engine = Engine::with_wire(EngineConfig::default(), wire).unwrap();
        (engine, terminal)
    }

    /// `speak`: logs `hi` and resolves to `"hi"`.
    fn register_speak(engine: &Engine) {
        engine.command("speak").unwrap().action(|ctx, _| {
            ctx.log("hi");
            ActionFlow::ok(json!("hi"))
        });
    }

    // ---- execution tests ----

    #[tokio::test]
    async fn exec_runs_the_action_and_returns_its_value() {
        let (engine, terminal) = test_engine();
        register_speak(&engine);

        let result = engine.exec("speak").await.unwrap();
        assert_eq!(result, json!("hi"));
        assert_eq!(terminal.output(), vec!["hi"]);
    }

    #[tokio::test]
    async fn unknown_command_prints_the_summary_and_errs() {
        let (engine, terminal) = test_engine();

        let err = engine.exec("nope").await.unwrap_err();
        assert!(matches!(err, ConchError::UnknownCommand(_)));
        let printed = terminal.output().join("\n");
        assert!(printed.contains("Commands:"));
        assert!(printed.contains("help [options] [command...]"));
    }

    #[tokio::test]
    async fn missing_argument_prints_that_commands_help() {
        let (engine, terminal) = test_engine();
        engine.command("deploy <env>").unwrap();

        let err = engine.exec("deploy").await.unwrap_err();
        assert!(matches!(err, ConchError::MissingRequiredArg(_)));
        let printed = terminal.output().join("\n");
        assert!(printed.contains("Usage:  deploy"));
    }

    #[tokio::test]
    async fn command_without_an_action_completes_with_null() {
        let (engine, _terminal) = test_engine();
        engine.command("stub").unwrap();

        assert_eq!(engine.exec("stub").await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn validate_error_stops_the_action() {
        let (engine, _terminal) = test_engine();
        let ran = Arc::new(Mutex::new(false));
        let seen = Arc::clone(&ran);
        engine
            .command("guarded")
            .unwrap()
            .validate(|_| Err(ConchError::Validation("not now".to_string())))
            .action(move |_, _| {
                *lock(&seen) = true;
                ActionFlow::unit()
            });

        let err = engine.exec("guarded").await.unwrap_err();
        assert!(matches!(err, ConchError::Validation(_)));
        assert!(!*lock(&ran));
    }

    #[tokio::test]
    async fn pipe_output_feeds_the_downstream_stage() {
        let (engine, terminal) = test_engine();
        engine.command("say <word>").unwrap().action(|ctx, args| {
            ctx.log(args.arg_str("word").unwrap_or_default());
            ActionFlow::unit()
        });
        engine.command("shout").unwrap().action(|ctx, _| {
            ctx.log(ctx.stdin().unwrap_or_default().to_uppercase());
            ActionFlow::unit()
        });

        engine.exec("say hello | shout").await.unwrap();
        assert_eq!(terminal.output(), vec!["HELLO"]);
    }

    #[tokio::test]
    async fn queued_requests_run_strictly_in_order() {
        let (engine, _terminal) = test_engine();
        let order = Arc::new(Mutex::new(Vec::new()));

        let seen = Arc::clone(&order);
        engine.command("first").unwrap().action(move |_, _| {
            let seen = Arc::clone(&seen);
            ActionFlow::from_future(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                lock(&seen).push("first-done");
                Ok(Value::Null)
            })
        });
        let seen = Arc::clone(&order);
        engine.command("second").unwrap().action(move |_, _| {
            lock(&seen).push("second-start");
            ActionFlow::unit()
        });

        let (a, b) = tokio::join!(engine.exec("first"), engine.exec("second"));
        a.unwrap();
        b.unwrap();
        assert_eq!(*lock(&order), ["first-done", "second-start"]);
    }

    // ---- cancellation tests ----

    #[tokio::test]
    async fn interrupt_cancels_the_active_set() {
        let (engine, _terminal) = test_engine();
        let slot: Arc<Mutex<Option<ExecContext>>> = Arc::new(Mutex::new(None));
        let hooks = Arc::new(Mutex::new(Vec::new()));

        let seen = Arc::clone(&hooks);
        let stash = Arc::clone(&slot);
        engine
            .command("wait")
            .unwrap()
            .cancel(move |_| lock(&seen).push("cancelled"))
            .action(move |ctx, _| {
                *lock(&stash) = Some(ctx);
                ActionFlow::Deferred
            });

        let canceller = engine.clone();
        let (result, ()) = tokio::join!(engine.exec("wait"), async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.interrupt();
        });
        assert!(matches!(result, Err(ConchError::Cancelled)));
        assert_eq!(*lock(&hooks), ["cancelled"]);

        // A late natural completion must be a no-op.
        let late = lock(&slot).take().unwrap();
        late.complete(Ok(json!("late")));

        register_speak(&engine);
        assert_eq!(engine.exec("speak").await.unwrap(), json!("hi"));
    }

    #[tokio::test]
    async fn interrupt_outside_a_command_pops_the_mode() {
        let (engine, _terminal) = test_engine();
        engine.mode("repl").unwrap();

        engine.exec("repl").await.unwrap();
        assert!(engine.session().in_mode());

        engine.interrupt();
        assert!(!engine.session().in_mode());

        // Idle and at the root: nothing to do.
        engine.interrupt();
    }

    // ---- help interception tests ----

    #[tokio::test]
    async fn help_flag_prints_standard_help_without_running_the_action() {
        let (engine, terminal) = test_engine();
        let ran = Arc::new(Mutex::new(false));
        let seen = Arc::clone(&ran);
        engine
            .command("greet [name]")
            .unwrap()
            .describe("Greets someone.")
            .action(move |_, _| {
                *lock(&seen) = true;
                ActionFlow::unit()
            });

        let result = engine.exec("greet --help").await.unwrap();
        assert_eq!(result, Value::Null);
        assert!(!*lock(&ran));
        let printed = terminal.output().join("\n");
        assert!(printed.contains("Usage:  greet"));
        assert!(printed.contains("Greets someone."));
    }

    #[tokio::test]
    async fn custom_help_hook_replaces_the_action() {
        let (engine, terminal) = test_engine();
        let ran = Arc::new(Mutex::new(false));
        let seen = Arc::clone(&ran);
        let greet = engine.command("greet [name]").unwrap();
        greet
            .action(move |_, _| {
                *lock(&seen) = true;
                ActionFlow::unit()
            })
            .help(|ctx, _| {
                ctx.log("custom help");
                ActionFlow::unit()
            });

        engine.exec("greet --help").await.unwrap();
        assert!(!*lock(&ran));
        assert_eq!(terminal.output(), vec!["custom help"]);
    }

    // ---- mode tests ----

    #[tokio::test]
    async fn mode_entry_redirect_and_exit() {
        let (engine, terminal) = test_engine();
        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&events);
        engine.observe(move |event| lock(&seen).push(event.clone()));

        let repl = engine.mode("repl").unwrap();
        repl.init(|ctx, _| {
            ctx.log("entered");
            ActionFlow::unit()
        })
        .unwrap()
        .action(|ctx, args| {
            ctx.log(args.raw().unwrap_or_default());
            ActionFlow::unit()
        });

        engine.exec("repl").await.unwrap();
        assert!(engine.session().in_mode());
        assert_eq!(engine.session().full_delimiter(), "conch$ repl: ");

        engine.exec("2+2").await.unwrap();
        assert_eq!(terminal.output(), vec!["entered", "2+2"]);

        engine.exec("exit").await.unwrap();
        assert!(!engine.session().in_mode());

        // Mode-scoped lines stay out of the root history.
        assert_eq!(engine.history_entries(), vec!["repl"]);

        let events = lock(&events);
        assert!(events.contains(&EngineEvent::ModeEntered {
            command: "repl".to_string()
        }));
        assert!(events.contains(&EngineEvent::ModeExited {
            command: "repl".to_string()
        }));
    }

    #[tokio::test]
    async fn mode_delimiter_overlay_can_be_customized() {
        let (engine, _terminal) = test_engine();
        engine.mode("calc").unwrap().delimiter("calc> ");

        engine.exec("calc").await.unwrap();
        assert_eq!(engine.session().full_delimiter(), "conch$ calc> ");
        engine.exec("exit").await.unwrap();
        assert_eq!(engine.session().full_delimiter(), "conch$ ");
    }

    // ---- synchronous execution tests ----

    #[test]
    fn exec_sync_runs_synchronous_actions() {
        let (engine, _terminal) = test_engine();
        register_speak(&engine);

        assert_eq!(engine.exec_sync("speak").unwrap(), json!("hi"));
    }

    #[test]
    fn exec_sync_rejects_awaitable_actions() {
        let (engine, _terminal) = test_engine();
        engine
            .command("later")
            .unwrap()
            .action(|_, _| ActionFlow::from_future(async { Ok(Value::Null) }));

        let err = engine.exec_sync("later").unwrap_err();
        assert!(matches!(err, ConchError::Usage(_)));
    }

    #[test]
    #[should_panic(expected = "unknown command")]
    fn exec_sync_fatal_panics_on_error() {
        let (engine, _terminal) = test_engine();
        let _ = engine.exec_sync_fatal("nope");
    }

    // ---- session tests ----

    #[tokio::test]
    async fn remote_sessions_log_through_their_relay() {
        let (engine, terminal) = test_engine();
        register_speak(&engine);

        let relay = Arc::new(CapturedRelay::new());
        let id = engine.attach_remote(Arc::clone(&relay) as Arc<dyn SessionRelay>);

        let result = engine.exec_in(id, "speak").await.unwrap();
        assert_eq!(result, json!("hi"));
        assert_eq!(relay.output(), vec![(id, "hi".to_string())]);
        assert!(terminal.output().is_empty());

        assert!(engine.detach_remote(id));
        assert!(engine.exec_in(id, "speak").await.is_err());
    }

    #[tokio::test]
    async fn catch_command_receives_unmatched_input() {
        let (engine, terminal) = test_engine();
        engine.catch("[words...]").unwrap().action(|ctx, args| {
            ctx.log(args.arg_list("words").unwrap_or_default().join(" "));
            ActionFlow::unit()
        });

        engine.exec("no such thing").await.unwrap();
        assert_eq!(terminal.output(), vec!["no such thing"]);
    }

    // ---- keypress tests ----

    #[tokio::test]
    async fn up_and_down_navigate_history() {
        let (engine, _terminal) = test_engine();
        register_speak(&engine);
        engine.exec("speak").await.unwrap();

        let up = engine.keypress(Key::Up, "", 0).await;
        assert_eq!(up, Some(KeypressOutcome::ReplaceLine("speak".to_string())));
        let down = engine.keypress(Key::Down, "speak", 5).await;
        assert_eq!(down, Some(KeypressOutcome::ReplaceLine(String::new())));
    }

    #[tokio::test]
    async fn tab_completes_and_damps_repeats() {
        let (engine, _terminal) = test_engine();
        engine.command("say <word>").unwrap();
        engine.command("ship").unwrap();

        let unique = engine.keypress(Key::Tab, "sa", 2).await;
        assert_eq!(
            unique,
            Some(KeypressOutcome::ReplaceLine("say ".to_string()))
        );

        let first = engine.keypress(Key::Tab, "s", 1).await;
        assert_eq!(
            first,
            Some(KeypressOutcome::Candidates(vec![
                "say".to_string(),
                "ship".to_string()
            ]))
        );
        // The same list on the next consecutive tab stays quiet.
        assert_eq!(engine.keypress(Key::Tab, "s", 1).await, None);

        engine.keypress(Key::Other, "s", 1).await;
        assert!(engine.keypress(Key::Tab, "s", 1).await.is_some());
    }

    // ---- observer and terminal tests ----

    #[tokio::test]
    async fn observers_see_the_command_lifecycle() {
        let (engine, _terminal) = test_engine();
        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&events);
        engine.observe(move |event| lock(&seen).push(event.clone()));

        register_speak(&engine);
        engine.exec("speak").await.unwrap();

        let events = lock(&events);
        assert!(events.contains(&EngineEvent::CommandRegistered {
            name: "speak".to_string()
        }));
        assert!(events.contains(&EngineEvent::CommandExecuted {
            command: "speak".to_string()
        }));
    }

    #[test]
    fn show_steals_the_wire_from_the_previous_owner() {
        let terminal = Arc::new(CapturedTerminal::new());
        let wire = Arc::new(TerminalWire::new(Arc::clone(&terminal) as Arc<dyn Terminal>));
        let a = Engine::with_wire(EngineConfig::default(), Arc::clone(&wire)).unwrap();
        let b = Engine::with_wire(EngineConfig::default(), Arc::clone(&wire)).unwrap();

        a.show();
        assert!(a.is_shown());
        b.show();
        assert!(!a.is_shown());
        assert!(b.is_shown());

        a.hide();
        assert!(b.is_shown());
        b.hide();
        assert!(!b.is_shown());
    }

    #[test]
    fn delimiter_setter_feeds_the_session_prompt() {
        let (engine, _terminal) = test_engine();
        assert_eq!(engine.session().full_delimiter(), "conch$ ");
        engine.delimiter("db> ");
        assert_eq!(engine.session().full_delimiter(), "db> ");
    }
}
