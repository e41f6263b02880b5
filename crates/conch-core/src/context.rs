//! Per-stage execution context handed to command actions.
//!
//! Each pipe stage gets its own [`ExecContext`]. The context carries the
//! parsed args, the session, a cancellation token shared across the whole
//! invocation, and an owned link to the next stage. Output flows through
//! [`ExecContext::log`]: stages with a downstream feed it, the last stage
//! writes to the session.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::Notify;

use conch_types::{Args, ConchError, Result};

use crate::command::Command;
use crate::session::Session;

// ---------------------------------------------------------------------------
// Action flow
// ---------------------------------------------------------------------------

/// How an action hands its result back to the engine.
pub enum ActionFlow {
    /// Finished synchronously.
    Done(Result<Value>),
    /// Finishes when the future resolves.
    Pending(BoxFuture<'static, Result<Value>>),
    /// The action keeps a context clone and calls
    /// [`ExecContext::complete`] itself later.
    Deferred,
}

impl ActionFlow {
    /// Synchronous success carrying a value.
    pub fn ok(value: Value) -> Self {
        Self::Done(Ok(value))
    }

    /// Synchronous success with no value.
    pub fn unit() -> Self {
        Self::Done(Ok(Value::Null))
    }

    /// Synchronous failure.
    pub fn err(err: ConchError) -> Self {
        Self::Done(Err(err))
    }

    /// Adapt any sendable future into the pending form.
    pub fn from_future<F>(fut: F) -> Self
    where
        F: Future<Output = Result<Value>> + Send + 'static,
    {
        Self::Pending(Box::pin(fut))
    }
}

impl fmt::Debug for ActionFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done(result) => f.debug_tuple("Done").field(result).finish(),
            Self::Pending(_) => f.write_str("Pending(..)"),
            Self::Deferred => f.write_str("Deferred"),
        }
    }
}

// ---------------------------------------------------------------------------
// Cancellation token
// ---------------------------------------------------------------------------

/// Cooperative cancellation flag shared by every stage of an invocation.
///
/// The engine raises it when the session cancels. Long-running actions
/// either poll [`CancelToken::is_cancelled`] between work items or race
/// their work against [`CancelToken::cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolve once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            // Registered before the flag check so a concurrent cancel
            // cannot slip between them.
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Execution context
// ---------------------------------------------------------------------------

struct CtxInner {
    command: Arc<Command>,
    args: Args,
    raw: String,
    session: Arc<Session>,
    downstream: Option<ExecContext>,
    stdin: Mutex<Option<String>>,
    is_root: bool,
    token: CancelToken,
}

/// Handle an action uses to talk back to the engine.
#[derive(Clone)]
pub struct ExecContext {
    inner: Arc<CtxInner>,
}

impl ExecContext {
    pub(crate) fn new(
        command: Arc<Command>,
        args: Args,
        raw: String,
        session: Arc<Session>,
        downstream: Option<ExecContext>,
        is_root: bool,
        token: CancelToken,
    ) -> Self {
        Self {
            inner: Arc::new(CtxInner {
                command,
                args,
                raw,
                session,
                downstream,
                stdin: Mutex::new(None),
                is_root,
                token,
            }),
        }
    }

    pub fn command(&self) -> &Arc<Command> {
        &self.inner.command
    }

    pub fn args(&self) -> &Args {
        &self.inner.args
    }

    /// The raw text of this stage as typed.
    pub fn raw(&self) -> &str {
        &self.inner.raw
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.inner.session
    }

    pub fn downstream(&self) -> Option<&ExecContext> {
        self.inner.downstream.as_ref()
    }

    /// Whether this context is the first stage of its invocation.
    pub fn is_root(&self) -> bool {
        self.inner.is_root
    }

    /// Piped input most recently fed to this stage.
    pub fn stdin(&self) -> Option<String> {
        self.inner
            .stdin
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_stdin(&self, text: String) {
        *self
            .inner
            .stdin
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(text);
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.inner.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Raise the session's cancellation signal for this invocation.
    pub fn cancel(&self) {
        self.inner.session.cancel();
    }

    /// Finish a deferred action with its result.
    pub fn complete(&self, result: Result<Value>) {
        if self.inner.is_root {
            self.inner.session.complete_root(result);
        } else {
            self.inner.session.complete_command(result);
        }
    }

    /// Emit one chunk of output.
    ///
    /// With a downstream stage the text becomes that stage's piped input and
    /// its action runs once per call; otherwise the text goes to the session.
    pub fn log(&self, text: impl fmt::Display) {
        let text = text.to_string();
        match &self.inner.downstream {
            Some(downstream) => self.feed_downstream(downstream, text),
            None => self.inner.session.log(&text),
        }
    }

    fn feed_downstream(&self, downstream: &ExecContext, text: String) {
        let session = &self.inner.session;
        session.register_command();
        downstream.set_stdin(text);

        if let Some(validate) = downstream.command().validate_hook()
            && let Err(err) = validate(downstream.args())
        {
            session.complete_command(Err(err));
            return;
        }
        let Some(action) = downstream.command().action_hook() else {
            session.complete_command(Ok(Value::Null));
            return;
        };

        match action(downstream.clone(), downstream.args().clone()) {
            ActionFlow::Done(result) => session.complete_command(result),
            ActionFlow::Pending(fut) => match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let session = Arc::clone(session);
                    handle.spawn(async move {
                        session.complete_command(fut.await);
                    });
                },
                Err(_) => {
                    session.complete_command(Err(ConchError::Usage(
                        "asynchronous pipe stage outside an async runtime".to_string(),
                    )));
                },
            },
            // The stage completes itself through its own context.
            ActionFlow::Deferred => {},
        }
    }
}

impl fmt::Debug for ExecContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecContext")
            .field("command", &self.inner.command.name())
            .field("is_root", &self.inner.is_root)
            .field("has_downstream", &self.inner.downstream.is_some())
            .finish_non_exhaustive()
    }
}
