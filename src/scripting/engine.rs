//! Compiles and runs submitted scripts, one worker per execution.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rhai::{Dynamic, Engine, EvalAltResult, Scope};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::broadcast::BroadcastBus;
use crate::core::protocol::{EvalReport, Outbound};
use crate::core::scene::SceneRegistry;
use crate::core::user::UserDescriptor;
use crate::scripting::api::{register_api, CharacterHandle, WorldHandle};
use crate::scripting::hooks::OutputHooks;

/// Captured console output beyond this many bytes is dropped.
pub const OUTPUT_LIMIT: usize = 64 * 1024;

const WARM_UP_PROGRAM: &str = "fn main() {}";
const PROGRESS_STRIDE: u64 = 256;
const CANCELLED: &str = "cancelled";
const TIMED_OUT: &str = "timeout";

#[derive(Debug, Clone)]
pub struct ScriptConfig {
    /// Wall-clock budget of a single execution.
    pub timeout: Duration,
    /// Operation quota per execution; 0 disables it.
    pub max_operations: u64,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_operations: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success {
        output: String,
    },
    /// Nothing ran.
    CompileFailure {
        diagnostics: Vec<String>,
    },
    RuntimeFailure {
        output: String,
        kind: String,
        message: String,
    },
    /// Superseded or abandoned; never reported.
    Cancelled,
}

impl Outcome {
    pub fn into_report(self) -> EvalReport {
        match self {
            Self::Success { output } => EvalReport {
                console: non_empty(output),
                errors: None,
            },
            Self::CompileFailure { diagnostics } => EvalReport {
                console: None,
                errors: Some(format!("Compilation errors\n{}", diagnostics.join("\n"))),
            },
            Self::RuntimeFailure {
                output,
                kind,
                message,
            } => EvalReport {
                console: non_empty(output),
                errors: Some(format!("Runtime errors\n{kind}: {message}")),
            },
            Self::Cancelled => EvalReport::default(),
        }
    }
}

fn non_empty(text: String) -> Option<String> {
    (!text.is_empty()).then_some(text)
}

#[derive(Debug, Default)]
struct Capture {
    text: String,
    truncated: bool,
}

impl Capture {
    fn push_line(&mut self, line: &str) {
        if self.truncated {
            return;
        }
        if self.text.len() + line.len() + 1 > OUTPUT_LIMIT {
            self.truncated = true;
            self.text.push_str("...output truncated\n");
            return;
        }
        self.text.push_str(line);
        self.text.push('\n');
    }
}

/// One script run bound to its caller's character. Blocking; call from a
/// blocking worker.
pub struct Execution {
    code: String,
    character: CharacterHandle,
    world: WorldHandle,
    cancel: CancellationToken,
    timeout: Duration,
    max_operations: u64,
}

impl Execution {
    pub fn new(
        code: String,
        character: CharacterHandle,
        world: WorldHandle,
        cancel: CancellationToken,
        config: &ScriptConfig,
    ) -> Self {
        Self {
            code,
            character,
            world,
            cancel,
            timeout: config.timeout,
            max_operations: config.max_operations,
        }
    }

    pub fn run(self) -> Outcome {
        if self.cancel.is_cancelled() {
            return Outcome::Cancelled;
        }
        let capture = Arc::new(Mutex::new(Capture::default()));
        let mut engine = Engine::new();
        register_api(&mut engine);
        engine.set_max_expr_depths(64, 64);
        engine.set_max_call_levels(64);
        if self.max_operations > 0 {
            engine.set_max_operations(self.max_operations);
        }

        let sink = capture.clone();
        engine.on_print(move |text| sink.lock().push_line(text));
        let sink = capture.clone();
        engine.on_debug(move |text, _source, _pos| sink.lock().push_line(text));

        let cancel = self.cancel.clone();
        let deadline = Instant::now() + self.timeout;
        engine.on_progress(move |ops| {
            if ops % PROGRESS_STRIDE != 0 {
                None
            } else if cancel.is_cancelled() {
                Some(Dynamic::from(CANCELLED.to_string()))
            } else if Instant::now() >= deadline {
                Some(Dynamic::from(TIMED_OUT.to_string()))
            } else {
                None
            }
        });

        let ast = match engine.compile(&self.code) {
            Ok(ast) => ast,
            Err(err) => {
                return Outcome::CompileFailure {
                    diagnostics: vec![err.to_string()],
                }
            }
        };

        let mut scope = Scope::new();
        scope.push("character", self.character);
        scope.push("world", self.world);
        let result = engine.run_ast_with_scope(&mut scope, &ast);
        drop(engine);
        let output = std::mem::take(&mut capture.lock().text);

        let Err(err) = result else {
            return Outcome::Success { output };
        };
        match terminated_by(&err).as_deref() {
            Some(CANCELLED) => Outcome::Cancelled,
            Some(_) => Outcome::RuntimeFailure {
                output,
                kind: "Timeout".into(),
                message: format!("execution exceeded {} ms", self.timeout.as_millis()),
            },
            None => Outcome::RuntimeFailure {
                output,
                kind: failure_kind(&err).into(),
                message: failure_message(&err),
            },
        }
    }
}

fn terminated_by(err: &EvalAltResult) -> Option<String> {
    match err {
        EvalAltResult::ErrorTerminated(token, _) => Some(token.to_string()),
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => terminated_by(inner),
        _ => None,
    }
}

/// Short name of what went wrong, reported as the prefix of the error line.
pub fn failure_kind(err: &EvalAltResult) -> &'static str {
    match err {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => failure_kind(inner),
        EvalAltResult::ErrorRuntime(..) => "RuntimeError",
        EvalAltResult::ErrorArithmetic(..) => "ArithmeticError",
        EvalAltResult::ErrorVariableNotFound(..) => "VariableNotFound",
        EvalAltResult::ErrorFunctionNotFound(..) => "FunctionNotFound",
        EvalAltResult::ErrorPropertyNotFound(..) => "PropertyNotFound",
        EvalAltResult::ErrorMismatchDataType(..) => "TypeMismatch",
        EvalAltResult::ErrorArrayBounds(..) | EvalAltResult::ErrorStringBounds(..) => {
            "IndexOutOfBounds"
        }
        EvalAltResult::ErrorTooManyOperations(..) => "TooManyOperations",
        EvalAltResult::ErrorStackOverflow(..) => "StackOverflow",
        EvalAltResult::ErrorDataTooLarge(..) => "DataTooLarge",
        EvalAltResult::ErrorTerminated(..) => "Terminated",
        _ => "EvalError",
    }
}

fn failure_message(err: &EvalAltResult) -> String {
    match err {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => failure_message(inner),
        EvalAltResult::ErrorRuntime(value, pos) if !pos.is_none() => format!("{value} ({pos})"),
        EvalAltResult::ErrorRuntime(value, _) => value.to_string(),
        other => other.to_string(),
    }
}

struct Shared {
    scene: Arc<SceneRegistry>,
    bus: Arc<BroadcastBus>,
    hooks: OutputHooks,
    config: ScriptConfig,
    ready: watch::Sender<bool>,
}

/// Runs each user's latest submission and reports it to that user only.
///
/// Every submission gets its own task; a new one cancels the user's previous
/// one and only the newest result is ever delivered. Submissions that arrive
/// before [`ScriptEngine::warm_up`] has finished wait for it.
#[derive(Clone)]
pub struct ScriptEngine {
    shared: Arc<Shared>,
}

impl ScriptEngine {
    pub fn new(scene: Arc<SceneRegistry>, config: ScriptConfig) -> Self {
        Self::with_hooks(scene, config, OutputHooks::with_defaults())
    }

    pub fn with_hooks(scene: Arc<SceneRegistry>, config: ScriptConfig, hooks: OutputHooks) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                bus: scene.bus().clone(),
                scene,
                hooks,
                config,
                ready,
            }),
        }
    }

    /// Compile and run an empty program once, then open the gate.
    pub fn warm_up(&self) -> JoinHandle<()> {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let result = tokio::task::spawn_blocking(|| {
                Engine::new().run(WARM_UP_PROGRAM).map_err(|err| err.to_string())
            })
            .await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(error = %err, "warm-up program failed"),
                Err(err) => error!(error = %err, "warm-up worker died"),
            }
            shared.ready.send_replace(true);
            info!(elapsed_ms = started.elapsed().as_millis() as u64, "scripting initiated");
        })
    }

    pub fn is_ready(&self) -> bool {
        *self.shared.ready.borrow()
    }

    pub fn config(&self) -> &ScriptConfig {
        &self.shared.config
    }

    /// Start `code` for `user`, cancelling whatever it was running. Returns the
    /// execution's generation.
    pub fn submit(&self, user: Arc<UserDescriptor>, code: String) -> u64 {
        let (generation, cancel) = user.begin_execution();
        debug!(session = %user.session(), generation, "eval submitted");
        let shared = self.shared.clone();
        tokio::spawn(shared.execute(user, generation, cancel, code));
        generation
    }
}

impl Shared {
    async fn execute(
        self: Arc<Self>,
        user: Arc<UserDescriptor>,
        generation: u64,
        cancel: CancellationToken,
        code: String,
    ) {
        let ready_now = *self.ready.borrow();
        if !ready_now {
            debug!(session = %user.session(), generation, "eval waiting for scripting");
            let mut ready = self.ready.subscribe();
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = async { ready.wait_for(|ready| *ready).await.is_ok() } => {}
            }
        }
        if !user.is_current(generation) {
            return;
        }

        let character = CharacterHandle::new(user.character(), self.scene.clone());
        let execution = Execution::new(
            code,
            character.clone(),
            WorldHandle::new(self.scene.clone()),
            cancel,
            &self.config,
        );
        let worker = {
            let shared = self.clone();
            let user = user.clone();
            tokio::task::spawn_blocking(move || {
                let mut outcome = execution.run();
                if let Outcome::Success { output } = &mut outcome {
                    if user.is_current(generation) {
                        shared.hooks.apply(&character, output);
                    }
                }
                outcome
            })
        };
        let outcome = match worker.await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(session = %user.session(), generation, error = %err, "eval worker died");
                user.finish_execution(generation);
                return;
            }
        };

        if !user.finish_execution(generation) || outcome == Outcome::Cancelled {
            debug!(session = %user.session(), generation, "stale eval result dropped");
            return;
        }
        let delivered = self
            .bus
            .send_to_one(user.session(), &Outbound::GetEvalResult(outcome.into_report()));
        debug!(session = %user.session(), generation, delivered, "eval result sent");
    }
}
