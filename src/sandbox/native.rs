use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use rquickjs::convert::Coerced;
use rquickjs::{CatchResultExt, CaughtError, Context, Ctx, Function, Runtime};

use crate::{
    config::ExecutorConfig,
    core::{
        domain::{ExecutionRequest, ExecutionResult, ExecutionState},
        errors::{ExecutionError, RunnerError},
        traits::runner::Runner,
    },
    sandbox::registry::{AbortHandle, ContextRegistry},
};

const PRELUDE: &str = include_str!("prelude.js");
const FLUSH_TIMERS: &str = "__codeexecFlushTimers";
const IDLE_POLL: Duration = Duration::from_millis(2);
/// Extra time granted to the blocking task on top of timeout and grace period
/// before the async side gives up on it.
const HARD_LIMIT_SLACK: Duration = Duration::from_secs(1);

/// Runs JavaScript (and TypeScript, treated as the same language) in a fresh
/// QuickJS runtime per invocation.
#[derive(Debug, Clone)]
pub struct NativeRunner {
    registry: ContextRegistry,
    grace_period: Duration,
    memory_limit: Option<usize>,
}

impl NativeRunner {
    pub fn new(config: &ExecutorConfig, registry: ContextRegistry) -> Self {
        NativeRunner {
            registry,
            grace_period: config.grace_period,
            memory_limit: config.js_memory_limit,
        }
    }
}

#[async_trait::async_trait]
impl Runner for NativeRunner {
    #[tracing::instrument(skip_all, fields(language = %request.language))]
    async fn run(&self, request: &ExecutionRequest) -> Result<ExecutionResult, RunnerError> {
        let lease = self.registry.acquire();
        let started = Instant::now();
        let sandbox = Sandbox {
            code: request.code.clone(),
            stdin: request.stdin.clone(),
            timeout: request.timeout,
            grace_period: self.grace_period,
            memory_limit: self.memory_limit,
            abort: lease.handle().clone(),
        };

        let task = tokio::task::spawn_blocking(move || sandbox.execute(started));
        let hard_limit = request.timeout + self.grace_period + HARD_LIMIT_SLACK;

        match tokio::time::timeout(hard_limit, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) if err.is_panic() => Err(RunnerError::Panicked {
                msg: err.to_string(),
            }),
            Ok(Err(err)) => Err(RunnerError::Internal {
                msg: err.to_string(),
            }),
            Err(_) => {
                // The engine ignored its interrupt hook; stop waiting and let
                // the abort flag reach it whenever it yields.
                tracing::warn!(context = %lease.id(), "script engine missed its deadline");
                lease.handle().abort();
                Ok(ExecutionResult::failure(
                    ExecutionError::Timeout,
                    "",
                    started.elapsed(),
                ))
            }
        }
    }
}

#[derive(Default)]
struct Console {
    lines: Vec<String>,
    error: Option<String>,
}

impl Console {
    fn record(&mut self, level: &str, line: String) {
        match level {
            "error" => self.error = Some(line),
            _ => self.lines.push(line),
        }
    }
}

/// Everything one invocation needs, moved onto a blocking thread.
struct Sandbox {
    code: String,
    stdin: Option<String>,
    timeout: Duration,
    grace_period: Duration,
    memory_limit: Option<usize>,
    abort: AbortHandle,
}

impl Sandbox {
    fn execute(self, started: Instant) -> Result<ExecutionResult, RunnerError> {
        let deadline = started + self.timeout;
        let runtime = Runtime::new().map_err(internal)?;
        if let Some(limit) = self.memory_limit {
            runtime.set_memory_limit(limit);
        }

        let interrupted = Arc::new(AtomicBool::new(false));
        {
            let interrupted = interrupted.clone();
            let aborted = self.abort.flag();
            runtime.set_interrupt_handler(Some(Box::new(move || {
                let stop = aborted.load(Ordering::SeqCst) || Instant::now() >= deadline;
                if stop {
                    interrupted.store(true, Ordering::SeqCst);
                }
                stop
            })));
        }

        let context = Context::full(&runtime).map_err(internal)?;
        let console = Rc::new(RefCell::new(Console::default()));

        let evaluated = context.with(|ctx| -> rquickjs::Result<Option<ExecutionError>> {
            install(&ctx, console.clone(), self.stdin.as_deref())?;
            Ok(ctx
                .eval::<(), _>(self.code.as_str())
                .catch(&ctx)
                .err()
                .map(describe))
        });
        let mut thrown = match evaluated {
            Ok(thrown) => thrown,
            Err(_) if interrupted.load(Ordering::SeqCst) => None,
            Err(err) => return Err(internal(err)),
        };

        if thrown.is_none() && !interrupted.load(Ordering::SeqCst) {
            thrown = self.drain(&runtime, &context, &interrupted, deadline);
        }

        let Console { lines, error } = console.take();
        let output = lines.join("\n");
        let memory = runtime.memory_usage().memory_used_size as f64;

        let state = if interrupted.load(Ordering::SeqCst) {
            if self.abort.is_aborted() {
                ExecutionState::Aborted
            } else {
                ExecutionState::TimedOut
            }
        } else if thrown.is_some() || error.is_some() {
            ExecutionState::Failed
        } else {
            ExecutionState::Succeeded
        };
        tracing::debug!(?state, elapsed = ?started.elapsed(), "script finished");

        let elapsed = started.elapsed();
        let result = match state {
            ExecutionState::Aborted => ExecutionResult::failure(ExecutionError::Aborted, output, elapsed),
            ExecutionState::TimedOut => ExecutionResult::failure(ExecutionError::Timeout, output, elapsed),
            ExecutionState::Failed => {
                // an uncaught exception outranks earlier console.error calls
                let error = thrown.or(error.map(ExecutionError::program));
                ExecutionResult::failure(
                    error.unwrap_or_else(|| ExecutionError::program("Unknown error")),
                    output,
                    elapsed,
                )
            }
            _ => ExecutionResult::success(output, elapsed),
        };
        Ok(result.with_memory_usage(memory))
    }

    /// Runs pending promise jobs and due timers until nothing is left, the
    /// grace period ends or the deadline passes.
    fn drain(
        &self,
        runtime: &Runtime,
        context: &Context,
        interrupted: &AtomicBool,
        deadline: Instant,
    ) -> Option<ExecutionError> {
        let grace_end = Instant::now() + self.grace_period;
        loop {
            loop {
                match runtime.execute_pending_job() {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(_) => {
                        return Some(context.with(|ctx| {
                            describe(CaughtError::from_error(&ctx, rquickjs::Error::Exception))
                        }));
                    }
                }
            }
            if interrupted.load(Ordering::SeqCst) {
                return None;
            }

            let pending_timers = match context.with(|ctx| flush_timers(&ctx)) {
                Ok(pending) => pending,
                Err(err) => return Some(err),
            };
            if interrupted.load(Ordering::SeqCst)
                || (pending_timers == 0 && !runtime.is_job_pending())
            {
                return None;
            }

            let now = Instant::now();
            if now >= deadline {
                interrupted.store(true, Ordering::SeqCst);
                return None;
            }
            if now >= grace_end {
                tracing::debug!(pending_timers, "dropping callbacks still pending after grace period");
                return None;
            }
            std::thread::sleep(IDLE_POLL);
        }
    }
}

/// Wires console capture, `prompt` and timers into a fresh context.
fn install<'js>(
    ctx: &Ctx<'js>,
    console: Rc<RefCell<Console>>,
    stdin: Option<&str>,
) -> rquickjs::Result<()> {
    let lines: VecDeque<String> = stdin
        .map(|s| s.lines().map(String::from).collect())
        .unwrap_or_default();
    let lines = RefCell::new(lines);

    let emit = Function::new(ctx.clone(), move |level: String, line: String| {
        console.borrow_mut().record(&level, line);
    })?;
    let read_line = Function::new(ctx.clone(), move || -> String {
        lines.borrow_mut().pop_front().unwrap_or_default()
    })?;

    let installer: Function = ctx.eval(PRELUDE)?;
    installer.call::<_, ()>((emit, read_line))
}

fn flush_timers(ctx: &Ctx<'_>) -> Result<u32, ExecutionError> {
    let Ok(flush) = ctx.globals().get::<_, Function>(FLUSH_TIMERS) else {
        return Ok(0);
    };
    flush.call::<_, u32>(()).catch(ctx).map_err(describe)
}

fn describe(error: CaughtError<'_>) -> ExecutionError {
    match error {
        CaughtError::Exception(exception) => {
            let message = exception
                .message()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "Uncaught exception".to_string());
            ExecutionError::Program {
                message,
                stack_trace: exception.stack().filter(|s| !s.trim().is_empty()),
            }
        }
        CaughtError::Value(value) => ExecutionError::program(
            value
                .get::<Coerced<String>>()
                .map(|s| s.0)
                .unwrap_or_else(|_| "Uncaught exception".to_string()),
        ),
        CaughtError::Error(err) => ExecutionError::program(err.to_string()),
    }
}

fn internal(err: rquickjs::Error) -> RunnerError {
    RunnerError::Internal {
        msg: format!("script engine failure: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::Language;

    fn runner() -> (NativeRunner, ContextRegistry) {
        let registry = ContextRegistry::new();
        (
            NativeRunner::new(&ExecutorConfig::default(), registry.clone()),
            registry,
        )
    }

    fn request(code: &str, stdin: Option<&str>, timeout_ms: u64) -> ExecutionRequest {
        ExecutionRequest {
            language: Language::JavaScript,
            code: code.to_string(),
            stdin: stdin.map(String::from),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    async fn run(code: &str) -> ExecutionResult {
        let (runner, _) = runner();
        runner.run(&request(code, None, 5000)).await.unwrap()
    }

    #[tokio::test]
    async fn test_console_log_is_captured() {
        let result = run(r#"console.log("x")"#).await;
        assert!(result.success);
        assert_eq!(result.output, "x");
        assert_eq!(result.error, None);
        assert!(result.memory_usage.unwrap() > 0.0);
    }

    #[tokio::test]
    async fn test_arguments_are_joined_and_stringified() {
        let result = run(r#"console.log("a", 1, [0, 1], {k: true}, null, undefined)"#).await;
        assert_eq!(result.output, "a 1 0,1 [object Object] null undefined");
    }

    #[tokio::test]
    async fn test_throwing_to_string_still_logs() {
        let result = run(r#"console.log("v", { toString() { throw new Error("no"); } })"#).await;
        assert!(result.success);
        assert_eq!(result.output, "v [object Object]");
    }

    #[tokio::test]
    async fn test_info_and_warn_are_prefixed() {
        let result = run(r#"console.log("one"); console.info("two"); console.warn("three", [4, 5]);"#).await;
        assert!(result.success);
        assert_eq!(result.output, "one\nInfo: two\nWarning: three 4,5");
    }

    #[tokio::test]
    async fn test_console_error_marks_failure() {
        let result = run(r#"console.log("before"); console.error("first"); console.error("bad", 42);"#).await;
        assert!(!result.success);
        assert_eq!(result.output, "before");
        assert_eq!(result.error.as_deref(), Some("bad 42"));
    }

    #[tokio::test]
    async fn test_thrown_error_keeps_partial_output() {
        let result = run(
            r#"
            console.log("partial");
            function explode() { throw new Error("boom"); }
            explode();
            console.log("unreachable");
            "#,
        )
        .await;
        assert!(!result.success);
        assert_eq!(result.output, "partial");
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert!(result.stack_trace.unwrap().contains("explode"));
    }

    #[tokio::test]
    async fn test_thrown_non_error_value() {
        let result = run(r#"throw "plain string""#).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("plain string"));
    }

    #[tokio::test]
    async fn test_reference_error() {
        let result = run("notDefined + 1").await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("notDefined"));
    }

    #[tokio::test]
    async fn test_empty_program() {
        let result = run("").await;
        assert!(result.success);
        assert_eq!(result.output, "");
    }

    #[tokio::test]
    async fn test_infinite_loop_times_out() {
        let (runner, registry) = runner();
        let started = Instant::now();
        let result = runner
            .run(&request("while (true) {}", None, 200))
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Execution timeout"));
        assert!(result.execution_time_ms >= 200.0);
        assert!(started.elapsed() < Duration::from_millis(1500));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_prompt_reads_stdin_lines() {
        let (runner, _) = runner();
        let code = r#"
            const a = Number(prompt());
            const b = Number(prompt());
            console.log(a + b, JSON.stringify(prompt()));
        "#;
        let result = runner.run(&request(code, Some("2\n40\n"), 5000)).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output, r#"42 """#);
    }

    #[tokio::test]
    async fn test_promise_continuations_flush() {
        let result = run(
            r#"
            Promise.resolve(1).then((v) => console.log("then", v));
            (async () => { await null; console.log("async"); })();
            console.log("sync");
            "#,
        )
        .await;
        assert!(result.success);
        assert_eq!(result.output, "sync\nthen 1\nasync");
    }

    #[tokio::test]
    async fn test_short_timers_run_within_grace_period() {
        let result = run(r#"setTimeout(() => console.log("timer", 7), 10); console.log("now");"#).await;
        assert!(result.success);
        assert_eq!(result.output, "now\ntimer 7");
    }

    #[tokio::test]
    async fn test_late_timers_are_dropped() {
        let started = Instant::now();
        let result = run(r#"setTimeout(() => console.log("late"), 10000); console.log("done");"#).await;
        assert!(result.success);
        assert_eq!(result.output, "done");
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_cleared_timer_does_not_fire() {
        let result = run(r#"const id = setTimeout(() => console.log("no"), 5); clearTimeout(id);"#).await;
        assert!(result.success);
        assert_eq!(result.output, "");
    }

    #[tokio::test]
    async fn test_error_in_timer_callback() {
        let result = run(r#"setTimeout(() => { throw new TypeError("late failure"); }, 1);"#).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("late failure"));
    }

    #[tokio::test]
    async fn test_contexts_are_not_shared() {
        let (runner, _) = runner();
        runner
            .run(&request("globalThis.leaked = 1;", None, 5000))
            .await
            .unwrap();
        let result = runner
            .run(&request("console.log(typeof leaked)", None, 5000))
            .await
            .unwrap();
        assert_eq!(result.output, "undefined");
    }

    #[tokio::test]
    async fn test_abort_stops_running_script() {
        let (runner, registry) = runner();
        let aborter = {
            let registry = registry.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                registry.abort_all()
            })
        };
        let result = runner
            .run(&request("for (;;) {}", None, 10_000))
            .await
            .unwrap();

        assert_eq!(aborter.await.unwrap(), 1);
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Execution aborted"));
    }
}
