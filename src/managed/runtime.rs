use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, OnceLock};

use thiserror::Error;
use tokio::process::Command;
use tokio::sync::{Mutex, MutexGuard, OnceCell};

use crate::config::ExecutorConfig;

/// A located, working interpreter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Interpreter {
    pub program: PathBuf,
    pub version: String,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no interpreter found among {candidates:?}")]
    NotFound { candidates: Vec<String> },
}

/// Bootstraps the managed runtime. Called at most once per `ManagedRuntime`.
#[mockall::automock]
#[async_trait::async_trait]
pub trait RuntimeLoader: std::fmt::Debug + Send + Sync {
    async fn load(&self) -> Result<Interpreter, LoadError>;
}

/// Finds a Python interpreter on the host by asking each candidate for its version.
#[derive(Debug, Clone)]
pub struct InterpreterLoader {
    candidates: Vec<String>,
}

impl InterpreterLoader {
    pub fn new(candidates: Vec<String>) -> Self {
        InterpreterLoader { candidates }
    }

    async fn probe(candidate: &str) -> Option<Interpreter> {
        let out = Command::new(candidate)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .ok()?;
        if !out.status.success() {
            return None;
        }
        // Python 2 printed its version to stderr
        let version = [out.stdout, out.stderr]
            .iter()
            .map(|bytes| String::from_utf8_lossy(bytes).trim().to_string())
            .find(|s| !s.is_empty())
            .unwrap_or_default();
        Some(Interpreter {
            program: PathBuf::from(candidate),
            version,
        })
    }
}

#[async_trait::async_trait]
impl RuntimeLoader for InterpreterLoader {
    #[tracing::instrument]
    async fn load(&self) -> Result<Interpreter, LoadError> {
        for candidate in &self.candidates {
            if let Some(interpreter) = Self::probe(candidate).await {
                return Ok(interpreter);
            }
            tracing::debug!(candidate, "interpreter candidate unusable");
        }
        Err(LoadError::NotFound {
            candidates: self.candidates.clone(),
        })
    }
}

static GLOBAL: OnceLock<Arc<ManagedRuntime>> = OnceLock::new();

/// Lazily bootstrapped interpreter shared by every managed-language run.
///
/// The outcome of the first bootstrap is memoized, including failure: a
/// runtime that failed to load stays unavailable for the life of the value.
#[derive(Debug)]
pub struct ManagedRuntime {
    loader: Arc<dyn RuntimeLoader>,
    state: OnceCell<Option<Interpreter>>,
    serial: Mutex<()>,
}

impl ManagedRuntime {
    pub fn new(loader: Arc<dyn RuntimeLoader>) -> Self {
        ManagedRuntime {
            loader,
            state: OnceCell::new(),
            serial: Mutex::new(()),
        }
    }

    /// The process-wide instance. The config of the first caller decides which
    /// interpreters are probed.
    pub fn global(config: &ExecutorConfig) -> Arc<ManagedRuntime> {
        GLOBAL
            .get_or_init(|| {
                Arc::new(ManagedRuntime::new(Arc::new(InterpreterLoader::new(
                    config.python_candidates.clone(),
                ))))
            })
            .clone()
    }

    /// Bootstraps on first call; later and concurrent calls share the outcome.
    pub async fn initialize(&self) -> Option<&Interpreter> {
        self.state
            .get_or_init(|| async {
                match self.loader.load().await {
                    Ok(interpreter) => {
                        tracing::info!(
                            program = %interpreter.program.display(),
                            version = %interpreter.version,
                            "managed runtime ready"
                        );
                        Some(interpreter)
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "managed runtime failed to load");
                        None
                    }
                }
            })
            .await
            .as_ref()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state.get(), Some(Some(_)))
    }

    /// Runs through one interpreter are serialized by holding this guard.
    pub async fn exclusive(&self) -> MutexGuard<'_, ()> {
        self.serial.lock().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn interpreter() -> Interpreter {
        Interpreter {
            program: PathBuf::from("python3"),
            version: "Python 3.12.0".to_string(),
        }
    }

    #[tokio::test]
    async fn test_concurrent_initialize_loads_once() {
        let mut loader = MockRuntimeLoader::new();
        loader.expect_load().times(1).returning(|| Ok(interpreter()));
        let runtime = ManagedRuntime::new(Arc::new(loader));

        assert!(!runtime.is_ready());
        let (first, second) = tokio::join!(runtime.initialize(), runtime.initialize());
        assert_eq!(first, Some(&interpreter()));
        assert_eq!(second, Some(&interpreter()));
        assert!(runtime.is_ready());

        assert!(runtime.initialize().await.is_some());
    }

    #[tokio::test]
    async fn test_failed_load_is_memoized() {
        let mut loader = MockRuntimeLoader::new();
        loader.expect_load().times(1).returning(|| {
            Err(LoadError::NotFound {
                candidates: vec!["python3".to_string()],
            })
        });
        let runtime = ManagedRuntime::new(Arc::new(loader));

        assert!(runtime.initialize().await.is_none());
        assert!(runtime.initialize().await.is_none());
        assert!(!runtime.is_ready());
    }

    #[tokio::test]
    async fn test_exclusive_serializes_holders() {
        let runtime = Arc::new(ManagedRuntime::new(Arc::new(MockRuntimeLoader::new())));
        let guard = runtime.exclusive().await;

        let contender = {
            let runtime = runtime.clone();
            tokio::spawn(async move {
                let _guard = runtime.exclusive().await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .expect("second holder should proceed")
            .unwrap();
    }

    #[tokio::test]
    async fn test_interpreter_loader_reports_missing_candidates() {
        let loader = InterpreterLoader::new(vec!["/nonexistent/python-codeexec".to_string()]);
        assert!(matches!(
            loader.load().await,
            Err(LoadError::NotFound { .. })
        ));
    }
}
