//! Subprocess-based sandbox adapter: spawns the configured interpreter as a
//! direct child process per execution, enforces a wall-clock timeout, and
//! tracks an active-session set bounded by `max_concurrent`.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use super::wrap::{self, WrapOptions};
use crate::error::CoreError;

/// Scans `<root>/python_modules/lib/` for `python3.*` directories and
/// returns the `site-packages` subdirectory of each that exists. Exposed
/// so callers building a sandbox's module search path (the adapter itself,
/// or `main`'s `extra_module_paths` wiring) share one discovery rule
/// instead of reimplementing the glob.
#[must_use]
pub fn discover_site_packages(root: &std::path::Path) -> Vec<String> {
    let lib_dir = root.join("python_modules").join("lib");
    let Ok(entries) = std::fs::read_dir(&lib_dir) else {
        return Vec::new();
    };

    entries
        .filter_map(Result::ok)
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with("python3."))
        })
        .map(|entry| entry.path().join("site-packages"))
        .filter(|p| p.is_dir())
        .map(|p| p.display().to_string())
        .collect()
}

/// Static metadata describing a sandbox adapter, surfaced for diagnostics
/// (health dashboards, startup logs) without exposing the concrete variant.
#[derive(Debug, Clone)]
pub struct SandboxInfo {
    pub backend: &'static str,
    pub max_concurrent: usize,
    pub active: usize,
}

/// Outcome of one sandbox execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecResult {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// What a caller submits for execution.
#[derive(Debug, Clone)]
pub struct SandboxJob {
    pub session_id: String,
    pub source: String,
    pub timeout: Duration,
    pub extra_module_paths: Vec<String>,
    /// Correlation id threaded into the subprocess environment so logs from
    /// the interpreter and from this process can be joined.
    pub trace_id: String,
}

/// The capability an [`crate::agent::Agent`] drives to execute generated
/// programs. A `dyn` object so tests can swap in a stub without touching
/// real processes.
#[async_trait]
pub trait SandboxAdapter: Send + Sync {
    async fn execute(&self, job: SandboxJob) -> Result<ExecResult, CoreError>;
    async fn cleanup(&self, session_id: &str);
    async fn health_check(&self) -> bool;
    fn info(&self) -> SandboxInfo;
}

/// Spawns the configured interpreter as a direct subprocess per execution,
/// with wall-clock timeout enforcement and a capacity-bounded active set.
pub struct ProcessSandboxAdapter {
    interpreter_path: String,
    workspace: PathBuf,
    skill_root: PathBuf,
    max_concurrent: usize,
    active: Mutex<HashSet<String>>,
}

impl ProcessSandboxAdapter {
    /// `skill_root` is the directory the skill registry was discovered
    /// from; it's surfaced to the subprocess both as an env var and as a
    /// `PYTHONPATH` entry so generated code can import skill implementation
    /// modules living alongside each skill's manifest.
    #[must_use]
    pub fn new(
        interpreter_path: impl Into<String>,
        workspace: impl Into<PathBuf>,
        skill_root: impl Into<PathBuf>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            interpreter_path: interpreter_path.into(),
            workspace: workspace.into(),
            skill_root: skill_root.into(),
            max_concurrent,
            active: Mutex::new(HashSet::new()),
        }
    }

    fn script_path(&self, session_id: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(session_id.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        self.workspace.join(format!("{}.py", &digest[..16]))
    }

    fn debug_path(&self, session_id: &str) -> PathBuf {
        self.script_path(session_id).with_extension("py.failed")
    }

    /// The colon-separated `PYTHONPATH` for a job: the skill-implementation
    /// root, its sibling `src/`, any `python_modules/lib/python3.*/site-packages`
    /// found under it, and the job's caller-supplied extra paths, in that
    /// order.
    fn module_search_path(&self, job_extra: &[String]) -> String {
        let mut paths = vec![
            self.skill_root.display().to_string(),
            self.skill_root.join("src").display().to_string(),
        ];
        paths.extend(discover_site_packages(&self.skill_root));
        paths.extend(job_extra.iter().cloned());
        paths.join(":")
    }

    async fn run_with_timeout(
        &self,
        script_path: &PathBuf,
        timeout: Duration,
        trace_id: &str,
        module_search_path: &str,
    ) -> Result<ExecResult, CoreError> {
        let token = CancellationToken::new();
        let mut child = Command::new(&self.interpreter_path)
            .arg(script_path)
            .env("SANDBOX_WORKSPACE", &self.workspace)
            .env("TRACE_ID", trace_id)
            .env("SKILL_ROOT", &self.skill_root)
            .env("PYTHONPATH", module_search_path)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            // On timeout the `run` future below is dropped mid-await,
            // taking this `Child` with it; without this the interpreter
            // would be orphaned instead of terminated.
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CoreError::Execution(format!("failed to spawn interpreter: {e}")))?;

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();

        let run = async {
            let mut stdout = String::new();
            let mut stderr = String::new();
            if let Some(mut pipe) = stdout_pipe.take() {
                let _ = pipe.read_to_string(&mut stdout).await;
            }
            if let Some(mut pipe) = stderr_pipe.take() {
                let _ = pipe.read_to_string(&mut stderr).await;
            }
            let status = child.wait().await;
            (status, stdout, stderr)
        };

        tokio::select! {
            result = tokio::time::timeout(timeout, run) => {
                match result {
                    Ok((Ok(status), stdout, stderr)) => Ok(ExecResult {
                        stdout,
                        stderr,
                        exit_code: status.code().unwrap_or(-1),
                    }),
                    Ok((Err(e), _, _)) => Err(CoreError::Execution(format!("interpreter wait failed: {e}"))),
                    Err(_) => {
                        Err(CoreError::Timeout { elapsed_ms: timeout.as_millis() as u64 })
                    }
                }
            }
            () = token.cancelled() => {
                Err(CoreError::Execution("execution cancelled".to_string()))
            }
        }
    }
}

#[async_trait]
impl SandboxAdapter for ProcessSandboxAdapter {
    #[instrument(skip(self, job), fields(session_id = %job.session_id))]
    async fn execute(&self, job: SandboxJob) -> Result<ExecResult, CoreError> {
        {
            let mut active = self.active.lock().expect("active set lock poisoned");
            if active.len() >= self.max_concurrent && !active.contains(&job.session_id) {
                return Err(CoreError::ResourceExhausted(
                    "sandbox adapter is at capacity".to_string(),
                ));
            }
            active.insert(job.session_id.clone());
        }

        let wrapped = wrap::wrap(
            &job.source,
            &WrapOptions {
                extra_module_paths: job.extra_module_paths.clone(),
            },
        );

        let result = async {
            let wrapped = wrapped?;
            tokio::fs::create_dir_all(&self.workspace).await.ok();
            let script_path = self.script_path(&job.session_id);
            let mut file = tokio::fs::File::create(&script_path).await?;
            file.write_all(wrapped.as_bytes()).await?;

            let module_search_path = self.module_search_path(&job.extra_module_paths);
            let outcome = self
                .run_with_timeout(&script_path, job.timeout, &job.trace_id, &module_search_path)
                .await;

            match &outcome {
                Ok(res) if !res.success() => {
                    if let Ok(contents) = tokio::fs::read_to_string(&script_path).await {
                        let _ = tokio::fs::write(self.debug_path(&job.session_id), contents).await;
                    }
                }
                Err(_) => {
                    if let Ok(contents) = tokio::fs::read_to_string(&script_path).await {
                        let _ = tokio::fs::write(self.debug_path(&job.session_id), contents).await;
                    }
                }
                _ => {}
            }
            let _ = tokio::fs::remove_file(&script_path).await;

            outcome
        }
        .await;

        self.active
            .lock()
            .expect("active set lock poisoned")
            .remove(&job.session_id);

        result
    }

    async fn cleanup(&self, session_id: &str) {
        self.active
            .lock()
            .expect("active set lock poisoned")
            .remove(session_id);
        let _ = tokio::fs::remove_file(self.script_path(session_id)).await;
    }

    async fn health_check(&self) -> bool {
        tokio::time::timeout(
            Duration::from_secs(5),
            Command::new(&self.interpreter_path).arg("--version").status(),
        )
        .await
        .ok()
        .and_then(|r| r.ok())
        .map(|status| status.success())
        .unwrap_or(false)
    }

    fn info(&self) -> SandboxInfo {
        SandboxInfo {
            backend: "subprocess",
            max_concurrent: self.max_concurrent,
            active: self.active.lock().expect("active set lock poisoned").len(),
        }
    }
}

impl Drop for ProcessSandboxAdapter {
    fn drop(&mut self) {
        if let Ok(active) = self.active.lock() {
            if !active.is_empty() {
                warn!(count = active.len(), "sandbox adapter dropped with active sessions");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_execution_over_capacity() {
        let adapter = ProcessSandboxAdapter::new("python3", std::env::temp_dir(), std::env::temp_dir(), 0);
        let job = SandboxJob {
            session_id: "s1".to_string(),
            source: "print('hi')".to_string(),
            timeout: Duration::from_secs(1),
            extra_module_paths: vec![],
            trace_id: "trace-1".to_string(),
        };
        let err = adapter.execute(job).await.unwrap_err();
        assert_eq!(err.kind(), "resource_exhausted");
    }

    #[tokio::test]
    async fn cleanup_removes_from_active_set() {
        let adapter = ProcessSandboxAdapter::new("python3", std::env::temp_dir(), std::env::temp_dir(), 5);
        adapter
            .active
            .lock()
            .unwrap()
            .insert("s1".to_string());
        adapter.cleanup("s1").await;
        assert!(!adapter.active.lock().unwrap().contains("s1"));
    }

    #[test]
    fn module_search_path_includes_skill_root_and_sibling_src() {
        let tmp = tempfile::tempdir().unwrap();
        let adapter = ProcessSandboxAdapter::new("python3", std::env::temp_dir(), tmp.path(), 5);
        let path = adapter.module_search_path(&["/extra/path".to_string()]);
        assert!(path.contains(&tmp.path().display().to_string()));
        assert!(path.contains(&tmp.path().join("src").display().to_string()));
        assert!(path.ends_with("/extra/path"));
    }

    #[test]
    fn discovers_site_packages_under_python_modules() {
        let tmp = tempfile::tempdir().unwrap();
        let site_packages = tmp
            .path()
            .join("python_modules")
            .join("lib")
            .join("python3.11")
            .join("site-packages");
        std::fs::create_dir_all(&site_packages).unwrap();

        let found = discover_site_packages(tmp.path());
        assert_eq!(found, vec![site_packages.display().to_string()]);
    }
}
