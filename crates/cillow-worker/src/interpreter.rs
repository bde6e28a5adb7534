// SPDX-License-Identifier: MIT OR Apache-2.0
//! The worker-side interpreter: one environment, one request at a time.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use cillow_protocol::{Environment, ResponseFrame, Stream, StreamKind};
use once_cell::sync::Lazy;
use tracing::info;

use crate::evaluate::{CodeEvaluator, EvalOutcome, SubprocessEvaluator};
use crate::handle::FrameSink;
use crate::pipe::WorkerRequest;
use crate::resolve::{ImportResolver, ScanResolver};
use crate::shell::{stream_command, which};
use crate::WorkerError;

/// Environment variable that disables import-driven auto-install.
pub const DISABLE_AUTO_INSTALL_VAR: &str = "CILLOW_DISABLE_AUTO_INSTALL";

/// Installer prefix: `uv pip install` when `uv` is available, else
/// `pip install`.
static PIP_INSTALL_CMD: Lazy<Vec<String>> = Lazy::new(|| {
    if which("uv").is_some() {
        vec!["uv".into(), "pip".into(), "install".into()]
    } else {
        vec!["pip".into(), "install".into()]
    }
});

/// Hosts one language environment and executes one request at a time,
/// emitting response frames through the caller's sink.
///
/// Environment variables set by clients accumulate in an overlay that is
/// applied to every process the interpreter spawns; they are scoped to
/// this worker, never to the broker.
pub struct Interpreter {
    environment: Environment,
    overlay: BTreeMap<String, String>,
    evaluator: Box<dyn CodeEvaluator>,
    resolver: Box<dyn ImportResolver>,
}

impl Interpreter {
    /// Create an interpreter with the bundled strategies.
    #[must_use]
    pub fn new(environment: Environment) -> Self {
        Self::with_strategies(
            environment,
            Box::new(SubprocessEvaluator::new()),
            Box::new(ScanResolver),
        )
    }

    /// Create an interpreter with injected evaluation strategies.
    #[must_use]
    pub fn with_strategies(
        environment: Environment,
        evaluator: Box<dyn CodeEvaluator>,
        resolver: Box<dyn ImportResolver>,
    ) -> Self {
        Self {
            environment,
            overlay: BTreeMap::new(),
            evaluator,
            resolver,
        }
    }

    /// The environment this interpreter hosts.
    #[must_use]
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Execute one request, emitting its frames. The completion sentinel is
    /// the event loop's responsibility, not ours.
    pub async fn handle(
        &mut self,
        request: WorkerRequest,
        sink: FrameSink<'_>,
    ) -> Result<(), WorkerError> {
        match request {
            WorkerRequest::Code { code } => self.run_code(&code, sink).await,
            WorkerRequest::Cmd { cmd } => self.run_command(&cmd, sink).await,
            WorkerRequest::Requirements { requirements } => {
                self.install_requirements(&requirements, sink).await
            }
            WorkerRequest::EnvironmentVariables { variables } => {
                self.overlay.extend(variables);
                Ok(())
            }
        }
    }

    async fn run_code(&mut self, code: &str, sink: FrameSink<'_>) -> Result<(), WorkerError> {
        if !auto_install_disabled() {
            let missing = self.resolver.missing_packages(code, &self.environment);
            if !missing.is_empty() {
                info!(packages = ?missing, "auto-installing missing imports");
                self.install_requirements(&missing, &mut *sink).await?;
            }
        }

        let outcome = self
            .evaluator
            .evaluate(code, &self.environment, &self.overlay, &mut *sink)
            .await?;
        sink(match outcome {
            EvalOutcome::Result(value) => ResponseFrame::Result { value },
            EvalOutcome::Exception(info) => ResponseFrame::ExceptionInfo(info),
        });
        Ok(())
    }

    async fn run_command(&self, cmd: &[String], sink: FrameSink<'_>) -> Result<(), WorkerError> {
        stream_command(cmd, &self.overlay, |line| {
            sink(ResponseFrame::Stream(Stream {
                kind: StreamKind::CmdExec,
                data: line,
            }));
        })
        .await
    }

    async fn install_requirements(
        &self,
        requirements: &[String],
        sink: FrameSink<'_>,
    ) -> Result<(), WorkerError> {
        // Requirements go through a manifest file, never through a shell,
        // so a malicious specifier cannot smuggle arguments.
        let mut manifest = tempfile::NamedTempFile::new().map_err(WorkerError::Pipe)?;
        manifest
            .write_all(requirements.join("\n").as_bytes())
            .map_err(WorkerError::Pipe)?;
        manifest.flush().map_err(WorkerError::Pipe)?;

        let argv = installer_argv(&self.environment, manifest.path());
        self.run_command(&argv, sink).await
    }
}

/// Assemble the installer argv for an environment and manifest path.
fn installer_argv(environment: &Environment, manifest: &Path) -> Vec<String> {
    let mut argv = PIP_INSTALL_CMD.clone();
    if let Some(root) = environment.path() {
        argv.push("--python".to_string());
        argv.push(root.display().to_string());
    }
    argv.push("-r".to_string());
    argv.push(manifest.display().to_string());
    argv
}

/// Whether `CILLOW_DISABLE_AUTO_INSTALL` is set to a truthy value.
#[must_use]
pub fn auto_install_disabled() -> bool {
    std::env::var(DISABLE_AUTO_INSTALL_VAR)
        .map(|v| is_truthy(&v))
        .unwrap_or(false)
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_values_are_case_insensitive() {
        for v in ["1", "true", "TRUE", "Yes", "yes"] {
            assert!(is_truthy(v), "{v} should disable auto-install");
        }
        for v in ["0", "false", "no", "", "on"] {
            assert!(!is_truthy(v), "{v} should not disable auto-install");
        }
    }

    #[test]
    fn installer_argv_includes_python_flag_for_managed_envs() {
        let manifest = Path::new("/tmp/reqs.txt");
        let argv = installer_argv(&Environment::System, manifest);
        assert!(argv.ends_with(&["-r".to_string(), "/tmp/reqs.txt".to_string()]));
        assert!(!argv.iter().any(|a| a == "--python"));

        let env = Environment::Path("/opt/envs/py311".into());
        let argv = installer_argv(&env, manifest);
        let python_at = argv.iter().position(|a| a == "--python").unwrap();
        assert_eq!(argv[python_at + 1], "/opt/envs/py311");
    }
}
