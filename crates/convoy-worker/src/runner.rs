//! Step execution.

use async_trait::async_trait;
use tokio::process::Command;

use convoy_core::job::Step;
use convoy_core::{Error, Result};

/// What running one step produced.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub success: bool,
    pub output: String,
}

/// Executes one step of a job. The session drives the protocol; runners
/// only run things.
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn run(&self, step: &Step) -> Result<StepOutcome>;
}

/// Runs step scripts through `sh -c` with captured output.
#[derive(Debug, Default)]
pub struct ShellRunner;

#[async_trait]
impl StepRunner for ShellRunner {
    async fn run(&self, step: &Step) -> Result<StepOutcome> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(&step.script)
            .output()
            .await
            .map_err(|e| Error::Internal(format!("exec step {}: {e}", step.name)))?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(StepOutcome {
            success: output.status.success(),
            output: text,
        })
    }
}
