// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! One benchmark child: working-directory staging, launch, wait, cleanup.
//!
//! Each instance owns a working directory of the form
//! `<work_root>/<kind>_instance/<task_id>/<instance_id>/` holding the staged
//! benchmark binary, the input deck and any extra launcher files. Stdout and
//! stderr of the child are appended to a single `.result` file under the
//! task's result directory. The working directory is removed whether the
//! child succeeds or not.

use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::supervisor::JobError;

/// Name the benchmark binary is staged under inside the working directory.
const STAGED_BINARY: &str = "xhpl";

/// Everything needed to run one benchmark child.
#[derive(Debug, Clone)]
pub struct InstanceSpec {
    /// Unique per instance; also names the working directory.
    pub instance_id: String,
    /// Working directory, created fresh for this instance.
    pub working_dir: PathBuf,
    /// Where the child's stdout and stderr land.
    pub result_file: PathBuf,
    /// `-np` value handed to the launcher.
    pub process_count: u32,
    /// Rendered input deck, written as `HPL.dat`.
    pub deck: String,
    /// Extra files staged into the working directory (name, content).
    pub extra_files: Vec<(String, String)>,
    /// Launcher arguments inserted between `-np N` and the binary.
    pub launcher_args: Vec<String>,
    /// MPI launcher program.
    pub mpirun_program: String,
    /// Benchmark binary copied into the working directory.
    pub hpl_binary: PathBuf,
}

/// A runnable benchmark instance.
#[derive(Debug)]
pub struct HplInstance {
    spec: InstanceSpec,
}

impl HplInstance {
    /// Wrap a spec.
    pub fn new(spec: InstanceSpec) -> Self {
        Self { spec }
    }

    /// Stage the working directory, run the child to completion, clean up.
    ///
    /// Returns `true` when the child exited zero.
    pub async fn run(&self) -> Result<bool, JobError> {
        self.prepare().await?;
        let outcome = self.launch().await;
        self.cleanup().await;
        outcome
    }

    async fn prepare(&self) -> Result<(), JobError> {
        let wd = &self.spec.working_dir;
        if tokio::fs::try_exists(wd).await.unwrap_or(false) {
            warn!(instance = %self.spec.instance_id, "working directory exists, clearing");
            let _ = tokio::fs::remove_dir_all(wd).await;
        }
        tokio::fs::create_dir_all(wd).await?;

        tokio::fs::copy(&self.spec.hpl_binary, wd.join(STAGED_BINARY)).await?;
        tokio::fs::write(wd.join(super::hpl::DECK_FILE), &self.spec.deck).await?;
        for (name, content) in &self.spec.extra_files {
            tokio::fs::write(wd.join(name), content).await?;
        }
        debug!(instance = %self.spec.instance_id, dir = %wd.display(), "working directory staged");
        Ok(())
    }

    async fn launch(&self) -> Result<bool, JobError> {
        let result_file = std::fs::File::create(&self.spec.result_file)?;

        let mut command = Command::new(&self.spec.mpirun_program);
        command
            .arg("--allow-run-as-root")
            .arg("-np")
            .arg(self.spec.process_count.to_string())
            .args(&self.spec.launcher_args)
            .arg(format!("./{STAGED_BINARY}"))
            .current_dir(&self.spec.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(result_file.try_clone()?))
            .stderr(Stdio::from(result_file));

        info!(
            instance = %self.spec.instance_id,
            np = self.spec.process_count,
            "launching benchmark instance"
        );

        let mut child = command.spawn().map_err(|err| JobError::Spawn {
            instance_id: self.spec.instance_id.clone(),
            source: err,
        })?;
        let status = child.wait().await?;

        if status.success() {
            info!(instance = %self.spec.instance_id, "instance completed");
        } else {
            warn!(instance = %self.spec.instance_id, %status, "instance failed");
        }
        Ok(status.success())
    }

    async fn cleanup(&self) {
        if let Err(err) = tokio::fs::remove_dir_all(&self.spec.working_dir).await {
            debug!(
                instance = %self.spec.instance_id,
                error = %err,
                "working directory cleanup failed"
            );
        }
    }
}
