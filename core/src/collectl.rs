// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Collectl child supervision.
//!
//! Both sides run collectl alongside benchmark work: a worker logs beside the
//! job artifacts, the coordinator logs for the whole session. The child's
//! stdout and stderr go straight to the log file; stopping kills and reaps it.

use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// A running collectl child bound to one log file.
#[derive(Debug)]
pub struct Collectl {
    child: Child,
}

impl Collectl {
    /// Spawn `program` with timestamped terminal output redirected into
    /// `log_path`.
    pub fn spawn(program: &str, log_path: &Path) -> std::io::Result<Self> {
        let log = std::fs::File::create(log_path)?;
        let child = Command::new(program)
            .arg("-oT")
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log))
            .spawn()?;
        debug!(program, log = %log_path.display(), "collectl started");
        Ok(Self { child })
    }

    /// Kill the child and reap it.
    pub async fn stop(mut self) {
        if let Err(err) = self.child.start_kill() {
            warn!(error = %err, "failed to kill collectl");
            return;
        }
        if let Err(err) = self.child.wait().await {
            warn!(error = %err, "failed to reap collectl");
        }
    }
}
