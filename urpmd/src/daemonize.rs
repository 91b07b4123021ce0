//! Detached-mode startup.
//!
//! Runs before the tokio runtime exists; forking after threads spawn is not
//! an option. The double fork detaches from the session, stdio ends up on
//! `/dev/null`, and the PID file is written by the surviving grandchild.

use std::path::Path;

use daemonize::Daemonize;

pub fn daemonize(pid_file: &Path) -> anyhow::Result<()> {
    Daemonize::new()
        .pid_file(pid_file)
        .working_directory("/")
        .start()
        .map_err(|e| anyhow::anyhow!("could not daemonize: {e}"))?;
    Ok(())
}
