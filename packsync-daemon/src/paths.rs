use std::path::{Path, PathBuf};

use packsync_core::config::packsync_root;

pub const DAEMON_LABEL: &str = "dev.packsync.daemon";

pub const DAEMON_STDOUT_LOG: &str = "packsync.log";
pub const DAEMON_STDERR_LOG: &str = "packsync-err.log";
pub const DAEMON_SOCKET: &str = "packsync.sock";

pub fn run_dir(home: &Path) -> PathBuf {
    packsync_root(home).join("run")
}

pub fn socket_path(home: &Path) -> PathBuf {
    run_dir(home).join(DAEMON_SOCKET)
}

pub fn logs_dir(home: &Path) -> PathBuf {
    packsync_root(home).join("logs")
}

pub fn stdout_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(DAEMON_STDOUT_LOG)
}

pub fn stderr_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(DAEMON_STDERR_LOG)
}
