//! Daemon runtime: release polling, reconcile processing, and the unix
//! socket serving both admin commands and proxy session bridges.

mod error;
pub mod log_rotation;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{
    request_cancel, request_reconcile, request_reload, request_rollback, request_status,
    request_stop, send_request, DaemonRequest, DaemonResponse,
};
pub use runtime::{run, start_blocking, ReconcileReport, ReconcileTimestamps};
