//! # packsync-engine
//!
//! The resource pack synchronization engine: integrity store, version
//! reconciler, capability resolver, delivery dispatcher, and the webhook
//! notification emitter.
//!
//! Call [`reconcile::Reconciler::run_scope`] to drive one reconciliation
//! cycle for a scope, then [`dispatch::dispatch_all`] to fan the activated
//! record out to eligible sessions.

pub mod active;
pub mod dispatch;
pub mod error;
pub mod notify;
pub mod reconcile;
pub mod resolver;
pub mod sessions;
pub mod store;

pub use active::ActivePacks;
pub use dispatch::{ApplyInstruction, DeliveryPolicy};
pub use error::{EngineError, StoreError};
pub use reconcile::{ReconcileOutcome, ReconcilePhase, Reconciler};
pub use sessions::{AckSignal, SessionCommand, SessionRegistry};
