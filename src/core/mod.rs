//! Runtime core: lifecycle and shutdown.
//!
//! The public API of this module is [`Controller`], which starts the tracker
//! and the adapter chains and drives graceful shutdown.
//!
//! Internal modules:
//! - `controller`: wiring, start/stop and the grace-bounded wait;
//! - `isolate`: panic-isolated spawning of adapter tasks;
//! - `shutdown`: termination signal handling.

mod controller;
mod isolate;
mod shutdown;

pub use controller::Controller;
pub(crate) use isolate::spawn_isolated;
