//! Worker Pool Primitives
//!
//! Thread pools with priority lanes, callback environments, waitable events
//! and timers. The rtwq scheduler configures and drives these; nothing in
//! this crate knows about work queues or async results.
//!
//! - **Pools**: `ThreadPool` owns worker threads and three priority lanes
//! - **Environments**: `CallbackEnv` binds a pool, a priority and a cleanup group
//! - **Registrations**: wait and timer callbacks with cancel-and-quiesce
//! - **Events**: `Event` is the waitable object a wait registration watches
//! - **Runtime**: `RuntimeEnvironment` is the shared usage token

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod env;
mod error;
mod event;
mod pool;
mod registration;
mod runtime;
mod timer;

pub use env::{CallbackEnv, CleanupGroup, Finalization};
pub use error::PoolError;
pub use event::Event;
pub use pool::{CallbackPriority, ThreadPool};
pub use registration::{Registration, RegistrationKind};
pub use runtime::{RuntimeEnvironment, UsageCookie};
