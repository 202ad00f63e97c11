//! Rtwq Work Queue Scheduler
//!
//! Asynchronous work-item scheduling on top of `rtwq-pool`:
//! - **Platform**: startup/shutdown reference counting and the platform lock (`Platform`)
//! - **Results**: pooled async results carrying callback, object, state and status (`AsyncResult`)
//! - **Queues**: system queues, user pool queues and serial queues addressed by `QueueId`
//! - **Work items**: immediate, scheduled, waiting and periodic items, with cancellation by key
//!
//! # Example
//!
//! ```rust,ignore
//! use rtwq::{FnCallback, Platform, PlatformConfig, QueueId};
//!
//! let platform = Platform::new(PlatformConfig::default());
//! platform.startup()?;
//!
//! let callback = FnCallback::new(|result| println!("done: {:?}", result.status())).into_callback();
//! let result = platform.create_result(None, Some(callback), None)?;
//! platform.put_work_item(QueueId::STANDARD, 0, &result)?;
//!
//! platform.shutdown()?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// ============================================================================
// Core Modules
// ============================================================================

mod cache;
mod callback;
mod config;
mod error;
mod global;
mod handles;
mod ids;
mod item;
mod lifecycle;
mod periodic;
mod platform;
mod queue;
mod result;

// ============================================================================
// Re-exports
// ============================================================================

pub use callback::{AsyncCallback, CallbackFlags, CallbackParameters, FnCallback};
pub use config::PlatformConfig;
pub use error::{RtwqError, RtwqResult};
pub use global::*;
pub use ids::{PeriodicKey, QueueId, QueueType, WorkItemKey, PRIVATE_MASK};
pub use periodic::PeriodicFn;
pub use platform::Platform;
pub use result::{AsyncObject, AsyncResult};
pub use rtwq_pool::Event;
