// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Strand: queue-based concurrency primitives.
//!
//! Work is submitted to named [`Queue`]s (main, global-by-priority, or
//! custom serial/concurrent) served by a process-wide thread runtime.
//! On top of that:
//! - [`WorkItem`]: cancellable, waitable unit of work with dependents
//! - [`Dispatch`]: chainable links that run B after A, optionally later or
//!   on another queue
//! - [`CompletionGroup`]: enter/leave join point with notify and wait
//! - [`CountingSemaphore`]: signal/wait with timeouts
//! - [`SerialTaskChain`]: FIFO closure chain, at most one running
//!
//! Every bounded wait returns a [`WaitResult`]; timing out never affects
//! the work being waited on.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod group;
pub mod queue;
pub mod runtime;
pub mod semaphore;
pub mod serial;
mod sync;
pub mod time;
pub mod work_item;

pub use config::{QueueConfig, RuntimeConfig};
pub use dispatch::Dispatch;
pub use error::ConfigError;
pub use group::CompletionGroup;
pub use queue::{Discipline, Priority, Queue};
pub use runtime::{configure, current_priority};
pub use semaphore::CountingSemaphore;
pub use serial::SerialTaskChain;
pub use time::{Delay, TimedOut, WaitResult};
pub use work_item::{ItemState, WorkItem};
