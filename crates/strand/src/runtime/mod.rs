// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Process-wide execution runtime.
//!
//! Started lazily on first use, or explicitly through [`configure`].
//! Owns:
//! - one worker pool per [`Priority`] (backing global and custom queues)
//! - a single-thread pool backing [`Queue::main`]
//! - the timer thread behind `submit_after`
//!
//! The runtime lives for the rest of the process.

mod pool;
mod timer;

use std::cell::Cell;
use std::sync::OnceLock;

use log::{debug, warn};

use crate::config::RuntimeConfig;
use crate::error::ConfigError;
use crate::queue::{Priority, Queue};

pub(crate) use pool::{block_in_place, Pool};
pub(crate) use timer::Timer;

/// Type-erased unit of work handed to pools and the timer.
pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct Runtime {
    pools: [Pool; 4],
    main_pool: Pool,
    timer: Timer,
    main: Queue,
    globals: [Queue; 4],
}

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

impl Runtime {
    fn start(config: RuntimeConfig) -> Self {
        let workers = config.worker_count();
        let prefix = &config.thread_name_prefix;
        debug!(
            "starting runtime: {} workers per priority, stack size {:?}",
            workers, config.stack_size
        );

        let pools = Priority::ALL.map(|priority| {
            Pool::new(
                &format!("{}-{}", prefix, priority.name()),
                priority,
                workers,
                &config,
            )
        });
        let main_pool = Pool::fixed(
            &format!("{}-main", prefix),
            Priority::UserInteractive,
            1,
            &config,
        );
        let timer = Timer::new(&format!("{}-timer", prefix), &config);

        Self {
            pools,
            main_pool,
            timer,
            main: Queue::new_main(),
            globals: Priority::ALL.map(Queue::new_global),
        }
    }

    pub fn pool(&self, priority: Priority) -> &Pool {
        &self.pools[priority.index()]
    }

    pub fn main_pool(&self) -> &Pool {
        &self.main_pool
    }

    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    pub fn main_queue(&self) -> &Queue {
        &self.main
    }

    pub fn global_queue(&self, priority: Priority) -> &Queue {
        &self.globals[priority.index()]
    }
}

/// The running runtime, started from the environment if nobody called
/// [`configure`] first.
pub(crate) fn get() -> &'static Runtime {
    RUNTIME.get_or_init(|| {
        let config = RuntimeConfig::from_env().unwrap_or_else(|err| {
            warn!("{}; using default runtime configuration", err);
            RuntimeConfig::default()
        });
        Runtime::start(config)
    })
}

/// Start the runtime with `config`.
///
/// Must run before anything is submitted to a queue. Once the runtime is
/// up its configuration is fixed and this returns
/// [`ConfigError::AlreadyInitialized`].
///
/// # Panics
///
/// Panics if the OS refuses to start the runtime's threads. Without an
/// explicit call the same happens on the first queue access instead.
pub fn configure(config: RuntimeConfig) -> Result<(), ConfigError> {
    let mut installed = false;
    RUNTIME.get_or_init(|| {
        installed = true;
        Runtime::start(config)
    });
    if installed {
        Ok(())
    } else {
        Err(ConfigError::AlreadyInitialized)
    }
}

thread_local! {
    static CURRENT_PRIORITY: Cell<Option<Priority>> = const { Cell::new(None) };
}

pub(crate) fn set_current_priority(priority: Priority) {
    CURRENT_PRIORITY.with(|cell| cell.set(Some(priority)));
}

/// Priority of the calling thread: the class of the pool it serves, or
/// [`Priority::default`] outside the runtime.
pub fn current_priority() -> Priority {
    CURRENT_PRIORITY.with(|cell| cell.get()).unwrap_or_default()
}
