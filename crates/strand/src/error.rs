// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runtime configuration errors.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment variable held something that doesn't parse.
    #[error("invalid value `{value}` for {var}: expected {expected}")]
    InvalidValue {
        var: &'static str,
        value: String,
        expected: &'static str,
    },

    /// `configure` was called after the runtime had already started.
    #[error("runtime already initialized; configure it before the first submission")]
    AlreadyInitialized,
}
