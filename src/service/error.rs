// Copyright 2026 framewire contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::io;

pub type EngineResult<T> = Result<T, EngineError>;

/// Status taxonomy for every engine operation. Statuses travel as `Result`
/// values to callers and completion tickets; they never cross a task
/// boundary as a panic.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// address resolution or connect failure
    #[error("connect failed: {0}")]
    ConnectionError(String),

    #[error("not connected")]
    NotConnected,

    #[error("operation timed out")]
    TimedOut,

    /// low-level I/O failure
    #[error("socket error: {0}")]
    SocketError(String),

    /// peer closed the connection, or a read saw zero bytes
    #[error("connection closing")]
    ConnectionClosing,

    /// length prefix inconsistent with the bytes actually available
    #[error("malformed frame: {0}")]
    ProtocolFraming(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("channel send error: {0}")]
    ChannelSendError(String),

    #[error("config file error: {0}")]
    ConfigError(#[from] config::ConfigError),

    /// marker error used by the incremental frame parser
    #[error("incomplete frame")]
    Incomplete,
}

impl EngineError {
    /// Errors that invalidate the socket handle and trigger the local
    /// disconnect sequence. `TimedOut` is retryable and never tears the
    /// session down.
    pub fn closes_session(&self) -> bool {
        matches!(
            self,
            EngineError::SocketError(_)
                | EngineError::ConnectionClosing
                | EngineError::ProtocolFraming(_)
        )
    }
}

impl From<io::Error> for EngineError {
    fn from(e: io::Error) -> Self {
        EngineError::SocketError(e.to_string())
    }
}
