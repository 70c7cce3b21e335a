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

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dispatch::Priority;

use super::{EngineError, EngineResult};

/// Sentinel for "no limit" / "wait forever" in configuration values.
pub const INFINITE: u64 = 0;

/// Converts a configured wait time in milliseconds into an optional
/// `Duration`; `0` is the infinite sentinel.
pub fn wait_time(ms: u64) -> Option<Duration> {
    if ms == INFINITE {
        None
    } else {
        Some(Duration::from_millis(ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
    /// maximum simultaneous connections/peers, 0 = unlimited; connections
    /// beyond the limit are closed immediately
    pub max_connections: usize,
    /// upper bound for one framed payload in bytes
    pub max_packet_size: usize,
    /// when set, async clients pump received packets straight to the
    /// callback object
    pub async_receive: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            host: "localhost".to_string(),
            port: 8808,
            max_connections: 0,
            max_packet_size: 4 * 1024 * 1024,
            async_receive: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// maximum pooled workers, 0 = unbounded
    pub max_workers: usize,
    /// wait for task termination in milliseconds, 0 = wait forever
    pub wait_time_ms: u64,
    /// priority assigned to work the servers queue on behalf of sessions
    pub default_priority: Priority,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_workers: num_cpus::get(),
            wait_time_ms: 3000,
            default_priority: Priority::Normal,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub network: NetworkConfig,
    pub pool: PoolConfig,
}

impl EngineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> EngineResult<EngineConfig> {
        let path_str = path.as_ref().to_str().ok_or_else(|| {
            EngineError::IllegalState(format!(
                "config file path: {}",
                path.as_ref().to_string_lossy()
            ))
        })?;
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .build()?;
        let engine_config: EngineConfig = settings.try_deserialize()?;
        Ok(engine_config)
    }

    /// Termination wait budget as a `Duration`, `None` meaning infinite.
    pub fn wait_time(&self) -> Option<Duration> {
        wait_time(self.pool.wait_time_ms)
    }
}
