pub use config::{wait_time, EngineConfig, NetworkConfig, PoolConfig, INFINITE};
pub use error::{EngineError, EngineResult};
pub use shutdown::Shutdown;
pub use tracing_config::{setup_file_tracing, setup_local_tracing};

mod config;
mod error;
mod shutdown;
mod tracing_config;
