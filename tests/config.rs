//! Configuration loading and sentinel handling.

use std::io::Write;
use std::time::Duration;

use framewire::{wait_time, EngineConfig, Priority, INFINITE};
use rstest::rstest;

#[test]
fn defaults_match_the_documented_values() {
    let config = EngineConfig::default();
    assert_eq!(config.network.host, "localhost");
    assert_eq!(config.network.port, 8808);
    assert_eq!(config.network.max_connections, 0);
    assert_eq!(config.network.max_packet_size, 4 * 1024 * 1024);
    assert!(config.network.async_receive);
    assert_eq!(config.pool.default_priority, Priority::Normal);
    assert_eq!(config.pool.wait_time_ms, 3000);
}

#[rstest]
#[case(INFINITE, None)]
#[case(1, Some(Duration::from_millis(1)))]
#[case(250, Some(Duration::from_millis(250)))]
fn zero_wait_time_means_wait_forever(#[case] ms: u64, #[case] expected: Option<Duration>) {
    assert_eq!(wait_time(ms), expected);
}

#[test]
fn engine_wait_time_uses_the_pool_sentinel() {
    let mut config = EngineConfig::default();
    config.pool.wait_time_ms = 0;
    assert_eq!(config.wait_time(), None);
    config.pool.wait_time_ms = 40;
    assert_eq!(config.wait_time(), Some(Duration::from_millis(40)));
}

#[test]
fn partial_file_overrides_merge_with_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(
        file,
        r#"
[network]
host = "0.0.0.0"
port = 9000
max_connections = 32

[pool]
default_priority = "high"
"#
    )
    .unwrap();

    let config = EngineConfig::from_file(&path).unwrap();
    assert_eq!(config.network.host, "0.0.0.0");
    assert_eq!(config.network.port, 9000);
    assert_eq!(config.network.max_connections, 32);
    // untouched fields keep their defaults
    assert_eq!(config.network.max_packet_size, 4 * 1024 * 1024);
    assert_eq!(config.pool.default_priority, Priority::High);
    assert_eq!(config.pool.wait_time_ms, 3000);
}

#[test]
fn missing_file_is_an_error() {
    assert!(EngineConfig::from_file("/does/not/exist/engine.toml").is_err());
}
