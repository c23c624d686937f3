//! Shared helpers for tests against the mock server.

#![allow(dead_code, clippy::unwrap_used)]

use std::time::Duration;

use tdslink::{Config, Credentials, EncryptionMode, Session, TimeoutConfig};
use tdslink_testing::MockTdsServer;

pub const USER: &str = "sa";
pub const PASSWORD: &str = "Str0ng!Passw0rd";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Cleartext configuration pointing at `server`.
pub fn config_for(server: &MockTdsServer) -> Config {
    init_tracing();
    Config::new()
        .host(server.host())
        .port(server.port())
        .credentials(Credentials::sql_server(USER, PASSWORD))
        .encryption(EncryptionMode::Disabled)
        .timeouts(
            TimeoutConfig::new()
                .connect_timeout(Duration::from_secs(5))
                .login_timeout(Duration::from_secs(5))
                .command_timeout(Duration::from_secs(5)),
        )
}

pub async fn connect(server: &MockTdsServer) -> Session {
    Session::connect(config_for(server)).await.unwrap()
}

pub async fn count(session: &mut Session, table: &str) -> i32 {
    let rows = session.query(&format!("SELECT COUNT(*) FROM {table}")).await.unwrap();
    rows[0].get(0).unwrap()
}
