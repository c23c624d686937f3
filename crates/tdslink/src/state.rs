//! Server-driven session state mirrored from ENVCHANGE tokens.

use tdslink_protocol::{EnvChange, EnvChangeType, TdsVersion};

use crate::error::Result;

/// Transaction context used outside an explicit transaction.
///
/// From TDS 7.2 on every batch carries ALL_HEADERS with descriptor 0;
/// older versions omit the preamble entirely.
#[must_use]
pub fn autocommit_context(version: TdsVersion) -> Option<u64> {
    version.requires_all_headers().then_some(0)
}

/// What the client tracks about the server's view of the session.
///
/// Only the packet size and the transaction descriptor change client
/// behavior; the rest is recorded for diagnostics.
#[derive(Debug, Clone)]
pub(crate) struct SessionState {
    pub(crate) packet_size: u32,
    pub(crate) database: Option<String>,
    pub(crate) language: Option<String>,
    pub(crate) transaction_descriptor: Option<u64>,
    autocommit: Option<u64>,
}

impl SessionState {
    pub(crate) fn new(packet_size: u32, tds_version: TdsVersion) -> Self {
        let autocommit = autocommit_context(tds_version);
        Self {
            packet_size,
            database: None,
            language: None,
            transaction_descriptor: autocommit,
            autocommit,
        }
    }

    /// Switch to the version the server acknowledged.
    pub(crate) fn set_tds_version(&mut self, version: TdsVersion) {
        let autocommit = autocommit_context(version);
        if !self.in_transaction() {
            self.transaction_descriptor = autocommit;
        }
        self.autocommit = autocommit;
    }

    pub(crate) fn in_transaction(&self) -> bool {
        self.transaction_descriptor.is_some_and(|d| d != 0)
    }

    /// Apply one ENVCHANGE.
    pub(crate) fn apply(&mut self, env: &EnvChange) -> Result<()> {
        match env.env_type {
            EnvChangeType::PacketSize => {
                if let Some(size) = env.packet_size()? {
                    tracing::debug!(old = self.packet_size, new = size, "packet size changed by server");
                    self.packet_size = size;
                }
            }
            EnvChangeType::Database => {
                let name = env.new_value.as_str().unwrap_or_default().to_string();
                tracing::debug!(database = %name, "database changed");
                self.database = Some(name);
            }
            EnvChangeType::Language => {
                let language = env.new_value.as_str().unwrap_or_default().to_string();
                tracing::debug!(language = %language, "language changed");
                self.language = Some(language);
            }
            EnvChangeType::BeginTransaction => {
                if let Some(descriptor) = env.begin_transaction_descriptor()? {
                    tracing::debug!(descriptor, "transaction started");
                    self.transaction_descriptor = Some(descriptor);
                }
            }
            EnvChangeType::CommitTransaction
            | EnvChangeType::RollbackTransaction
            | EnvChangeType::TransactionEnded => {
                tracing::debug!(change = ?env.env_type, "transaction ended");
                self.transaction_descriptor = self.autocommit;
            }
            other => {
                tracing::debug!(change = ?other, "ignoring environment change");
            }
        }
        Ok(())
    }
}
