//! SQL Server connections over TDS and transactional execution.
//!
//! Tiberius clients are single connections, not pools. Catalog queries
//! share one cached client; every row stream and every transaction opens
//! its own so session state (`SET IDENTITY_INSERT`) never leaks.

use super::SqlServerProvider;
use crate::Result;
use crate::dialect::SqlServerDialect;
use crate::error::DbTransitError;
use crate::models::DatabaseEngine;
use crate::providers::helpers::{classify_failure, statement_preview, with_timeout};
use crate::providers::{ConnectionConfig, ConnectionSettings, StatementFailure};
use std::time::Duration;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

/// A connected TDS client.
pub(crate) type TdsClient = Client<Compat<TcpStream>>;

/// Classifies a tiberius failure; server errors carry the native error
/// number used for privilege detection.
pub(crate) fn classify_tds_error(context: &str, error: tiberius::error::Error) -> DbTransitError {
    match &error {
        tiberius::error::Error::Server(token) => classify_failure(
            DatabaseEngine::SqlServer,
            context,
            Some(&token.code().to_string()),
            token.message(),
        ),
        tiberius::error::Error::Io { .. }
        | tiberius::error::Error::Tls(_)
        | tiberius::error::Error::Routing { .. } => {
            DbTransitError::connection_failed(context.to_string(), error)
        }
        _ => DbTransitError::catalog_failed(context.to_string(), error),
    }
}

fn flag(value: Option<&str>) -> Option<bool> {
    match value?.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Builds the TDS configuration from a parsed connection URL.
///
/// Recognized parameters: `encrypt` (default on) and `trust_cert` /
/// `TrustServerCertificate` (default off).
pub(crate) fn tds_config(settings: &ConnectionSettings) -> Config {
    let mut config = Config::new();
    config.host(&settings.host);
    config.port(settings.port);
    if let Some(database) = &settings.database {
        config.database(database);
    }
    config.authentication(AuthMethod::sql_server(
        settings.credentials.username(),
        settings.credentials.password(),
    ));
    config.application_name(format!("dbtransit-{}", env!("CARGO_PKG_VERSION")));

    if flag(settings.param("encrypt")) == Some(false) {
        config.encryption(EncryptionLevel::NotSupported);
    } else {
        config.encryption(EncryptionLevel::Required);
    }
    let trust = flag(settings.param("trust_cert"))
        .or_else(|| flag(settings.param("TrustServerCertificate")))
        .unwrap_or(false);
    if trust {
        config.trust_cert();
    }
    config
}

/// Opens one TDS connection under the connect timeout.
pub(crate) async fn open_client(config: Config, timeout: Duration) -> Result<TdsClient> {
    let address = config.get_addr();
    with_timeout(timeout, "SQL Server connect", async move {
        let tcp = TcpStream::connect(config.get_addr()).await.map_err(|e| {
            DbTransitError::connection_failed(format!("Failed to reach SQL Server at {}", address), e)
        })?;
        let _ = tcp.set_nodelay(true);
        Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| classify_tds_error("Failed to open SQL Server session", e))
    })
    .await
}

impl SqlServerProvider {
    /// Creates a SQL Server provider. No connection is opened until the
    /// first operation.
    ///
    /// # Errors
    /// Returns a configuration error if the connection string or the
    /// configuration is invalid.
    pub async fn new(connection_string: &str, config: ConnectionConfig) -> Result<Self> {
        let settings = ConnectionSettings::parse(DatabaseEngine::SqlServer, connection_string)?;
        let config = settings.apply_to(&config);
        config.validate()?;
        let tds = tds_config(&settings);
        tracing::debug!("Configured SQL Server provider for {}", config);

        Ok(Self {
            tds,
            config,
            dialect: SqlServerDialect,
            catalog: Mutex::new(None),
        })
    }

    pub(crate) async fn connect(&self) -> Result<TdsClient> {
        open_client(self.tds.clone(), self.config.connect_timeout).await
    }

    /// Runs one batch and drains its results.
    async fn run_batch(&self, client: &mut TdsClient, sql: &str, context: &str) -> Result<()> {
        with_timeout(self.config.query_timeout, context, async {
            let stream = client
                .simple_query(sql)
                .await
                .map_err(|e| classify_tds_error(context, e))?;
            stream
                .into_results()
                .await
                .map(|_| ())
                .map_err(|e| classify_tds_error(context, e))
        })
        .await
    }

    /// Runs statements inside one transaction on a dedicated connection;
    /// see [`crate::providers::DatabaseProvider::execute_in_transaction`].
    pub(crate) async fn run_transaction(
        &self,
        statements: &[String],
        commit: bool,
    ) -> std::result::Result<(), StatementFailure> {
        let mut client = self
            .connect()
            .await
            .map_err(|error| StatementFailure { index: 0, error })?;
        self.run_batch(&mut client, "SET XACT_ABORT ON; BEGIN TRANSACTION", "SQL Server BEGIN")
            .await
            .map_err(|error| StatementFailure { index: 0, error })?;

        for (index, sql) in statements.iter().enumerate() {
            tracing::trace!("Executing statement {}: {}", index, statement_preview(sql));
            let context = format!("Statement {} failed ({})", index, statement_preview(sql));
            if let Err(error) = self.run_batch(&mut client, sql, &context).await {
                // XACT_ABORT may already have rolled back; the guard keeps
                // the second rollback harmless.
                let _ = self
                    .run_batch(
                        &mut client,
                        "IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION",
                        "SQL Server ROLLBACK",
                    )
                    .await;
                return Err(StatementFailure { index, error });
            }
        }

        let finish = if commit {
            "COMMIT TRANSACTION"
        } else {
            "ROLLBACK TRANSACTION"
        };
        self.run_batch(&mut client, finish, finish)
            .await
            .map_err(|error| StatementFailure {
                index: statements.len(),
                error,
            })
    }
}
