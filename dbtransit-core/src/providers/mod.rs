//! Database provider trait and the engine implementations behind it.
//!
//! A provider normalizes one engine's catalog into the shared schema model,
//! streams table rows out and loads batches in. SQL text comes from the
//! provider's [`Dialect`]; the default methods here only decide *what* to
//! run, while each engine implements the transport primitives.
//!
//! # Module Structure
//! - `config`: connection tunables, URL parsing and credentials
//! - `helpers`: timeouts, privilege classification, row extraction
//! - `registry`: engine-name to constructor map
//! - engine modules (`postgres`, `mysql`, `sqlserver`, `firebird`), each
//!   behind a cargo feature

pub mod config;
pub mod helpers;
pub mod registry;

#[cfg(feature = "firebird")]
pub mod firebird;
#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgresql")]
pub mod postgres;
#[cfg(feature = "mssql")]
pub mod sqlserver;

pub use config::{ConnectionConfig, ConnectionSettings, Credentials, ProviderSettings};
pub use registry::{ProviderConstructor, ProviderRegistry};

use crate::dialect::Dialect;
use crate::error::{DbTransitError, ErrorClass};
use crate::models::{
    ColumnDefinition, ConstraintDefinition, ConstraintType, DatabaseEngine,
    ForeignKeyDefinition, IndexDefinition, TableSchema,
};
use crate::validation::TableFilter;
use crate::value::RowData;
use crate::Result;
use async_trait::async_trait;
use futures::Stream;
use std::collections::BTreeMap;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Outcome of an estimate that must never fail the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Estimate {
    Known(u64),
    /// The account may not read the statistics
    PermissionDenied,
    /// Statistics missing or the query failed for another reason
    Unavailable,
}

/// Row count estimate for a table.
pub type RowCountEstimate = Estimate;
/// Storage size estimate (bytes) for a table.
pub type SizeEstimate = Estimate;

impl Estimate {
    /// Legacy numeric form: the value, `-1` for permission denied, `-2` for unavailable.
    pub fn sentinel(&self) -> i64 {
        match self {
            Self::Known(n) => i64::try_from(*n).unwrap_or(i64::MAX),
            Self::PermissionDenied => -1,
            Self::Unavailable => -2,
        }
    }

    pub fn known(&self) -> Option<u64> {
        match self {
            Self::Known(n) => Some(*n),
            _ => None,
        }
    }

    /// Maps an estimation failure onto the non-failing form.
    pub fn from_error(error: &DbTransitError) -> Self {
        match error {
            DbTransitError::InsufficientPrivileges { .. } => Self::PermissionDenied,
            _ => Self::Unavailable,
        }
    }
}

/// Rows in flight between a producer task and the consumer.
const ROW_CHANNEL_CAPACITY: usize = 1024;

/// Producer half of a [`RowStream`].
#[derive(Debug, Clone)]
pub struct RowSender {
    sender: mpsc::Sender<Result<RowData>>,
}

impl RowSender {
    /// Sends one item. Returns `false` once the consumer has dropped the
    /// stream; the producer must then stop fetching.
    pub async fn send(&self, item: Result<RowData>) -> bool {
        self.sender.send(item).await.is_ok()
    }

    /// Blocking variant for producers running on a blocking thread.
    pub fn blocking_send(&self, item: Result<RowData>) -> bool {
        self.sender.blocking_send(item).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// A pull-based stream of rows backed by a bounded channel.
///
/// Dropping the stream closes the channel; the producer notices on its next
/// send and releases its cursor and connection.
#[derive(Debug)]
pub struct RowStream {
    receiver: mpsc::Receiver<Result<RowData>>,
}

impl RowStream {
    /// Creates a connected sender/stream pair.
    pub fn channel() -> (RowSender, Self) {
        Self::with_capacity(ROW_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (RowSender, Self) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (RowSender { sender }, Self { receiver })
    }

    /// A stream over rows already in memory.
    pub fn from_rows(rows: Vec<RowData>) -> Self {
        let (sender, receiver) = mpsc::channel(rows.len().max(1));
        for row in rows {
            // Capacity covers every row, so this cannot fail.
            let _ = sender.try_send(Ok(row));
        }
        Self { receiver }
    }

    /// A stream that yields a single error.
    pub fn failed(error: DbTransitError) -> Self {
        let (sender, receiver) = mpsc::channel(1);
        let _ = sender.try_send(Err(error));
        Self { receiver }
    }
}

impl Stream for RowStream {
    type Item = Result<RowData>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// A statement inside a transactional batch failed.
#[derive(Debug)]
pub struct StatementFailure {
    /// Index of the failing statement in the submitted list
    pub index: usize,
    pub error: DbTransitError,
}

/// Main trait for database providers.
///
/// # Object Safety
/// This trait is object-safe and used as `Arc<dyn DatabaseProvider>`.
#[async_trait]
pub trait DatabaseProvider: Send + Sync {
    /// Engine this provider talks to.
    fn engine(&self) -> DatabaseEngine;

    /// SQL generator for this engine.
    fn dialect(&self) -> &dyn Dialect;

    /// Connection tunables (credentials never included).
    fn connection_config(&self) -> &ConnectionConfig;

    /// Schema new tables land in when none is given. MySQL answers with the
    /// connected database; Firebird has none.
    fn default_schema(&self) -> Option<String> {
        self.engine().default_schema().map(str::to_string)
    }

    /// Opens a connection and runs a trivial query.
    ///
    /// # Errors
    /// Returns a connection error if the server is unreachable or rejects
    /// the credentials.
    async fn test_connection(&self) -> Result<()>;

    /// Lists user tables with columns, indexes, foreign keys and constraints.
    ///
    /// System catalogs are excluded unless `filter` names them explicitly.
    async fn get_tables(&self, filter: Option<&TableFilter>) -> Result<Vec<TableSchema>>;

    async fn get_columns(&self, table: &str, schema: Option<&str>) -> Result<Vec<ColumnDefinition>>;

    async fn get_indexes(&self, table: &str, schema: Option<&str>) -> Result<Vec<IndexDefinition>>;

    async fn get_foreign_keys(
        &self,
        table: &str,
        schema: Option<&str>,
    ) -> Result<Vec<ForeignKeyDefinition>>;

    async fn get_constraints(
        &self,
        table: &str,
        schema: Option<&str>,
    ) -> Result<Vec<ConstraintDefinition>>;

    /// Reads columns, indexes, foreign keys and constraints of one table.
    async fn describe_table(&self, name: &str, schema: Option<&str>) -> Result<TableSchema> {
        let mut table = TableSchema::new(name, schema.map(str::to_string));
        table.columns = self.get_columns(name, schema).await?;
        table.indexes = self.get_indexes(name, schema).await?;
        table.foreign_keys = self.get_foreign_keys(name, schema).await?;
        table.constraints = self.get_constraints(name, schema).await?;

        let pk = table
            .constraints
            .iter()
            .find(|c| c.constraint_type == ConstraintType::PrimaryKey)
            .map(|c| c.columns.clone())
            .unwrap_or_default();
        for column in &mut table.columns {
            if pk.iter().any(|p| p.eq_ignore_ascii_case(&column.name)) {
                column.is_primary_key = true;
                column.is_nullable = false;
            }
        }
        Ok(table)
    }

    /// Streams every row of `table`, optionally filtered by a validated
    /// predicate. `batch_size` sizes the driver fetch where supported.
    async fn get_table_data(
        &self,
        table: &TableSchema,
        where_clause: Option<&str>,
        batch_size: usize,
    ) -> Result<RowStream>;

    async fn table_exists(&self, table: &str, schema: Option<&str>) -> Result<bool>;

    /// Never fails; see [`Estimate`].
    async fn estimate_row_count(&self, table: &str, schema: Option<&str>) -> RowCountEstimate;

    /// Never fails; see [`Estimate`].
    async fn estimate_table_size(&self, table: &str, schema: Option<&str>) -> SizeEstimate;

    /// Exact row count of an existing table. Engines override this with a
    /// `COUNT(*)`; the default trusts the estimate.
    async fn count_rows(&self, table: &str, schema: Option<&str>) -> Result<u64> {
        let name = crate::models::qualified_name(schema, table);
        match self.estimate_row_count(table, schema).await {
            Estimate::Known(n) => Ok(n),
            Estimate::PermissionDenied => Err(DbTransitError::insufficient_privileges(format!(
                "SELECT on {}",
                name
            ))),
            Estimate::Unavailable => Err(DbTransitError::query_failed(format!(
                "row count unavailable for {}",
                name
            ))),
        }
    }

    /// Runs `statements` in one transaction, stopping at the first failure.
    /// Commits when `commit` is true and every statement succeeded,
    /// otherwise rolls back.
    async fn execute_in_transaction(
        &self,
        statements: &[String],
        commit: bool,
    ) -> std::result::Result<(), StatementFailure>;

    /// Runs statements in one committed transaction.
    async fn execute_statements(&self, statements: &[String]) -> Result<()> {
        if statements.is_empty() {
            return Ok(());
        }
        if self.connection_config().read_only {
            return Err(DbTransitError::configuration(
                "provider is read-only; refusing to execute DDL or writes",
            ));
        }
        self.execute_in_transaction(statements, true)
            .await
            .map_err(|failure| failure.error)
    }

    async fn create_table(&self, table: &TableSchema) -> Result<()> {
        let sql = self.dialect().create_table_sql(table)?;
        tracing::info!("Creating table {}", table.full_name());
        self.execute_statements(&[sql]).await
    }

    /// Creates every secondary index. Primary-key indexes are part of
    /// `CREATE TABLE`.
    async fn create_indexes(&self, table: &TableSchema) -> Result<()> {
        let statements = table
            .indexes
            .iter()
            .filter(|i| !i.is_primary_key)
            .map(|i| self.dialect().create_index_sql(table, i))
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!("Creating {} indexes on {}", statements.len(), table.full_name());
        self.execute_statements(&statements).await
    }

    /// Creates unique and check constraints.
    async fn create_constraints(&self, table: &TableSchema) -> Result<()> {
        let mut statements = Vec::new();
        for constraint in &table.constraints {
            if let Some(sql) = self.dialect().constraint_sql(table, constraint)? {
                statements.push(sql);
            }
        }
        self.execute_statements(&statements).await
    }

    async fn create_foreign_keys(&self, table: &TableSchema) -> Result<()> {
        let statements = table
            .foreign_keys
            .iter()
            .map(|fk| self.dialect().foreign_key_sql(table, fk))
            .collect::<Result<Vec<_>>>()?;
        self.execute_statements(&statements).await
    }

    /// Inserts `rows` in transactions of `batch_size` rows (0 = one
    /// transaction for everything). A failing transaction is rolled back
    /// whole and replayed row by row, always rolled back, to find the first
    /// bad row.
    ///
    /// # Errors
    /// Returns [`DbTransitError::BatchExecution`] for the first failing
    /// transaction. Rows of earlier transactions stay committed.
    async fn import_data(&self, table: &TableSchema, rows: Vec<RowData>, batch_size: usize) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        if self.connection_config().read_only {
            return Err(DbTransitError::configuration(
                "provider is read-only; refusing to import data",
            ));
        }
        let dialect = self.dialect();
        let chunk_size = if batch_size == 0 { rows.len() } else { batch_size };
        let prologue = dialect.insert_prologue(table)?;
        let epilogue = dialect.insert_epilogue(table)?;
        let mut inserted = 0u64;

        for chunk in rows.chunks(chunk_size) {
            let mut statements = prologue.clone();
            statements.extend(dialect.insert_statements(table, chunk)?);
            statements.extend(epilogue.iter().cloned());

            match self.execute_in_transaction(&statements, true).await {
                Ok(()) => {
                    inserted += chunk.len() as u64;
                    tracing::debug!(
                        "Inserted {} rows into {} ({} so far)",
                        chunk.len(),
                        table.full_name(),
                        inserted
                    );
                }
                Err(failure) => {
                    if matches!(failure.error, DbTransitError::Timeout { .. }) {
                        return Err(failure.error);
                    }
                    let batch_row = self.locate_failing_row(table, chunk).await;
                    tracing::warn!(
                        "Batch insert into {} rolled back{}: {}",
                        table.full_name(),
                        batch_row.map(|r| format!(" (first bad row {})", r)).unwrap_or_default(),
                        failure.error
                    );
                    return Err(DbTransitError::batch_failed(
                        table.full_name(),
                        batch_row,
                        failure.error.to_string(),
                    ));
                }
            }
        }
        Ok(inserted)
    }

    /// Replays `rows` one statement per row inside a transaction that is
    /// always rolled back, returning the index of the first failing row.
    async fn locate_failing_row(&self, table: &TableSchema, rows: &[RowData]) -> Option<usize> {
        let dialect = self.dialect();
        let prologue = dialect.insert_prologue(table).ok()?;
        let epilogue = dialect.insert_epilogue(table).ok()?;
        let mut statements = prologue.clone();
        for row in rows {
            let single = dialect.insert_statements(table, std::slice::from_ref(row)).ok()?;
            statements.extend(single);
        }
        statements.extend(epilogue);

        match self.execute_in_transaction(&statements, false).await {
            Ok(()) => None,
            Err(failure) => failure
                .index
                .checked_sub(prologue.len())
                .filter(|row| *row < rows.len()),
        }
    }

    /// Post-load fixups such as identity sequence resets.
    async fn finalize_table(&self, table: &TableSchema) -> Result<()> {
        let statements = self.dialect().post_load_statements(table)?;
        self.execute_statements(&statements).await
    }

    /// `CREATE TABLE` plus indexes, constraints and foreign keys as one
    /// script.
    fn generate_table_creation_script(&self, table: &TableSchema) -> Result<String> {
        let dialect = self.dialect();
        let mut statements = vec![dialect.create_table_sql(table)?];
        for index in table.indexes.iter().filter(|i| !i.is_primary_key) {
            statements.push(dialect.create_index_sql(table, index)?);
        }
        for constraint in &table.constraints {
            if let Some(sql) = dialect.constraint_sql(table, constraint)? {
                statements.push(sql);
            }
        }
        for fk in &table.foreign_keys {
            statements.push(dialect.foreign_key_sql(table, fk)?);
        }
        Ok(join_script(&statements))
    }

    /// INSERT script for `rows`, wrapped in the engine's prologue/epilogue.
    fn generate_insert_script(&self, table: &TableSchema, rows: &[RowData]) -> Result<String> {
        let dialect = self.dialect();
        let mut statements = dialect.insert_prologue(table)?;
        statements.extend(dialect.insert_statements(table, rows)?);
        statements.extend(dialect.insert_epilogue(table)?);
        Ok(join_script(&statements))
    }

    /// Quotes an identifier for this engine.
    fn escape_identifier(&self, name: &str) -> Result<String> {
        self.dialect().quote_identifier(name)
    }
}

/// A table found by a catalog listing, before its details are read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedTable {
    pub schema: Option<String>,
    pub name: String,
    /// Seeds `TableSchema::additional_properties` (`IsSystem`, `OwnerName`).
    pub properties: BTreeMap<String, String>,
}

impl ListedTable {
    pub fn new(schema: Option<String>, name: impl Into<String>) -> Self {
        Self {
            schema,
            name: name.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, key: &str, value: impl Into<String>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    fn is_system(&self) -> bool {
        self.properties
            .get("IsSystem")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }
}

/// Applies the table filter to a catalog listing and describes every
/// remaining table.
///
/// System tables are dropped unless the filter names them. A catalog or
/// privilege failure on one table skips that table with a warning; any
/// other failure aborts the listing.
pub async fn describe_listed_tables<P>(
    provider: &P,
    listed: Vec<ListedTable>,
    filter: Option<&TableFilter>,
) -> Result<Vec<TableSchema>>
where
    P: DatabaseProvider + ?Sized,
{
    let filter = filter.filter(|f| !f.is_empty());
    let mut tables = Vec::with_capacity(listed.len());

    for entry in listed {
        let selected = match filter {
            Some(filter) => filter.matches(entry.schema.as_deref(), &entry.name),
            None => !entry.is_system(),
        };
        if !selected {
            continue;
        }

        match provider.describe_table(&entry.name, entry.schema.as_deref()).await {
            Ok(mut table) => {
                table.additional_properties.extend(entry.properties);
                tracing::debug!(
                    "Collected table '{}' with {} columns, {} foreign keys, {} indexes",
                    table.full_name(),
                    table.columns.len(),
                    table.foreign_keys.len(),
                    table.indexes.len()
                );
                tables.push(table);
            }
            Err(e) if e.classification() == ErrorClass::Catalog => {
                tracing::warn!(
                    "Skipping table '{}': {}",
                    crate::models::qualified_name(entry.schema.as_deref(), &entry.name),
                    e
                );
            }
            Err(e) => return Err(e),
        }
    }

    tracing::info!("Collected {} tables from {}", tables.len(), provider.engine());
    Ok(tables)
}

/// Joins statements into a script, one per line, each terminated.
pub fn join_script(statements: &[String]) -> String {
    statements
        .iter()
        .map(|s| format!("{};", s))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::RowValue;
    use futures::StreamExt;
    use std::sync::Arc;

    fn row(id: i64) -> RowData {
        let columns: Arc<[String]> = Arc::from(vec!["id".to_string()]);
        RowData::new(columns, vec![RowValue::Int(id)]).unwrap()
    }

    #[test]
    fn test_estimate_sentinels() {
        assert_eq!(Estimate::Known(42).sentinel(), 42);
        assert_eq!(Estimate::PermissionDenied.sentinel(), -1);
        assert_eq!(Estimate::Unavailable.sentinel(), -2);
        assert_eq!(
            Estimate::from_error(&DbTransitError::insufficient_privileges("x")),
            Estimate::PermissionDenied
        );
        assert_eq!(
            Estimate::from_error(&DbTransitError::query_failed("x")),
            Estimate::Unavailable
        );
    }

    #[tokio::test]
    async fn test_row_stream_from_rows() {
        let stream = RowStream::from_rows(vec![row(1), row(2), row(3)]);
        let rows: Vec<_> = stream.collect().await;
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(Result::is_ok));
    }

    #[tokio::test]
    async fn test_producer_stops_when_stream_dropped() {
        let (sender, stream) = RowStream::with_capacity(2);
        let producer = tokio::spawn(async move {
            let mut sent = 0u64;
            for id in 0..1_000 {
                if !sender.send(Ok(row(id))).await {
                    break;
                }
                sent += 1;
            }
            sent
        });

        let mut stream = stream;
        let first = stream.next().await;
        assert!(first.is_some());
        drop(stream);

        let sent = producer.await.unwrap();
        assert!(sent < 1_000);
    }

    // ========================================================================
    // Default batch load
    // ========================================================================

    /// Records every transaction and fails the first statement mentioning
    /// `poison`.
    struct RecordingProvider {
        dialect: Box<dyn Dialect>,
        config: ConnectionConfig,
        poison: &'static str,
        timeout: bool,
        calls: std::sync::Mutex<Vec<(Vec<String>, bool)>>,
    }

    impl RecordingProvider {
        fn new(poison: &'static str) -> Self {
            Self {
                dialect: crate::dialect::dialect_for(DatabaseEngine::SqlServer),
                config: ConnectionConfig::new("stub".to_string()),
                poison,
                timeout: false,
                calls: std::sync::Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(Vec<String>, bool)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DatabaseProvider for RecordingProvider {
        fn engine(&self) -> DatabaseEngine {
            DatabaseEngine::SqlServer
        }

        fn dialect(&self) -> &dyn Dialect {
            self.dialect.as_ref()
        }

        fn connection_config(&self) -> &ConnectionConfig {
            &self.config
        }

        async fn test_connection(&self) -> Result<()> {
            Ok(())
        }

        async fn get_tables(&self, _filter: Option<&TableFilter>) -> Result<Vec<TableSchema>> {
            Ok(Vec::new())
        }

        async fn get_columns(&self, _table: &str, _schema: Option<&str>) -> Result<Vec<ColumnDefinition>> {
            Ok(Vec::new())
        }

        async fn get_indexes(&self, _table: &str, _schema: Option<&str>) -> Result<Vec<IndexDefinition>> {
            Ok(Vec::new())
        }

        async fn get_foreign_keys(
            &self,
            _table: &str,
            _schema: Option<&str>,
        ) -> Result<Vec<ForeignKeyDefinition>> {
            Ok(Vec::new())
        }

        async fn get_constraints(
            &self,
            _table: &str,
            _schema: Option<&str>,
        ) -> Result<Vec<ConstraintDefinition>> {
            Ok(Vec::new())
        }

        async fn get_table_data(
            &self,
            _table: &TableSchema,
            _where_clause: Option<&str>,
            _batch_size: usize,
        ) -> Result<RowStream> {
            Ok(RowStream::from_rows(Vec::new()))
        }

        async fn table_exists(&self, _table: &str, _schema: Option<&str>) -> Result<bool> {
            Ok(true)
        }

        async fn estimate_row_count(&self, _table: &str, _schema: Option<&str>) -> RowCountEstimate {
            Estimate::Unavailable
        }

        async fn estimate_table_size(&self, _table: &str, _schema: Option<&str>) -> SizeEstimate {
            Estimate::Unavailable
        }

        async fn execute_in_transaction(
            &self,
            statements: &[String],
            commit: bool,
        ) -> std::result::Result<(), StatementFailure> {
            self.calls.lock().unwrap().push((statements.to_vec(), commit));
            match statements.iter().position(|s| s.contains(self.poison)) {
                Some(index) if self.timeout => Err(StatementFailure {
                    index,
                    error: DbTransitError::timeout("insert", std::time::Duration::from_secs(1)),
                }),
                Some(index) => Err(StatementFailure {
                    index,
                    error: DbTransitError::query_failed("conversion failed"),
                }),
                None => Ok(()),
            }
        }
    }

    fn identity_table() -> TableSchema {
        let mut table = TableSchema::new("Things", Some("dbo".to_string()));
        table.columns = vec![
            ColumnDefinition::new("Id", "int", 1).primary_key().identity(),
            ColumnDefinition::new("Label", "nvarchar", 2).with_length(20),
        ];
        table
    }

    fn labelled_rows(count: i64, bad: i64) -> Vec<RowData> {
        let columns: Arc<[String]> = Arc::from(vec!["Id".to_string(), "Label".to_string()]);
        (1..=count)
            .map(|id| {
                let label = if id == bad { "boom".to_string() } else { format!("item {}", id) };
                RowData::new(Arc::clone(&columns), vec![RowValue::Int(id), RowValue::Text(label)])
                    .unwrap()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_import_data_reports_first_bad_row_of_failing_batch() {
        let provider = RecordingProvider::new("boom");
        let result = provider
            .import_data(&identity_table(), labelled_rows(25, 13), 10)
            .await;

        match result {
            Err(DbTransitError::BatchExecution { table, batch_row, .. }) => {
                assert_eq!(table, "dbo.Things");
                // Row 13 is the third row of the second batch.
                assert_eq!(batch_row, Some(2));
            }
            other => panic!("expected a batch failure, got {:?}", other),
        }

        let calls = provider.calls();
        let commits: Vec<bool> = calls.iter().map(|(_, commit)| *commit).collect();
        // Batch one committed, batch two failed, its replay rolled back, batch three never ran.
        assert_eq!(commits, vec![true, true, false]);

        let (replay, _) = &calls[2];
        assert_eq!(replay.len(), 12);
        assert!(replay[0].starts_with("SET IDENTITY_INSERT"));
        assert!(replay[11].starts_with("SET IDENTITY_INSERT"));
        assert!(replay[1..11].iter().all(|s| s.starts_with("INSERT INTO")));
    }

    #[tokio::test]
    async fn test_import_data_timeout_skips_replay() {
        let mut provider = RecordingProvider::new("boom");
        provider.timeout = true;
        let result = provider
            .import_data(&identity_table(), labelled_rows(5, 4), 0)
            .await;

        assert!(matches!(result, Err(DbTransitError::Timeout { .. })));
        assert_eq!(provider.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_import_data_commits_every_batch() {
        let provider = RecordingProvider::new("boom");
        let inserted = provider
            .import_data(&identity_table(), labelled_rows(25, 0), 10)
            .await
            .unwrap();
        assert_eq!(inserted, 25);
        assert_eq!(provider.calls().len(), 3);
        assert!(provider.calls().iter().all(|(_, commit)| *commit));
    }

    #[test]
    fn test_join_script() {
        let script = join_script(&["SET X ON".to_string(), "INSERT 1".to_string()]);
        assert_eq!(script, "SET X ON;\nINSERT 1;");
    }
}
