//! In-memory provider shared by the engine and overwrite tests.
#![allow(dead_code)]

use async_trait::async_trait;
use dbtransit_core::dialect::{Dialect, dialect_for};
use dbtransit_core::models::{
    ColumnDefinition, ConstraintDefinition, ConstraintType, DatabaseEngine, ForeignKeyDefinition,
    IndexDefinition, ReferentialRule, TableSchema,
};
use dbtransit_core::providers::{
    ConnectionConfig, DatabaseProvider, Estimate, ProviderConstructor, ProviderRegistry,
    RowCountEstimate, RowStream, SizeEstimate, StatementFailure,
};
use dbtransit_core::validation::TableFilter;
use dbtransit_core::value::{RowData, RowValue};
use dbtransit_core::{DbTransitError, Result};
use futures::future::BoxFuture;
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct FakeTable {
    pub schema: TableSchema,
    pub rows: Vec<RowData>,
}

#[derive(Debug, Default)]
pub struct FakeDb {
    pub tables: Vec<FakeTable>,
    /// Every mutating call in order
    pub events: Vec<String>,
    /// Bare table names whose data load fails
    pub failing_imports: BTreeSet<String>,
    /// Bare table names whose data read fails
    pub failing_exports: BTreeSet<String>,
}

impl FakeDb {
    fn find(&self, name: &str, schema: Option<&str>) -> Option<&FakeTable> {
        self.tables.iter().find(|t| same_table(&t.schema, name, schema))
    }

    fn find_mut(&mut self, name: &str, schema: Option<&str>) -> Option<&mut FakeTable> {
        self.tables.iter_mut().find(|t| same_table(&t.schema, name, schema))
    }
}

fn same_table(table: &TableSchema, name: &str, schema: Option<&str>) -> bool {
    table.name.eq_ignore_ascii_case(name)
        && table.schema.as_deref().map(str::to_lowercase) == schema.map(str::to_lowercase)
}

pub struct FakeProvider {
    engine: DatabaseEngine,
    dialect: Box<dyn Dialect>,
    config: ConnectionConfig,
    pub db: Arc<Mutex<FakeDb>>,
    pub unreachable: bool,
}

impl FakeProvider {
    pub fn new(engine: DatabaseEngine, tables: Vec<FakeTable>) -> Self {
        Self {
            engine,
            dialect: dialect_for(engine),
            config: ConnectionConfig::new("fake".to_string()).with_database("shop".to_string()),
            db: Arc::new(Mutex::new(FakeDb {
                tables,
                ..Default::default()
            })),
            unreachable: false,
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.db.lock().unwrap().events.clone()
    }

    pub fn fail_import_of(&self, table: &str) {
        self.db.lock().unwrap().failing_imports.insert(table.to_string());
    }

    pub fn fail_export_of(&self, table: &str) {
        self.db.lock().unwrap().failing_exports.insert(table.to_string());
    }

    pub fn table(&self, name: &str, schema: Option<&str>) -> Option<FakeTable> {
        self.db.lock().unwrap().find(name, schema).cloned()
    }

    fn log(&self, event: String) {
        self.db.lock().unwrap().events.push(event);
    }
}

#[async_trait]
impl DatabaseProvider for FakeProvider {
    fn engine(&self) -> DatabaseEngine {
        self.engine
    }

    fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    fn connection_config(&self) -> &ConnectionConfig {
        &self.config
    }

    async fn test_connection(&self) -> Result<()> {
        if self.unreachable {
            return Err(DbTransitError::connection_failed(
                "fake server unreachable",
                std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
            ));
        }
        Ok(())
    }

    async fn get_tables(&self, filter: Option<&TableFilter>) -> Result<Vec<TableSchema>> {
        let db = self.db.lock().unwrap();
        Ok(db
            .tables
            .iter()
            .filter(|t| filter.is_none_or(|f| f.matches(t.schema.schema.as_deref(), &t.schema.name)))
            .map(|t| t.schema.clone())
            .collect())
    }

    async fn get_columns(&self, table: &str, schema: Option<&str>) -> Result<Vec<ColumnDefinition>> {
        Ok(self.table(table, schema).map(|t| t.schema.columns).unwrap_or_default())
    }

    async fn get_indexes(&self, table: &str, schema: Option<&str>) -> Result<Vec<IndexDefinition>> {
        Ok(self.table(table, schema).map(|t| t.schema.indexes).unwrap_or_default())
    }

    async fn get_foreign_keys(
        &self,
        table: &str,
        schema: Option<&str>,
    ) -> Result<Vec<ForeignKeyDefinition>> {
        Ok(self.table(table, schema).map(|t| t.schema.foreign_keys).unwrap_or_default())
    }

    async fn get_constraints(
        &self,
        table: &str,
        schema: Option<&str>,
    ) -> Result<Vec<ConstraintDefinition>> {
        Ok(self.table(table, schema).map(|t| t.schema.constraints).unwrap_or_default())
    }

    async fn get_table_data(
        &self,
        table: &TableSchema,
        _where_clause: Option<&str>,
        _batch_size: usize,
    ) -> Result<RowStream> {
        if self.db.lock().unwrap().failing_exports.contains(&table.name) {
            return Err(DbTransitError::query_failed(format!("read of {} failed", table.full_name())));
        }
        let rows = self
            .table(&table.name, table.schema.as_deref())
            .map(|t| t.rows)
            .ok_or_else(|| DbTransitError::query_failed(format!("no table {}", table.full_name())))?;
        Ok(RowStream::from_rows(rows))
    }

    async fn table_exists(&self, table: &str, schema: Option<&str>) -> Result<bool> {
        Ok(self.db.lock().unwrap().find(table, schema).is_some())
    }

    async fn estimate_row_count(&self, table: &str, schema: Option<&str>) -> RowCountEstimate {
        match self.table(table, schema) {
            Some(t) => Estimate::Known(t.rows.len() as u64),
            None => Estimate::Unavailable,
        }
    }

    async fn estimate_table_size(&self, _table: &str, _schema: Option<&str>) -> SizeEstimate {
        Estimate::Unavailable
    }

    async fn count_rows(&self, table: &str, schema: Option<&str>) -> Result<u64> {
        self.table(table, schema)
            .map(|t| t.rows.len() as u64)
            .ok_or_else(|| DbTransitError::query_failed("no such table"))
    }

    async fn execute_in_transaction(
        &self,
        statements: &[String],
        _commit: bool,
    ) -> std::result::Result<(), StatementFailure> {
        for statement in statements {
            self.log(format!("execute {}", statement));
        }
        Ok(())
    }

    async fn create_table(&self, table: &TableSchema) -> Result<()> {
        let mut db = self.db.lock().unwrap();
        if db.find(&table.name, table.schema.as_deref()).is_some() {
            return Err(DbTransitError::query_failed(format!("{} already exists", table.full_name())));
        }
        db.events.push(format!("create_table {}", table.full_name()));
        db.tables.push(FakeTable {
            schema: table.clone(),
            rows: Vec::new(),
        });
        Ok(())
    }

    async fn create_indexes(&self, table: &TableSchema) -> Result<()> {
        self.log(format!("create_indexes {}", table.full_name()));
        Ok(())
    }

    async fn create_constraints(&self, table: &TableSchema) -> Result<()> {
        self.log(format!("create_constraints {}", table.full_name()));
        Ok(())
    }

    async fn create_foreign_keys(&self, table: &TableSchema) -> Result<()> {
        let mut db = self.db.lock().unwrap();
        for fk in &table.foreign_keys {
            if db.find(&fk.referenced_table, fk.referenced_schema.as_deref()).is_none() {
                return Err(DbTransitError::query_failed(format!(
                    "referenced table {} missing",
                    fk.referenced_table
                )));
            }
            db.events.push(format!("foreign_key {} {}", table.full_name(), fk.name));
        }
        Ok(())
    }

    async fn import_data(&self, table: &TableSchema, rows: Vec<RowData>, _batch_size: usize) -> Result<u64> {
        let mut db = self.db.lock().unwrap();
        if db.failing_imports.contains(&table.name) {
            return Err(DbTransitError::batch_failed(
                table.full_name(),
                Some(0),
                "constraint violation",
            ));
        }
        let count = rows.len() as u64;
        db.events.push(format!("import {} {}", table.full_name(), count));
        let target = db
            .find_mut(&table.name, table.schema.as_deref())
            .ok_or_else(|| DbTransitError::query_failed(format!("no table {}", table.full_name())))?;
        target.rows.extend(rows);
        Ok(count)
    }

    async fn finalize_table(&self, table: &TableSchema) -> Result<()> {
        self.log(format!("finalize {}", table.full_name()));
        Ok(())
    }
}

/// Registry holding only `fake`, which hands out `provider`.
pub fn registry_with(provider: Arc<FakeProvider>) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    let constructor: ProviderConstructor = Arc::new(move |_settings| {
        let provider = Arc::clone(&provider);
        Box::pin(async move { Ok(provider as Arc<dyn DatabaseProvider>) })
            as BoxFuture<'static, Result<Arc<dyn DatabaseProvider>>>
    });
    registry.register("fake", constructor);
    registry
}

fn fk(name: &str, column: &str, referenced: &str) -> ForeignKeyDefinition {
    ForeignKeyDefinition {
        name: name.to_string(),
        columns: vec![column.to_string()],
        referenced_schema: Some("dbo".to_string()),
        referenced_table: referenced.to_string(),
        referenced_columns: vec!["Id".to_string()],
        update_rule: ReferentialRule::NoAction,
        delete_rule: ReferentialRule::Cascade,
    }
}

fn pk(table: &str) -> (IndexDefinition, ConstraintDefinition) {
    (
        IndexDefinition {
            name: format!("PK_{}", table),
            is_unique: true,
            is_clustered: true,
            is_primary_key: true,
            columns: vec!["Id".to_string()],
        },
        ConstraintDefinition {
            name: format!("PK_{}", table),
            constraint_type: ConstraintType::PrimaryKey,
            columns: vec!["Id".to_string()],
            definition: None,
        },
    )
}

fn table(name: &str, columns: Vec<ColumnDefinition>, fks: Vec<ForeignKeyDefinition>) -> TableSchema {
    let mut table = TableSchema::new(name, Some("dbo".to_string()));
    let (index, constraint) = pk(name);
    table.columns = columns;
    table.indexes = vec![index];
    table.constraints = vec![constraint];
    table.foreign_keys = fks;
    table
}

fn rows(columns: &[&str], count: usize, make: impl Fn(i64) -> Vec<RowValue>) -> Vec<RowData> {
    let columns: Arc<[String]> = columns.iter().map(|c| c.to_string()).collect();
    (1..=count as i64)
        .map(|i| RowData::new(Arc::clone(&columns), make(i)).unwrap())
        .collect()
}

/// SQL Server shop: Customers <- Orders <- OrderLines.
pub fn shop(customers: usize, orders: usize, lines: usize) -> Vec<FakeTable> {
    let customers_table = table(
        "Customers",
        vec![
            ColumnDefinition::new("Id", "int", 1).primary_key().identity(),
            ColumnDefinition::new("Name", "nvarchar", 2).with_length(100).not_null(),
        ],
        Vec::new(),
    );
    let orders_table = table(
        "Orders",
        vec![
            ColumnDefinition::new("Id", "int", 1).primary_key(),
            ColumnDefinition::new("CustomerId", "int", 2).not_null(),
            ColumnDefinition::new("Total", "decimal", 3).with_precision(10, 2),
        ],
        vec![fk("FK_Orders_Customers", "CustomerId", "Customers")],
    );
    let lines_table = table(
        "OrderLines",
        vec![
            ColumnDefinition::new("Id", "int", 1).primary_key(),
            ColumnDefinition::new("OrderId", "int", 2).not_null(),
            ColumnDefinition::new("Quantity", "int", 3),
        ],
        vec![fk("FK_OrderLines_Orders", "OrderId", "Orders")],
    );

    // Listed child-first so ordering is exercised.
    vec![
        FakeTable {
            schema: lines_table,
            rows: rows(&["Id", "OrderId", "Quantity"], lines, |i| {
                vec![RowValue::Int(i), RowValue::Int((i - 1) % orders.max(1) as i64 + 1), RowValue::Int(i % 7)]
            }),
        },
        FakeTable {
            schema: orders_table,
            rows: rows(&["Id", "CustomerId", "Total"], orders, |i| {
                vec![
                    RowValue::Int(i),
                    RowValue::Int((i - 1) % customers.max(1) as i64 + 1),
                    RowValue::Decimal(Decimal::new(i * 1999, 2)),
                ]
            }),
        },
        FakeTable {
            schema: customers_table,
            rows: rows(&["Id", "Name"], customers, |i| {
                vec![RowValue::Int(i), RowValue::Text(format!("Customer {}", i))]
            }),
        },
    ]
}
