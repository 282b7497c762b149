//! Archive import: schema recreation, batched data load and deferred
//! foreign keys.

use super::dependency::order_tables;
use super::options::ImportOptions;
use super::progress::{NoopProgress, ProgressEvent, ProgressSink};
use super::state::{OperationKind, OperationState, Stage, TableOutcome, TableStatus};
use crate::archive::{Archive, IMPORT_STATE_FILE, Manifest, ManifestTable};
use crate::dialect::adapt_table;
use crate::error::{DbTransitError, ErrorClass};
use crate::models::{DatabaseEngine, TableSchema, qualified_name};
use crate::providers::DatabaseProvider;
use crate::Result;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const LOADED_BY_PREVIOUS_RUN: &str = "completed by a previous run";

/// A ledger entry whose data is already in the target, either loaded by that
/// run or carried over from an earlier one.
fn loaded_before(outcome: &TableOutcome) -> bool {
    match outcome.status {
        TableStatus::Completed => true,
        TableStatus::Skipped => outcome.message.as_deref() == Some(LOADED_BY_PREVIOUS_RUN),
        _ => false,
    }
}

/// One archive table on its way into the target.
#[derive(Debug)]
struct ImportTable {
    /// Ledger key: the table's name in the archive
    name: String,
    entry: ManifestTable,
    /// Table as it will exist in the target
    target: TableSchema,
    created: bool,
    /// Created in this run or already present in the target
    present: bool,
    /// Loaded by a previous run recorded in the ledger
    resumed: bool,
}

/// Loads an archive into a provider.
pub struct Importer {
    provider: Arc<dyn DatabaseProvider>,
    options: ImportOptions,
    progress: Arc<dyn ProgressSink>,
    cancel: Option<watch::Receiver<bool>>,
}

impl Importer {
    pub fn new(provider: Arc<dyn DatabaseProvider>, options: ImportOptions) -> Self {
        Self {
            provider,
            options,
            progress: Arc::new(NoopProgress),
            cancel: None,
        }
    }

    pub fn with_progress(mut self, sink: impl ProgressSink + 'static) -> Self {
        self.progress = Arc::new(sink);
        self
    }

    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Runs the import.
    ///
    /// # Errors
    /// Returns a configuration error for invalid options. Every later
    /// failure is recorded in the returned [`OperationState`].
    pub async fn run(self) -> Result<OperationState> {
        let mut state = OperationState::new(OperationKind::Import);
        self.options.validate()?;
        let filter = self.options.table_filter()?;
        let archive = Archive::new(&self.options.input_dir);
        self.report(&state, None);

        let manifest = match archive.read_manifest().await {
            Ok(manifest) => manifest,
            Err(e) => {
                state.abort(&e);
                return Ok(self.finish(state).await);
            }
        };
        if !manifest.complete {
            state.add_warning(format!(
                "Archive {} is incomplete; importing the {} tables it lists",
                self.options.input_dir.display(),
                manifest.tables.len()
            ));
        }
        if let Some(filter) = &filter {
            for entry in filter.entries() {
                if manifest.selected(None).all(|t| !entry.matches(t.schema.as_deref(), &t.table)) {
                    state.add_warning(format!("Table {} is not in the archive", entry));
                }
            }
        }
        let previous = self.load_previous_state().await;

        state.set_stage(Stage::ConnectingDatabase);
        self.report(&state, None);
        if let Err(e) = self.provider.test_connection().await {
            state.abort(&e);
            return Ok(self.finish(state).await);
        }
        let target_schema = self
            .options
            .target_schema
            .clone()
            .or_else(|| self.provider.default_schema());
        info!(
            "Importing {} tables from {} archive into {}{}",
            manifest.tables.len(),
            manifest.engine,
            self.provider.engine(),
            target_schema.as_deref().map(|s| format!(" schema {}", s)).unwrap_or_default()
        );

        let mut tables = self
            .prepare_tables(&archive, &manifest, filter.as_ref(), target_schema.as_deref(), &mut state)
            .await;
        if let Some(previous) = &previous {
            for table in &mut tables {
                let Some(done) = previous.table(&table.name).filter(|t| loaded_before(t)) else {
                    continue;
                };
                let foreign_keys = done.foreign_keys.clone();
                state.mark_skipped(&table.name, LOADED_BY_PREVIOUS_RUN);
                state.table_mut(&table.name).foreign_keys = foreign_keys;
                table.present = self
                    .provider
                    .table_exists(&table.target.name, table.target.schema.as_deref())
                    .await
                    .unwrap_or(false);
                table.resumed = true;
            }
        }

        if self.options.create_schema && self.should_continue(&state) {
            state.set_stage(Stage::ImportingSchema);
            self.create_tables(&mut tables, &mut state).await;
        } else {
            for table in &mut tables {
                table.present = true;
            }
        }

        if self.options.create_schema && self.should_continue(&state) {
            state.set_stage(Stage::CreatingIndexes);
            self.create_indexes(&tables, &mut state).await;
        }

        if self.should_continue(&state) {
            if self.options.schema_only {
                for table in &tables {
                    if self.is_active(&state, &table.name) {
                        state.mark_completed(&table.name);
                    }
                }
            } else {
                state.set_stage(Stage::ImportingData);
                self.load_data(&archive, &tables, &mut state).await;
            }
        }

        if self.options.create_foreign_keys && self.should_continue(&state) {
            state.set_stage(Stage::CreatingForeignKeys);
            self.create_foreign_keys(&tables, &mut state).await;
        }

        if self.should_continue(&state) {
            state.set_stage(Stage::Finalizing);
            self.report(&state, None);
        }
        Ok(self.finish(state).await)
    }

    async fn load_previous_state(&self) -> Option<OperationState> {
        let path = self.options.state_file.as_ref()?;
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return None;
        }
        match OperationState::load(path).await {
            Ok(previous) if previous.operation == OperationKind::Import => {
                info!("Resuming import from {}", path.display());
                Some(previous)
            }
            Ok(_) => {
                warn!("{} is not an import ledger; ignoring it", path.display());
                None
            }
            Err(e) => {
                warn!("Ignoring unreadable import state {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Reads table metadata, orders the tables referenced-first and adapts
    /// each one to the target engine.
    async fn prepare_tables(
        &self,
        archive: &Archive,
        manifest: &Manifest,
        filter: Option<&crate::validation::TableFilter>,
        target_schema: Option<&str>,
        state: &mut OperationState,
    ) -> Vec<ImportTable> {
        let mut sources = Vec::new();
        let mut entries: BTreeMap<String, (ManifestTable, DatabaseEngine)> = BTreeMap::new();
        for entry in manifest.selected(filter) {
            let name = entry.full_name();
            match archive.read_metadata(&entry.metadata_file).await {
                Ok(metadata) => {
                    entries.insert(name.to_lowercase(), (entry.clone(), metadata.engine));
                    sources.push(metadata.schema);
                }
                Err(e) => {
                    if self.fail_table(state, &name, &e) {
                        return Vec::new();
                    }
                }
            }
        }

        let ordered = order_tables(sources);
        state.warnings.extend(ordered.warnings);

        let dialect = self.provider.dialect();
        let mut tables = Vec::with_capacity(ordered.tables.len());
        for source in ordered.tables {
            let name = source.full_name();
            let Some((entry, engine)) = entries.remove(&name.to_lowercase()) else {
                continue;
            };
            let adapted = adapt_table(&source, engine, dialect, target_schema);
            for warning in adapted.warnings {
                state.add_warning(warning);
            }
            state.table_mut(&name);
            tables.push(ImportTable {
                name,
                entry,
                target: adapted.table,
                created: false,
                present: false,
                resumed: false,
            });
        }
        self.report(state, None);
        tables
    }

    async fn create_tables(&self, tables: &mut [ImportTable], state: &mut OperationState) {
        for table in tables.iter_mut() {
            if !self.should_continue(state) {
                break;
            }
            if self.is_cancelled() {
                state.cancel();
                break;
            }
            if !self.is_active(state, &table.name) {
                continue;
            }
            state.mark_in_progress(&table.name);
            self.report(state, Some(&table.name));

            let target = &table.target;
            let result = match self
                .provider
                .table_exists(&target.name, target.schema.as_deref())
                .await
            {
                Ok(true) => {
                    state.add_warning(format!(
                        "Table {} already exists; loading into the existing table",
                        target.full_name()
                    ));
                    table.present = true;
                    Ok(())
                }
                Ok(false) => self.provider.create_table(target).await.map(|()| {
                    table.created = true;
                    table.present = true;
                }),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                self.fail_table(state, &table.name, &e);
            }
        }
    }

    async fn create_indexes(&self, tables: &[ImportTable], state: &mut OperationState) {
        for table in tables.iter().filter(|t| t.created) {
            if !self.should_continue(state) {
                break;
            }
            if !self.is_active(state, &table.name) {
                continue;
            }
            let result = match self.provider.create_indexes(&table.target).await {
                Ok(()) => self.provider.create_constraints(&table.target).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                self.fail_table(state, &table.name, &e);
            }
        }
    }

    async fn load_data(&self, archive: &Archive, tables: &[ImportTable], state: &mut OperationState) {
        for table in tables {
            if !self.should_continue(state) {
                break;
            }
            if !self.is_active(state, &table.name) {
                continue;
            }
            if self.is_cancelled() {
                state.cancel();
                break;
            }
            state.mark_in_progress(&table.name);
            match self.load_table(archive, table, state).await {
                Ok(()) => {
                    state.mark_completed(&table.name);
                    let outcome = state.table_mut(&table.name);
                    info!("Imported {} ({} rows)", table.target.full_name(), outcome.rows);
                }
                Err(DbTransitError::Cancelled) => {
                    state.cancel();
                    break;
                }
                Err(e) => {
                    self.fail_table(state, &table.name, &e);
                }
            }
            self.save_state(state).await;
        }
    }

    /// Loads every batch of one table in archive order.
    async fn load_table(
        &self,
        archive: &Archive,
        table: &ImportTable,
        state: &mut OperationState,
    ) -> Result<()> {
        let total_rows = Some(table.entry.row_count);
        for file in &table.entry.data_files {
            if self.is_cancelled() {
                return Err(DbTransitError::Cancelled);
            }
            let rows = archive.read_batch(file).await?.into_rows()?;
            let bytes: u64 = rows.iter().map(|r| r.approximate_size() as u64).sum();
            let inserted = self
                .provider
                .import_data(&table.target, rows, self.options.batch_size)
                .await?;

            let outcome = state.table_mut(&table.name);
            outcome.rows += inserted;
            outcome.batches += 1;
            outcome.bytes += bytes;
            let (rows_done, bytes_done) = (outcome.rows, outcome.bytes);
            debug!("Loaded {} into {} ({} rows so far)", file, table.target.full_name(), rows_done);
            self.progress.report(
                &ProgressEvent::from_state(state)
                    .with_table(&table.name)
                    .with_rows(rows_done, total_rows)
                    .with_bytes(bytes_done, None),
            );
        }
        self.provider.finalize_table(&table.target).await
    }

    /// Adds foreign keys whose both endpoint tables exist.
    ///
    /// Tables loaded by a previous run get the keys that run did not record
    /// as created, since it may have stopped before this stage.
    async fn create_foreign_keys(&self, tables: &[ImportTable], state: &mut OperationState) {
        for table in tables {
            if self.is_cancelled() {
                state.cancel();
                break;
            }
            let loaded = match state.status_of(&table.name) {
                Some(TableStatus::Completed) => true,
                Some(TableStatus::Skipped) => table.resumed,
                _ => false,
            };
            if !table.present || !loaded {
                continue;
            }
            for fk in &table.target.foreign_keys {
                if state
                    .table(&table.name)
                    .is_some_and(|t| t.foreign_keys.contains(&fk.name))
                {
                    continue;
                }
                let referenced = qualified_name(fk.referenced_schema.as_deref(), &fk.referenced_table);
                let endpoint_exists = match tables.iter().find(|t| {
                    t.target.full_name().eq_ignore_ascii_case(&referenced)
                }) {
                    Some(other) => other.present && state.status_of(&other.name) != Some(TableStatus::Failed),
                    None => self
                        .provider
                        .table_exists(&fk.referenced_table, fk.referenced_schema.as_deref())
                        .await
                        .unwrap_or(false),
                };
                if !endpoint_exists {
                    state.add_warning(format!(
                        "Foreign key {} on {} skipped: referenced table {} does not exist",
                        fk.name,
                        table.target.full_name(),
                        referenced
                    ));
                    continue;
                }

                let mut single = table.target.clone();
                single.foreign_keys = vec![fk.clone()];
                debug!("Creating foreign key {} on {}", fk.name, table.target.full_name());
                match self.provider.create_foreign_keys(&single).await {
                    Ok(()) => state.table_mut(&table.name).foreign_keys.push(fk.name.clone()),
                    Err(e) => {
                        warn!("Failed to create foreign key {}: {}", fk.name, e);
                        state.record_error(Some(&table.name), &e);
                    }
                }
            }
        }
    }

    /// Records a table failure and decides whether the run continues.
    fn fail_table(&self, state: &mut OperationState, name: &str, error: &DbTransitError) -> bool {
        if error.classification() == ErrorClass::Cancelled {
            state.cancel();
            return true;
        }
        warn!("Import of {} failed: {}", name, error);
        state.mark_failed(name, error);
        if !self.options.continue_on_error {
            state.aborted = true;
            return true;
        }
        false
    }

    fn should_continue(&self, state: &OperationState) -> bool {
        !state.aborted && !state.cancelled
    }

    /// Neither failed nor skipped.
    fn is_active(&self, state: &OperationState, name: &str) -> bool {
        !matches!(
            state.status_of(name),
            Some(TableStatus::Failed | TableStatus::Skipped)
        )
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    fn report(&self, state: &OperationState, table: Option<&str>) {
        let mut event = ProgressEvent::from_state(state);
        if let Some(table) = table {
            event = event.with_table(table);
        }
        self.progress.report(&event);
    }

    fn state_path(&self) -> PathBuf {
        self.options
            .state_file
            .clone()
            .unwrap_or_else(|| self.options.input_dir.join(IMPORT_STATE_FILE))
    }

    async fn save_state(&self, state: &OperationState) {
        let path = self.state_path();
        if let Err(e) = state.save(&path).await {
            warn!("Failed to save import state to {}: {}", path.display(), e);
        }
    }

    async fn finish(&self, mut state: OperationState) -> OperationState {
        let warnings = state.warnings.clone();
        state.finish();
        if self.options.state_file.is_some() || self.options.input_dir.exists() {
            self.save_state(&state).await;
        }
        self.progress
            .report(&ProgressEvent::from_state(&state).with_warnings(warnings));
        state
    }
}
