pub mod models;
pub mod queries;
pub mod shuffle;

use models::{
    DatasetKind, DatasetSpec, DoubleTable, FeatureData, IntTable, StringTable, DOUBLE_DATASETS,
    FILE_NAME_DATASET, FOLDER_DATASET, LABEL_DATASET, OFFSET_DATASET,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid store layout: {0}")]
    InvalidLayout(String),
    #[error("Feature store {} does not exist", .0.display())]
    MissingStore(PathBuf),
    #[error("Existing file doesn't have a {0} dataset")]
    MissingDataset(String),
    #[error("Existing dataset '{dataset}' has the wrong shape: expected {expected}, found {actual}")]
    SchemaMismatch {
        dataset: String,
        expected: String,
        actual: String,
    },
    #[error("Feature is missing dataset {dataset}")]
    MissingField { dataset: String },
    #[error("Row for dataset '{dataset}' has {actual} values, expected {expected}")]
    WidthMismatch {
        dataset: String,
        expected: usize,
        actual: usize,
    },
    #[error("Row {index} of dataset '{dataset}' is out of range ({rows} rows)")]
    RowOutOfRange {
        dataset: String,
        index: usize,
        rows: usize,
    },
    #[error("Unknown table '{0}'")]
    UnknownTable(String),
    #[error("Row {row} of dataset '{dataset}' is corrupt")]
    CorruptRow { dataset: String, row: usize },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Shape shared by every dataset in a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLayout {
    /// Rows per chunk; appends reach disk only in whole chunks.
    pub chunk_size: usize,
    /// Width of every per-band dataset.
    pub band_count: usize,
}

impl StoreLayout {
    pub fn new(chunk_size: usize, band_count: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(StoreError::InvalidLayout("chunk size must be at least 1".into()));
        }
        if band_count == 0 {
            return Err(StoreError::InvalidLayout("band count must be at least 1".into()));
        }
        Ok(Self {
            chunk_size,
            band_count,
        })
    }

    /// Every dataset the store expects, doubles first, then ints, then strings.
    pub fn specs(&self) -> Vec<DatasetSpec> {
        let mut specs: Vec<DatasetSpec> = DOUBLE_DATASETS
            .iter()
            .map(|&name| DatasetSpec {
                name,
                kind: DatasetKind::Double,
                width: self.band_count,
            })
            .collect();
        specs.push(DatasetSpec {
            name: LABEL_DATASET,
            kind: DatasetKind::Int,
            width: self.band_count,
        });
        specs.push(DatasetSpec {
            name: OFFSET_DATASET,
            kind: DatasetKind::Int,
            width: 1,
        });
        for name in [FILE_NAME_DATASET, FOLDER_DATASET] {
            specs.push(DatasetSpec {
                name,
                kind: DatasetKind::Text,
                width: 1,
            });
        }
        specs
    }
}

/// Quoted SQLite table name backing a dataset.
pub(crate) fn dataset_table(name: &str) -> String {
    format!("\"ds_{name}\"")
}

/// Chunked, append-only feature dataset store.
///
/// A single writer owns the connection and every buffer. Two instances must
/// never open the same file at once; nothing here locks against it.
pub struct FeatureDatabase {
    pub conn: Connection,
    layout: StoreLayout,
    double_tables: Vec<DoubleTable>,
    int_tables: Vec<IntTable>,
    string_tables: Vec<StringTable>,
    folders: Vec<String>,
    example_count: usize,
    pending_features: Vec<FeatureData>,
}

impl FeatureDatabase {
    /// Open `path`, creating the store when the file doesn't exist or when
    /// `overwrite` is set; otherwise load and validate the existing datasets.
    pub fn open(path: &Path, layout: StoreLayout, overwrite: bool) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        if overwrite {
            remove_store_files(path)?;
        }
        let exists = path.exists();

        let conn = Connection::open(path)?;
        let mut db = Self::with_connection(conn, layout)?;
        if exists {
            db.load()?;
        } else {
            db.create()?;
        }
        Ok(db)
    }

    /// Open a store that must already exist; never creates a file.
    pub fn open_existing(path: &Path, layout: StoreLayout) -> Result<Self> {
        if !path.exists() {
            return Err(StoreError::MissingStore(path.to_path_buf()));
        }
        Self::open(path, layout, false)
    }

    pub fn open_in_memory(layout: StoreLayout) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut db = Self::with_connection(conn, layout)?;
        db.create()?;
        Ok(db)
    }

    fn with_connection(conn: Connection, layout: StoreLayout) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self {
            conn,
            layout,
            double_tables: Vec::new(),
            int_tables: Vec::new(),
            string_tables: Vec::new(),
            folders: Vec::new(),
            example_count: 0,
            pending_features: Vec::with_capacity(layout.chunk_size),
        })
    }

    fn create(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(
            "
            CREATE TABLE datasets (
                name        TEXT PRIMARY KEY,
                kind        TEXT NOT NULL,
                width       INTEGER NOT NULL,
                chunk_size  INTEGER NOT NULL
            );
            ",
        )?;

        for spec in self.layout.specs() {
            let column = match spec.kind {
                DatasetKind::Text => "TEXT",
                DatasetKind::Double | DatasetKind::Int => "BLOB",
            };
            tx.execute_batch(&format!(
                "CREATE TABLE {} (row INTEGER PRIMARY KEY, value {column} NOT NULL);",
                dataset_table(spec.name)
            ))?;
            tx.execute(
                "INSERT INTO datasets (name, kind, width, chunk_size) VALUES (?1, ?2, ?3, ?4)",
                params![
                    spec.name,
                    spec.kind.as_str(),
                    spec.width as i64,
                    self.layout.chunk_size as i64
                ],
            )?;
        }
        tx.commit()?;

        self.allocate_tables();
        log::info!(
            "Created feature store (chunk size {}, {} bands)",
            self.layout.chunk_size,
            self.layout.band_count
        );
        Ok(())
    }

    fn load(&mut self) -> Result<()> {
        let specs = self.layout.specs();

        if !self.table_exists("datasets")? {
            return Err(StoreError::MissingDataset(specs[0].name.to_string()));
        }

        for spec in &specs {
            self.validate_dataset(spec)?;
        }

        self.example_count = self.dataset_extent(DOUBLE_DATASETS[0])?;
        for spec in specs.iter().filter(|s| s.is_row_granular()) {
            let rows = self.dataset_extent(spec.name)?;
            if rows != self.example_count {
                return Err(StoreError::SchemaMismatch {
                    dataset: spec.name.to_string(),
                    expected: format!("{} rows", self.example_count),
                    actual: format!("{rows} rows"),
                });
            }
        }

        let mut stmt = self.conn.prepare(&format!(
            "SELECT value FROM {} ORDER BY row",
            dataset_table(FOLDER_DATASET)
        ))?;
        let folders = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        drop(stmt);
        self.folders = folders;

        self.allocate_tables();
        log::info!(
            "Loaded feature store: {} examples, {} folders",
            self.example_count,
            self.folders.len()
        );
        Ok(())
    }

    fn validate_dataset(&self, spec: &DatasetSpec) -> Result<()> {
        let entry: Option<(String, i64, i64)> = self
            .conn
            .query_row(
                "SELECT kind, width, chunk_size FROM datasets WHERE name = ?1",
                params![spec.name],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((kind, width, chunk_size)) = entry else {
            return Err(StoreError::MissingDataset(spec.name.to_string()));
        };
        if !self.table_exists(&format!("ds_{}", spec.name))? {
            return Err(StoreError::MissingDataset(spec.name.to_string()));
        }

        let mismatch = |expected: String, actual: String| StoreError::SchemaMismatch {
            dataset: spec.name.to_string(),
            expected,
            actual,
        };

        if DatasetKind::parse(&kind) != Some(spec.kind) {
            return Err(mismatch(format!("type {}", spec.kind.as_str()), format!("type {kind}")));
        }
        if width != spec.width as i64 {
            return Err(mismatch(format!("width {}", spec.width), format!("width {width}")));
        }
        if chunk_size != self.layout.chunk_size as i64 {
            return Err(mismatch(
                format!("chunk size {}", self.layout.chunk_size),
                format!("chunk size {chunk_size}"),
            ));
        }
        Ok(())
    }

    fn table_exists(&self, name: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Number of rows physically stored in a dataset.
    pub fn dataset_extent(&self, name: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", dataset_table(name)),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Size the per-table buffers to exactly one chunk.
    fn allocate_tables(&mut self) {
        let chunk = self.layout.chunk_size;
        self.double_tables.clear();
        self.int_tables.clear();
        self.string_tables.clear();

        for spec in self.layout.specs() {
            match spec.kind {
                DatasetKind::Double => self.double_tables.push(DoubleTable {
                    name: spec.name.to_string(),
                    width: spec.width,
                    data: Vec::with_capacity(chunk * spec.width),
                }),
                DatasetKind::Int => self.int_tables.push(IntTable {
                    name: spec.name.to_string(),
                    width: spec.width,
                    data: Vec::with_capacity(chunk * spec.width),
                }),
                DatasetKind::Text => self.string_tables.push(StringTable {
                    name: spec.name.to_string(),
                    data: Vec::with_capacity(chunk),
                }),
            }
        }
    }

    /// Make everything written so far durable.
    pub fn flush(&self) -> Result<()> {
        self.conn
            .query_row("PRAGMA wal_checkpoint(PASSIVE)", [], |_| Ok(()))?;
        Ok(())
    }

    pub fn layout(&self) -> StoreLayout {
        self.layout
    }

    /// Rows written to disk; always a multiple of the chunk size.
    pub fn example_count(&self) -> usize {
        self.example_count
    }

    /// Rows buffered in memory awaiting a full chunk.
    pub fn pending_count(&self) -> usize {
        self.pending_features.len()
    }

    pub fn folders(&self) -> &[String] {
        &self.folders
    }

    pub fn double_tables(&self) -> &[DoubleTable] {
        &self.double_tables
    }

    pub fn int_tables(&self) -> &[IntTable] {
        &self.int_tables
    }

    pub fn string_tables(&self) -> &[StringTable] {
        &self.string_tables
    }
}

fn remove_store_files(path: &Path) -> Result<()> {
    for suffix in ["", "-wal", "-shm"] {
        let mut candidate = path.as_os_str().to_owned();
        candidate.push(suffix);
        match std::fs::remove_file(&candidate) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
