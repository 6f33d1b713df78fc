use super::models::{
    pack_doubles, pack_ints, unpack_doubles, unpack_ints, DatasetKind, DoubleTable, FeatureData,
    IntTable, StringTable, FILE_NAME_DATASET, FOLDER_DATASET, LABEL_DATASET, OFFSET_DATASET,
};
use super::{dataset_table, FeatureDatabase, Result, StoreError};
use rusqlite::{params, Connection, OptionalExtension};

impl FeatureDatabase {
    /// Append feature records, writing every complete chunk to disk.
    ///
    /// Rows that don't fill a chunk stay pending until a later call
    /// completes it. When `folder` is given it is recorded as the folder of
    /// a newly started source file. Ends with a flush. A rejected chunk is
    /// rolled back and rows accepted by earlier calls stay pending.
    pub fn append_features(&mut self, features: &[FeatureData], folder: Option<&str>) -> Result<()> {
        let chunk_size = self.layout.chunk_size;
        let pending_before = self.pending_features.len();
        let mut offset = 0;

        if !self.pending_features.is_empty() {
            let missing = chunk_size - self.pending_features.len();
            offset = missing.min(features.len());
            self.pending_features.extend_from_slice(&features[..offset]);
        }

        if self.pending_features.len() == chunk_size {
            let pending = std::mem::take(&mut self.pending_features);
            let written = self.append_chunk(&pending);
            self.pending_features = pending;
            if let Err(e) = written {
                // Rows accepted by earlier calls stay buffered
                self.pending_features.truncate(pending_before);
                return Err(e);
            }
            self.pending_features.clear();
        }

        while features.len() - offset >= chunk_size {
            self.append_chunk(&features[offset..offset + chunk_size])?;
            offset += chunk_size;
        }

        self.pending_features.extend_from_slice(&features[offset..]);

        if let Some(folder) = folder {
            self.append_folder(folder)?;
        }

        self.flush()
    }

    /// Write exactly one chunk to every row-granular dataset in one transaction.
    fn append_chunk(&mut self, features: &[FeatureData]) -> Result<()> {
        debug_assert_eq!(features.len(), self.layout.chunk_size);
        let start = self.example_count;

        let tx = self.conn.transaction()?;
        for table in &mut self.double_tables {
            write_double_chunk(&tx, table, start, features)?;
        }
        for table in &mut self.int_tables {
            write_int_chunk(&tx, table, start, features)?;
        }
        for table in &mut self.string_tables {
            if table.name == FILE_NAME_DATASET {
                write_file_name_chunk(&tx, table, start, features)?;
            }
        }
        tx.commit()?;

        self.example_count += features.len();
        log::debug!(
            "Wrote chunk of {} rows at {} ({} total)",
            features.len(),
            start,
            self.example_count
        );
        Ok(())
    }

    fn append_folder(&mut self, folder: &str) -> Result<()> {
        let row = self.folders.len();
        self.conn.execute(
            &format!(
                "INSERT INTO {} (row, value) VALUES (?1, ?2)",
                dataset_table(FOLDER_DATASET)
            ),
            params![row as i64, folder],
        )?;
        self.folders.push(folder.to_string());
        log::debug!("Recorded folder {folder} as #{row}");
        Ok(())
    }

    /// Read one row of a double dataset.
    pub fn read_double_row(&self, name: &str, index: usize) -> Result<Vec<f64>> {
        let (_, width) = self.table_spec(name, DatasetKind::Double)?;
        let bytes = self.read_blob(name, index)?;
        match unpack_doubles(&bytes) {
            Some(values) if values.len() == width => Ok(values),
            _ => Err(StoreError::CorruptRow {
                dataset: name.to_string(),
                row: index,
            }),
        }
    }

    /// Read one row of an integer dataset.
    pub fn read_int_row(&self, name: &str, index: usize) -> Result<Vec<i64>> {
        let (_, width) = self.table_spec(name, DatasetKind::Int)?;
        let bytes = self.read_blob(name, index)?;
        match unpack_ints(&bytes) {
            Some(values) if values.len() == width => Ok(values),
            _ => Err(StoreError::CorruptRow {
                dataset: name.to_string(),
                row: index,
            }),
        }
    }

    /// Read one string. For `folder` the index is a folder number, not an
    /// example row.
    pub fn read_string_row(&self, name: &str, index: usize) -> Result<String> {
        self.table_spec(name, DatasetKind::Text)?;
        self.check_row(name, index)?;
        self.conn
            .query_row(
                &format!("SELECT value FROM {} WHERE row = ?1", dataset_table(name)),
                params![index as i64],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::CorruptRow {
                dataset: name.to_string(),
                row: index,
            })
    }

    /// Kind and width of a known table.
    pub fn table_kind(&self, name: &str) -> Result<(DatasetKind, usize)> {
        self.layout
            .specs()
            .into_iter()
            .find(|s| s.name == name)
            .map(|s| (s.kind, s.width))
            .ok_or_else(|| StoreError::UnknownTable(name.to_string()))
    }

    fn table_spec(&self, name: &str, kind: DatasetKind) -> Result<(DatasetKind, usize)> {
        let spec = self.table_kind(name)?;
        if spec.0 != kind {
            return Err(StoreError::SchemaMismatch {
                dataset: name.to_string(),
                expected: format!("type {}", kind.as_str()),
                actual: format!("type {}", spec.0.as_str()),
            });
        }
        Ok(spec)
    }

    fn check_row(&self, name: &str, index: usize) -> Result<()> {
        let rows = if name == FOLDER_DATASET {
            self.folders.len()
        } else {
            self.example_count
        };
        if index >= rows {
            return Err(StoreError::RowOutOfRange {
                dataset: name.to_string(),
                index,
                rows,
            });
        }
        Ok(())
    }

    fn read_blob(&self, name: &str, index: usize) -> Result<Vec<u8>> {
        self.check_row(name, index)?;
        self.conn
            .query_row(
                &format!("SELECT value FROM {} WHERE row = ?1", dataset_table(name)),
                params![index as i64],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::CorruptRow {
                dataset: name.to_string(),
                row: index,
            })
    }
}

fn write_double_chunk(
    conn: &Connection,
    table: &mut DoubleTable,
    start: usize,
    features: &[FeatureData],
) -> Result<()> {
    table.data.clear();
    for feature in features {
        let Some(values) = feature.get(&table.name) else {
            return Err(StoreError::MissingField {
                dataset: table.name.clone(),
            });
        };
        if values.len() != table.width {
            return Err(StoreError::WidthMismatch {
                dataset: table.name.clone(),
                expected: table.width,
                actual: values.len(),
            });
        }
        table.data.extend_from_slice(values);
    }

    let mut stmt = conn.prepare_cached(&format!(
        "INSERT INTO {} (row, value) VALUES (?1, ?2)",
        dataset_table(&table.name)
    ))?;
    for (i, row) in table.data.chunks_exact(table.width).enumerate() {
        stmt.execute(params![(start + i) as i64, pack_doubles(row)])?;
    }
    Ok(())
}

fn write_int_chunk(
    conn: &Connection,
    table: &mut IntTable,
    start: usize,
    features: &[FeatureData],
) -> Result<()> {
    table.data.clear();
    for feature in features {
        match table.name.as_str() {
            LABEL_DATASET => {
                let label = &feature.example.label;
                if label.len() != table.width {
                    return Err(StoreError::WidthMismatch {
                        dataset: table.name.clone(),
                        expected: table.width,
                        actual: label.len(),
                    });
                }
                table.data.extend_from_slice(label);
            }
            OFFSET_DATASET => table.data.push(feature.example.frame_offset),
            _ => {
                return Err(StoreError::MissingField {
                    dataset: table.name.clone(),
                });
            }
        }
    }

    let mut stmt = conn.prepare_cached(&format!(
        "INSERT INTO {} (row, value) VALUES (?1, ?2)",
        dataset_table(&table.name)
    ))?;
    for (i, row) in table.data.chunks_exact(table.width).enumerate() {
        stmt.execute(params![(start + i) as i64, pack_ints(row)])?;
    }
    Ok(())
}

fn write_file_name_chunk(
    conn: &Connection,
    table: &mut StringTable,
    start: usize,
    features: &[FeatureData],
) -> Result<()> {
    table.data.clear();
    table
        .data
        .extend(features.iter().map(|f| f.example.file_path.clone()));

    let mut stmt = conn.prepare_cached(&format!(
        "INSERT INTO {} (row, value) VALUES (?1, ?2)",
        dataset_table(&table.name)
    ))?;
    for (i, value) in table.data.iter().enumerate() {
        stmt.execute(params![(start + i) as i64, value])?;
    }
    Ok(())
}
