// In-place randomization of a feature store
//
// Each iteration takes a sequential chunk and a random chunk, reads the rows
// of both from every row-granular dataset, applies one shared permutation to
// all of them and writes the rows back. Sharing the permutation is what
// keeps features, labels, offsets and file names aligned.

use std::ops::RangeInclusive;

use rand::RngCore;
use rusqlite::{params, Connection};

use super::models::DatasetKind;
use super::{dataset_table, FeatureDatabase, Result, StoreError};

/// Uniform integer in `range`, without modulo bias.
///
/// Draws are rejected above the largest multiple of the range size that
/// fits in a `u64`.
pub fn random_in_range<R: RngCore + ?Sized>(rng: &mut R, range: RangeInclusive<usize>) -> usize {
    let (start, end) = range.into_inner();
    assert!(start <= end, "empty range {start}..={end}");

    let span = (end - start) as u64 + 1;
    let upper_bound = u64::MAX - u64::MAX % span;
    loop {
        let value = rng.next_u64();
        if value < upper_bound {
            return start + (value % span) as usize;
        }
    }
}

/// Uniformly random permutation of `0..n` (Fisher-Yates).
pub fn random_permutation<R: RngCore + ?Sized>(rng: &mut R, n: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..n).collect();
    for i in 0..n.saturating_sub(1) {
        let j = random_in_range(rng, i..=n - 1);
        indices.swap(i, j);
    }
    indices
}

/// Row indices touched by one iteration: both chunks when they are
/// disjoint, otherwise the rows of their union so nothing is duplicated.
fn shuffle_rows(start1: usize, start2: usize, chunk_size: usize) -> Vec<usize> {
    let (low, high) = if start1 <= start2 {
        (start1, start2)
    } else {
        (start2, start1)
    };
    if low + chunk_size <= high {
        (start1..start1 + chunk_size)
            .chain(start2..start2 + chunk_size)
            .collect()
    } else {
        (low..high + chunk_size).collect()
    }
}

impl FeatureDatabase {
    /// Randomize row order with `passes * example_count / chunk_size`
    /// pairwise chunk swaps.
    ///
    /// `folder` is never touched. `progress` receives the completed
    /// fraction after every iteration.
    pub fn shuffle<R: RngCore + ?Sized>(
        &mut self,
        chunk_size: usize,
        passes: usize,
        rng: &mut R,
        mut progress: Option<&mut dyn FnMut(f64)>,
    ) -> Result<()> {
        let example_count = self.example_count;
        if chunk_size == 0 || chunk_size > example_count {
            log::info!(
                "Nothing to shuffle: {example_count} examples, chunk size {chunk_size}"
            );
            return Ok(());
        }

        let shuffle_count = passes * example_count / chunk_size;
        let tables: Vec<(String, DatasetKind)> = self
            .layout
            .specs()
            .into_iter()
            .filter(|s| s.is_row_granular())
            .map(|s| (s.name.to_string(), s.kind))
            .collect();

        log::info!(
            "Shuffling {example_count} examples: {shuffle_count} iterations of {chunk_size}-row chunks"
        );

        for i in 0..shuffle_count {
            let start1 = i * chunk_size % (example_count - chunk_size + 1);
            let start2 = random_in_range(rng, 0..=example_count - chunk_size);
            let rows = shuffle_rows(start1, start2, chunk_size);
            let permutation = random_permutation(rng, rows.len());

            let tx = self.conn.transaction()?;
            for (name, kind) in &tables {
                match kind {
                    DatasetKind::Double | DatasetKind::Int => {
                        let values = read_blobs(&tx, name, &rows)?;
                        write_blobs(&tx, name, &rows, &permute(values, &permutation))?;
                    }
                    DatasetKind::Text => {
                        let values = read_strings(&tx, name, &rows)?;
                        write_strings(&tx, name, &rows, &permute(values, &permutation))?;
                    }
                }
            }
            tx.commit()?;
            self.flush()?;

            log::trace!("Shuffle {i}: rows at {start1} and {start2}");
            if let Some(callback) = progress.as_mut() {
                let fraction = if shuffle_count > 1 {
                    i as f64 / (shuffle_count - 1) as f64
                } else {
                    1.0
                };
                callback(fraction);
            }
        }

        self.flush()?;
        log::info!("Shuffle complete");
        Ok(())
    }
}

/// `result[i] = values[permutation[i]]`
fn permute<T: Clone>(values: Vec<T>, permutation: &[usize]) -> Vec<T> {
    permutation.iter().map(|&p| values[p].clone()).collect()
}

fn read_blobs(conn: &Connection, name: &str, rows: &[usize]) -> Result<Vec<Vec<u8>>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT value FROM {} WHERE row = ?1",
        dataset_table(name)
    ))?;
    rows.iter()
        .map(|&row| {
            stmt.query_row(params![row as i64], |r| r.get::<_, Vec<u8>>(0))
                .map_err(|e| missing_row(e, name, row))
        })
        .collect()
}

fn read_strings(conn: &Connection, name: &str, rows: &[usize]) -> Result<Vec<String>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT value FROM {} WHERE row = ?1",
        dataset_table(name)
    ))?;
    rows.iter()
        .map(|&row| {
            stmt.query_row(params![row as i64], |r| r.get::<_, String>(0))
                .map_err(|e| missing_row(e, name, row))
        })
        .collect()
}

fn write_blobs(conn: &Connection, name: &str, rows: &[usize], values: &[Vec<u8>]) -> Result<()> {
    let mut stmt = conn.prepare_cached(&format!(
        "UPDATE {} SET value = ?2 WHERE row = ?1",
        dataset_table(name)
    ))?;
    for (&row, value) in rows.iter().zip(values) {
        stmt.execute(params![row as i64, value])?;
    }
    Ok(())
}

fn write_strings(conn: &Connection, name: &str, rows: &[usize], values: &[String]) -> Result<()> {
    let mut stmt = conn.prepare_cached(&format!(
        "UPDATE {} SET value = ?2 WHERE row = ?1",
        dataset_table(name)
    ))?;
    for (&row, value) in rows.iter().zip(values) {
        stmt.execute(params![row as i64, value])?;
    }
    Ok(())
}

fn missing_row(error: rusqlite::Error, name: &str, row: usize) -> StoreError {
    match error {
        rusqlite::Error::QueryReturnedNoRows => StoreError::CorruptRow {
            dataset: name.to_string(),
            row,
        },
        other => other.into(),
    }
}
