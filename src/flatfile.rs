//! Delimited flat-file reading and writing.
//!
//! The first record of every file names its columns. Cells read from a file
//! are always [`Value::String`]; type coercion happens later, against the
//! target's column types. Short records are padded with empty strings and
//! extra trailing fields are ignored, so every row of one read carries the
//! same columns.
//!
//! Writes truncate the target and emit a header of the selected columns
//! followed by one record per row, each value rendered with `Display`.
//! With the `parallel-io` feature, large row sets are encoded on rayon into
//! per-shard buffers that are then written in shard order, so the output is
//! byte-identical to the sequential path.

use crate::config::{FlatFileConfig, Settings};
use crate::deadline::Deadline;
use crate::error::{Result, TransferError};
use crate::value::{Column, Row, TypeTag, Value};
use csv::{ReaderBuilder, StringRecord, StringRecordsIntoIter, WriterBuilder};
use log::{debug, info};
use std::fs::{File, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};

/// One delimited file, bound to a deadline.
#[derive(Debug, Clone)]
pub struct FlatFile {
    path: PathBuf,
    delimiter: u8,
    deadline: Deadline,
    #[cfg_attr(not(feature = "parallel-io"), allow(dead_code))]
    parallel_threshold: usize,
}

/// Header plus the remaining records of an open file.
struct Records {
    path: PathBuf,
    headers: Vec<String>,
    inner: StringRecordsIntoIter<File>,
}

impl Iterator for Records {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        let rec = self.inner.next()?;
        Some(
            rec.map_err(|e| TransferError::csv(&self.path, e))
                .map(|rec| to_row(&self.headers, &rec)),
        )
    }
}

fn to_row(headers: &[String], rec: &StringRecord) -> Row {
    headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h.clone(), Value::String(rec.get(i).unwrap_or_default().to_string())))
        .collect()
}

impl FlatFile {
    /// Bind `config` to a deadline.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Validation`] for an empty file name or a
    /// delimiter that is not one ASCII character.
    pub fn new(config: &FlatFileConfig, settings: &Settings, deadline: Deadline) -> Result<Self> {
        if config.file_name.trim().is_empty() {
            return Err(TransferError::Validation("file name cannot be empty".into()));
        }
        Ok(Self {
            path: PathBuf::from(&config.file_name),
            delimiter: config.delimiter_byte()?,
            deadline,
            parallel_threshold: settings.parallel_write_threshold,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check that the file exists and can be opened for reading.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::NotFound`] if the path does not exist,
    /// [`TransferError::Validation`] if it is not a regular file, and
    /// [`TransferError::File`] if it cannot be opened.
    pub fn validate(&self) -> Result<()> {
        let meta = std::fs::metadata(&self.path).map_err(|e| TransferError::file(&self.path, e))?;
        if !meta.is_file() {
            return Err(TransferError::Validation(format!(
                "{} is not a regular file",
                self.path.display()
            )));
        }
        File::open(&self.path).map_err(|e| TransferError::file(&self.path, e))?;
        Ok(())
    }

    fn open(&self) -> Result<Records> {
        self.deadline.check()?;
        let file = File::open(&self.path).map_err(|e| TransferError::file(&self.path, e))?;
        debug!("opened {} for reading", self.path.display());
        let mut rdr = ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(file);
        let mut header = StringRecord::new();
        let got = rdr
            .read_record(&mut header)
            .map_err(|e| TransferError::csv(&self.path, e))?;
        if !got {
            return Err(TransferError::Validation(format!(
                "{} has no header row",
                self.path.display()
            )));
        }
        Ok(Records {
            path: self.path.clone(),
            headers: header.iter().map(str::to_string).collect(),
            inner: rdr.into_records(),
        })
    }

    /// Column names from the first record.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened or is empty.
    pub fn headers(&self) -> Result<Vec<String>> {
        Ok(self.open()?.headers)
    }

    /// The header names as `String` columns.
    ///
    /// # Errors
    ///
    /// Same as [`headers`](Self::headers).
    pub fn schema(&self) -> Result<Vec<Column>> {
        Ok(self
            .headers()?
            .into_iter()
            .map(|h| Column::new(h, TypeTag::String))
            .collect())
    }

    /// Every data record, restricted to `selected` columns in header order.
    ///
    /// An empty selection keeps every column. Selected names that are not in
    /// the header are ignored.
    ///
    /// # Errors
    ///
    /// Fails on I/O or parse errors, or with [`TransferError::Timeout`].
    pub fn read_all(&self, selected: &[String]) -> Result<Vec<Row>> {
        let records = self.open()?;
        let keep: Vec<String> = records
            .headers
            .iter()
            .filter(|h| selected.is_empty() || selected.contains(*h))
            .cloned()
            .collect();
        let mut rows = Vec::new();
        for (i, row) in records.enumerate() {
            self.deadline.check_every(i)?;
            let row = row?;
            if keep.len() == row.len() {
                rows.push(row);
            } else {
                rows.push(
                    row.into_iter()
                        .filter(|(name, _)| keep.contains(name))
                        .collect(),
                );
            }
        }
        debug!("read {} rows from {}", rows.len(), self.path.display());
        Ok(rows)
    }

    /// At most `limit` data records with every column.
    ///
    /// # Errors
    ///
    /// Same as [`read_all`](Self::read_all).
    pub fn preview(&self, limit: usize) -> Result<Vec<Row>> {
        let mut rows = Vec::with_capacity(limit.min(1024));
        for (i, row) in self.open()?.take(limit).enumerate() {
            self.deadline.check_every(i)?;
            rows.push(row?);
        }
        Ok(rows)
    }

    /// Columns a write emits: `selected`, or the first row's columns.
    fn write_columns(rows: &[Row], selected: &[String]) -> Vec<String> {
        if selected.is_empty() {
            crate::schema::column_order(rows)
        } else {
            selected.to_vec()
        }
    }

    fn create(&self) -> Result<File> {
        self.deadline.check()?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            create_dir_all(parent).map_err(|e| TransferError::file(parent, e))?;
        }
        let file = File::create(&self.path).map_err(|e| TransferError::file(&self.path, e))?;
        debug!("opened {} for writing", self.path.display());
        Ok(file)
    }

    /// Encode `rows` into `out`, numbering them from `offset` for deadline
    /// checks. `header` is written first when given.
    fn encode<W: Write>(
        &self,
        out: W,
        header: Option<&[String]>,
        columns: &[String],
        rows: &[Row],
        offset: usize,
    ) -> Result<()> {
        let mut wtr = WriterBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(false)
            .from_writer(out);
        if let Some(header) = header
            && !header.is_empty()
        {
            wtr.write_record(header)
                .map_err(|e| TransferError::csv(&self.path, e))?;
        }
        let mut record = Vec::with_capacity(columns.len());
        for (i, row) in rows.iter().enumerate() {
            self.deadline.check_every(offset + i)?;
            record.clear();
            record.extend(
                columns
                    .iter()
                    .map(|c| row.get(c).map(ToString::to_string).unwrap_or_default()),
            );
            if !record.is_empty() {
                wtr.write_record(&record)
                    .map_err(|e| TransferError::csv(&self.path, e))?;
            }
        }
        wtr.flush().map_err(|e| TransferError::file(&self.path, e))?;
        Ok(())
    }

    /// Write `rows` restricted to `selected` (or the first row's columns),
    /// truncating the file. Returns the number of data records written,
    /// which is zero when there are no columns to write.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors or with [`TransferError::Timeout`].
    pub fn write(&self, rows: &[Row], selected: &[String]) -> Result<usize> {
        #[cfg(feature = "parallel-io")]
        if rows.len() > self.parallel_threshold {
            return self.write_par(rows, selected, None);
        }
        let columns = Self::write_columns(rows, selected);
        let file = self.create()?;
        self.encode(file, Some(columns.as_slice()), &columns, rows, 0)?;
        let written = if columns.is_empty() { 0 } else { rows.len() };
        info!("wrote {written} rows to {}", self.path.display());
        Ok(written)
    }

    /// [`write`](Self::write) with records encoded in parallel.
    ///
    /// `shards` defaults to twice the CPU count and is clamped to
    /// `[1, rows.len()]`. Shard buffers are written in index order.
    ///
    /// # Errors
    ///
    /// Same as [`write`](Self::write).
    #[cfg(feature = "parallel-io")]
    pub fn write_par(&self, rows: &[Row], selected: &[String], shards: Option<usize>) -> Result<usize> {
        use rayon::iter::{IntoParallelIterator, ParallelIterator};

        let columns = Self::write_columns(rows, selected);
        let mut file = self.create()?;
        self.encode(&mut file, Some(columns.as_slice()), &columns, &[], 0)?;
        if rows.is_empty() || columns.is_empty() {
            return Ok(0);
        }

        let shard_count = shards
            .unwrap_or_else(|| 2 * num_cpus::get().max(2))
            .clamp(1, rows.len());
        let mut buffers = split_ranges(rows.len(), shard_count)
            .into_par_iter()
            .map(|(idx, start, end)| {
                let mut buf = Vec::with_capacity((end - start).saturating_mul(64));
                self.encode(&mut buf, None, &columns, &rows[start..end], start)?;
                Ok::<_, TransferError>((idx, buf))
            })
            .collect::<Result<Vec<(usize, Vec<u8>)>>>()?;
        buffers.sort_by_key(|(idx, _)| *idx);

        for (_, buf) in buffers {
            file.write_all(&buf)
                .map_err(|e| TransferError::file(&self.path, e))?;
        }
        file.flush().map_err(|e| TransferError::file(&self.path, e))?;
        info!(
            "wrote {} rows to {} in {shard_count} shards",
            rows.len(),
            self.path.display()
        );
        Ok(rows.len())
    }
}

/// Split `[0, len)` into `parts` contiguous ranges as `(shard, start, end)`.
///
/// The remainder goes to the leading shards, one row each.
#[cfg(feature = "parallel-io")]
fn split_ranges(len: usize, parts: usize) -> Vec<(usize, usize, usize)> {
    let parts = parts.clamp(1, len.max(1));
    let base = len / parts;
    let rem = len % parts;

    let mut out = Vec::with_capacity(parts);
    let mut start = 0usize;
    for idx in 0..parts {
        let end = start + base + usize::from(idx < rem);
        if start < end {
            out.push((idx, start, end));
        }
        start = end;
    }
    out
}
