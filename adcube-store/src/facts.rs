//! The sorted fact store.
//!
//! A complete copy of the events plus their derived time dimensions,
//! persisted as one Parquet file physically ordered by (week, country,
//! type). No secondary indexes; the physical sort is the only access
//! structure, and the fallback executor simply streams the file.
//!
//! The writer cannot hold 245M rows for a global sort, so it buckets the
//! stream by ISO week into scratch Parquet files, then sorts each bucket by
//! (country, type) and appends the buckets in week order. Week buckets are
//! the natural unit: ~50 of them over a year of data, each small enough to
//! sort in memory.

use std::fs::File;
use std::path::{Path, PathBuf};

use arrow::array::BooleanArray;
use arrow::compute::{concat_batches, filter_record_batch, lexsort_to_indices, take, SortColumn};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use rustc_hash::FxHashMap;

use adcube_events::{fact_schema, Dimension, EventBatch};
use adcube_result::{Error, Result};

/// File name of the published fact store inside the fallback directory.
pub const FACT_FILE_NAME: &str = "events.parquet";

const SCAN_BATCH_SIZE: usize = 65_536;

fn writer_properties() -> WriterProperties {
    WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .set_max_row_group_size(1_048_576)
        .build()
}

/// Streams event batches into per-week scratch buckets, then merges them
/// into the single sorted fact file.
pub struct FactStoreWriter {
    bucket_dir: PathBuf,
    buckets: FxHashMap<u64, ArrowWriter<File>>,
    rows: u64,
}

impl FactStoreWriter {
    /// `bucket_dir` must be a scratch directory that lives until
    /// [`FactStoreWriter::finish`] returns.
    pub fn new(bucket_dir: impl Into<PathBuf>) -> Self {
        Self {
            bucket_dir: bucket_dir.into(),
            buckets: FxHashMap::default(),
            rows: 0,
        }
    }

    /// Append one event batch, splitting its rows across week buckets.
    pub fn append(&mut self, batch: &EventBatch) -> Result<()> {
        let facts = batch.to_fact_batch()?;
        let weeks = batch.codes(Dimension::Week);

        let mut distinct: Vec<u64> = weeks.to_vec();
        distinct.sort_unstable();
        distinct.dedup();

        for week in distinct {
            let mask: BooleanArray = weeks.iter().map(|w| Some(*w == week)).collect();
            let slice = filter_record_batch(&facts, &mask)?;
            self.bucket_writer(week)?.write(&slice)?;
        }
        self.rows += facts.num_rows() as u64;
        Ok(())
    }

    pub fn rows_written(&self) -> u64 {
        self.rows
    }

    fn bucket_writer(&mut self, week: u64) -> Result<&mut ArrowWriter<File>> {
        if !self.buckets.contains_key(&week) {
            let path = self.bucket_dir.join(format!("week_{week}.parquet"));
            let file = File::create(&path)?;
            let writer = ArrowWriter::try_new(file, fact_schema(), Some(writer_properties()))?;
            self.buckets.insert(week, writer);
        }
        Ok(self.buckets.get_mut(&week).expect("inserted above"))
    }

    /// Close the buckets and merge them, week-ascending, into the final
    /// sorted file at `path`.
    pub fn finish(self, path: &Path) -> Result<u64> {
        let mut weeks: Vec<u64> = self.buckets.keys().copied().collect();
        weeks.sort_unstable();

        for (_, writer) in self.buckets {
            writer.close()?;
        }

        let schema = fact_schema();
        let file = File::create(path)?;
        let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(writer_properties()))?;

        for week in &weeks {
            let bucket_path = self.bucket_dir.join(format!("week_{week}.parquet"));
            let batches = open_fact_reader(&bucket_path, SCAN_BATCH_SIZE)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            if batches.is_empty() {
                continue;
            }
            let bucket = concat_batches(&schema, &batches)?;
            writer.write(&sort_bucket(&bucket)?)?;
            std::fs::remove_file(&bucket_path)?;
        }
        writer.close()?;

        tracing::info!(
            rows = self.rows,
            weeks = weeks.len(),
            file = %path.display(),
            "wrote sorted fact store"
        );
        Ok(self.rows)
    }
}

/// Sort one week bucket by (country, type). The bucket holds a single week,
/// so the concatenation of sorted buckets is globally ordered by
/// (week, country, type).
fn sort_bucket(bucket: &RecordBatch) -> Result<RecordBatch> {
    let country = bucket
        .column_by_name("country")
        .ok_or_else(|| Error::Internal("fact bucket is missing 'country'".into()))?;
    let ty = bucket
        .column_by_name("type")
        .ok_or_else(|| Error::Internal("fact bucket is missing 'type'".into()))?;

    let indices = lexsort_to_indices(
        &[
            SortColumn {
                values: country.clone(),
                options: None,
            },
            SortColumn {
                values: ty.clone(),
                options: None,
            },
        ],
        None,
    )?;

    let columns = bucket
        .columns()
        .iter()
        .map(|column| take(column, &indices, None).map_err(Error::from))
        .collect::<Result<Vec<_>>>()?;
    RecordBatch::try_new(bucket.schema(), columns).map_err(Error::from)
}

fn open_fact_reader(path: &Path, batch_size: usize) -> Result<ParquetRecordBatchReader> {
    let file = File::open(path)?;
    Ok(ParquetRecordBatchReaderBuilder::try_new(file)?
        .with_batch_size(batch_size)
        .build()?)
}

/// Read-only handle to the published fact store.
pub struct FactStoreReader {
    path: PathBuf,
}

impl FactStoreReader {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.is_file() {
            return Err(Error::CatalogAbsent(format!(
                "fact store '{}' does not exist; run prepare first",
                path.display()
            )));
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stream the fact table in physical order.
    pub fn scan(&self) -> Result<impl Iterator<Item = Result<RecordBatch>>> {
        let reader = open_fact_reader(&self.path, SCAN_BATCH_SIZE)?;
        Ok(reader.map(|batch| batch.map_err(Error::from)))
    }
}
