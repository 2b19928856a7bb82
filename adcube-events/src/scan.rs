//! Streaming CSV row source.
//!
//! [`EventScanner`] walks a directory of CSV files and yields
//! [`EventBatch`]es: the raw Arrow columns plus dense per-row codes for every
//! groupable dimension. The stream is lazy, finite, and intended to be
//! consumed exactly once per PREPARE; row order is not semantically
//! significant.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    ArrayRef, Float64Array, Int32Array, Int64Array, Int64Builder, StringArray, StringBuilder,
};
use arrow::csv::ReaderBuilder;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

use adcube_result::{Error, Result};

use crate::schema::{event_schema, fact_schema, EVENT_COLUMNS};
use crate::time_dim;
use crate::types::{country_code, Dimension, EventType};

/// Tunables for the CSV scan.
#[derive(Debug, Clone)]
pub struct EventScanOptions {
    /// Rows per decoded batch. The builder's fold cadence is counted in
    /// these batches.
    pub batch_size: usize,
}

impl Default for EventScanOptions {
    fn default() -> Self {
        Self {
            batch_size: 1_000_000,
        }
    }
}

impl EventScanOptions {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// Scanner over a directory of event CSV files.
pub struct EventScanner {
    files: Vec<PathBuf>,
    options: EventScanOptions,
}

impl EventScanner {
    pub fn new(data_dir: impl AsRef<Path>, options: EventScanOptions) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        let mut files: Vec<PathBuf> = std::fs::read_dir(data_dir)
            .map_err(|err| {
                Error::InputFormat(format!(
                    "cannot read data directory '{}': {err}",
                    data_dir.display()
                ))
            })?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .is_some_and(|ext| ext == std::ffi::OsStr::new("csv"))
            })
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(Error::InputFormat(format!(
                "no CSV files found in '{}'",
                data_dir.display()
            )));
        }

        tracing::info!(
            files = files.len(),
            dir = %data_dir.display(),
            "discovered event CSV files"
        );
        Ok(Self { files, options })
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Begin a single pass over the corpus.
    pub fn scan(&self) -> EventStream {
        EventStream {
            pending: self.files.iter().cloned().collect(),
            schema: event_schema(),
            batch_size: self.options.batch_size,
            current: None,
        }
    }
}

/// Lazy, single-consumption sequence of [`EventBatch`]es.
pub struct EventStream {
    pending: VecDeque<PathBuf>,
    schema: SchemaRef,
    batch_size: usize,
    current: Option<arrow::csv::Reader<File>>,
}

impl EventStream {
    fn open_next(&mut self) -> Result<bool> {
        let Some(path) = self.pending.pop_front() else {
            return Ok(false);
        };
        validate_header(&path)?;
        let file = File::open(&path)?;
        let reader = ReaderBuilder::new(Arc::clone(&self.schema))
            .with_header(true)
            .with_batch_size(self.batch_size)
            .build(file)?;
        tracing::debug!(file = %path.display(), "reading event CSV");
        self.current = Some(reader);
        Ok(true)
    }
}

impl Iterator for EventStream {
    type Item = Result<EventBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(reader) = self.current.as_mut() {
                match reader.next() {
                    Some(Ok(batch)) => {
                        if batch.num_rows() == 0 {
                            continue;
                        }
                        return Some(EventBatch::from_raw(batch));
                    }
                    Some(Err(err)) => {
                        self.current = None;
                        return Some(Err(Error::InputFormat(format!(
                            "failed to decode CSV batch: {err}"
                        ))));
                    }
                    None => self.current = None,
                }
            }
            match self.open_next() {
                Ok(true) => continue,
                Ok(false) => return None,
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

/// The header row must name exactly the nine event columns.
fn validate_header(path: &Path) -> Result<()> {
    let file = File::open(path)?;
    let mut header = String::new();
    BufReader::new(file).read_line(&mut header)?;
    let names: Vec<&str> = header.trim_end().split(',').map(str::trim).collect();
    if names != EVENT_COLUMNS {
        return Err(Error::InputFormat(format!(
            "'{}' has unexpected header {:?}; expected {:?}",
            path.display(),
            names,
            EVENT_COLUMNS
        )));
    }
    Ok(())
}

/// One decoded batch of events: the raw columns plus a dense code per row for
/// each groupable dimension.
#[derive(Debug)]
pub struct EventBatch {
    batch: RecordBatch,
    codes: Vec<Vec<u64>>,
}

impl EventBatch {
    /// Compute the derived dimensions for a raw nine-column batch.
    pub fn from_raw(batch: RecordBatch) -> Result<Self> {
        let rows = batch.num_rows();

        let ts = downcast::<Int64Array>(&batch, 0, "ts")?;
        let types = downcast::<StringArray>(&batch, 1, "type")?;
        let advertisers = downcast::<Int32Array>(&batch, 3, "advertiser_id")?;
        let publishers = downcast::<Int32Array>(&batch, 4, "publisher_id")?;
        let countries = downcast::<StringArray>(&batch, 8, "country")?;

        let mut codes: Vec<Vec<u64>> = Dimension::ALL
            .iter()
            .map(|_| Vec::with_capacity(rows))
            .collect();

        // Rows are roughly time-ordered, so one-entry memoization covers the
        // day -> ISO week conversion for almost every row.
        let mut week_memo: Option<(i64, i64)> = None;

        for row in 0..rows {
            let ts_ms = ts.value(row);
            if ts_ms < 0 {
                // Dimension codes are unsigned; pre-epoch timestamps cannot
                // occur in this corpus and would corrupt key packing.
                return Err(Error::InputFormat(format!(
                    "negative timestamp {ts_ms} at row {row}"
                )));
            }
            let day = time_dim::day_code(ts_ms);
            let week = match week_memo {
                Some((memo_day, memo_week)) if memo_day == day => memo_week,
                _ => {
                    let week = time_dim::week_code(day)?;
                    week_memo = Some((day, week));
                    week
                }
            };

            codes[Dimension::Day.index()].push(day as u64);
            codes[Dimension::Hour.index()].push(time_dim::hour_of_day(ts_ms) as u64);
            codes[Dimension::Minute.index()].push(time_dim::minute_code(ts_ms) as u64);
            codes[Dimension::Week.index()].push(week as u64);
            codes[Dimension::Country.index()].push(country_code(countries.value(row))?);
            codes[Dimension::Type.index()].push(EventType::parse(types.value(row))? as u64);

            let advertiser = advertisers.value(row);
            let publisher = publishers.value(row);
            if advertiser < 0 || publisher < 0 {
                return Err(Error::InputFormat(format!(
                    "negative advertiser/publisher id at row {row}"
                )));
            }
            codes[Dimension::AdvertiserId.index()].push(advertiser as u64);
            codes[Dimension::PublisherId.index()].push(publisher as u64);
        }

        Ok(Self { batch, codes })
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn raw(&self) -> &RecordBatch {
        &self.batch
    }

    /// Per-row dense codes for one dimension.
    pub fn codes(&self, dim: Dimension) -> &[u64] {
        &self.codes[dim.index()]
    }

    pub fn bid_price(&self) -> Result<&Float64Array> {
        downcast::<Float64Array>(&self.batch, 5, "bid_price")
    }

    pub fn total_price(&self) -> Result<&Float64Array> {
        downcast::<Float64Array>(&self.batch, 7, "total_price")
    }

    /// Extend the raw batch with the rendered time dimensions, producing a
    /// row of the sorted fact store.
    pub fn to_fact_batch(&self) -> Result<RecordBatch> {
        let rows = self.num_rows();
        let mut day_builder = StringBuilder::with_capacity(rows, rows * 10);
        let mut hour_builder = Int64Builder::with_capacity(rows);
        let mut minute_builder = StringBuilder::with_capacity(rows, rows * 16);
        let mut week_builder = StringBuilder::with_capacity(rows, rows * 8);

        let mut day_memo: Option<(u64, String)> = None;
        let mut week_memo: Option<(u64, String)> = None;
        let mut minute_memo: Option<(u64, String)> = None;

        for row in 0..rows {
            let day = self.codes[Dimension::Day.index()][row];
            let week = self.codes[Dimension::Week.index()][row];
            let minute = self.codes[Dimension::Minute.index()][row];

            if day_memo.as_ref().is_none_or(|(code, _)| *code != day) {
                day_memo = Some((day, time_dim::format_day(day as i64)?));
            }
            if week_memo.as_ref().is_none_or(|(code, _)| *code != week) {
                week_memo = Some((week, time_dim::format_week(week as i64)));
            }
            if minute_memo.as_ref().is_none_or(|(code, _)| *code != minute) {
                minute_memo = Some((minute, time_dim::format_minute(minute as i64)?));
            }

            day_builder.append_value(&day_memo.as_ref().expect("set above").1);
            week_builder.append_value(&week_memo.as_ref().expect("set above").1);
            minute_builder.append_value(&minute_memo.as_ref().expect("set above").1);
            hour_builder.append_value(self.codes[Dimension::Hour.index()][row] as i64);
        }

        let mut columns: Vec<ArrayRef> = self.batch.columns().to_vec();
        columns.push(Arc::new(day_builder.finish()));
        columns.push(Arc::new(hour_builder.finish()));
        columns.push(Arc::new(minute_builder.finish()));
        columns.push(Arc::new(week_builder.finish()));

        RecordBatch::try_new(fact_schema(), columns).map_err(Error::from)
    }
}

fn downcast<'a, T: 'static>(batch: &'a RecordBatch, index: usize, name: &str) -> Result<&'a T> {
    batch
        .column(index)
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| Error::Internal(format!("column '{name}' has an unexpected type")))
}
