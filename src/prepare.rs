//! The PREPARE phase: one pass over the CSV corpus producing every cube and
//! the sorted fact store, published atomically.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;

use adcube_events::{EventBatch, EventScanOptions, EventScanner};
use adcube_result::{Error, Result};
use adcube_rollup::RollupBuilder;
use adcube_store::{write_cube_file, AtomicOutputDir, FactStoreWriter, FACT_FILE_NAME};

/// Decoded batches buffered between the CSV reader thread and the
/// aggregation loop. Small on purpose: each batch holds ~10^6 rows.
const PIPELINE_DEPTH: usize = 2;

/// Timings and counters reported after a successful PREPARE.
#[derive(Debug)]
pub struct PrepareSummary {
    pub rows: u64,
    pub cubes: usize,
    pub scan_secs: f64,
    pub publish_secs: f64,
}

/// Run the PREPARE phase.
///
/// Nothing is visible under `output_dir` or `fallback_dir` unless the whole
/// phase succeeds; artifacts are staged and renamed into place at the end.
pub fn run_prepare(
    data_dir: &Path,
    output_dir: &Path,
    fallback_dir: &Path,
) -> Result<PrepareSummary> {
    let started = Instant::now();

    let scanner = EventScanner::new(data_dir, EventScanOptions::default())?;
    let mut rollup_out = AtomicOutputDir::open(output_dir)?;
    let mut fallback_out = AtomicOutputDir::open(fallback_dir)?;

    let mut builder = RollupBuilder::new();
    let mut facts = FactStoreWriter::new(fallback_out.scratch_dir("buckets")?);

    // One reader thread decodes CSV batches ahead of the aggregation loop;
    // the bounded channel caps how many decoded batches exist at once.
    let (sender, receiver) = crossbeam_channel::bounded::<Result<EventBatch>>(PIPELINE_DEPTH);
    let stream = scanner.scan();
    let reader = thread::spawn(move || {
        for item in stream {
            if sender.send(item).is_err() {
                // Consumer hit an error and hung up; stop decoding.
                break;
            }
        }
    });

    let mut consumed: Result<()> = Ok(());
    for item in &receiver {
        let step = item.and_then(|batch| {
            builder.ingest(&batch)?;
            facts.append(&batch)
        });
        if step.is_err() {
            consumed = step;
            break;
        }
    }
    // Disconnect so the reader can exit before we surface any error.
    drop(receiver);
    reader
        .join()
        .map_err(|_| Error::Internal("CSV reader thread panicked".into()))?;
    consumed?;

    let scan_secs = started.elapsed().as_secs_f64();
    let rows = builder.rows_seen();
    tracing::info!(rows, secs = format!("{scan_secs:.1}"), "single-pass scan complete");

    let publish_started = Instant::now();
    let cubes = builder.finish()?;
    let cube_count = cubes.len();
    for (spec, table) in &cubes {
        write_cube_file(&rollup_out.stage(&spec.file_name()), table)?;
    }
    facts.finish(&fallback_out.stage(FACT_FILE_NAME))?;

    // The fact store commits first: a failure between the two commits must
    // not leave cube files published without their build completing.
    fallback_out.commit()?;
    rollup_out.commit()?;
    let publish_secs = publish_started.elapsed().as_secs_f64();

    tracing::info!(
        cubes = cube_count,
        secs = format!("{publish_secs:.1}"),
        "published rollups and fact store"
    );

    Ok(PrepareSummary {
        rows,
        cubes: cube_count,
        scan_secs,
        publish_secs,
    })
}

/// Default rollup directory for both phases.
pub fn default_rollup_dir() -> PathBuf {
    PathBuf::from("rollups")
}

/// Default fallback directory for both phases.
pub fn default_fallback_dir() -> PathBuf {
    PathBuf::from("fallback")
}
