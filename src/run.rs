//! The RUN phase: route and execute a batch of queries, one result CSV per
//! query.
//!
//! Queries are isolated from each other: a malformed or unfit query logs an
//! error and writes no result file, but the rest of the batch continues.
//! The batch as a whole fails only when the published artifacts are missing
//! or incomplete.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use arrow::record_batch::RecordBatch;
use serde_json::Value;

use adcube_executor::{execute_rollup, FallbackExecutor};
use adcube_expr::parse_query;
use adcube_plan::{QueryPlan, QueryRouter};
use adcube_result::{Error, Result};
use adcube_store::RollupLoader;

/// Inputs to the RUN phase.
#[derive(Debug)]
pub struct RunOptions {
    pub query_file: Option<PathBuf>,
    pub query_dir: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub rollup_dir: PathBuf,
    pub fallback_path: PathBuf,
}

/// Outcome of one query in the batch.
#[derive(Debug)]
pub struct QueryOutcome {
    pub index: usize,
    pub source: String,
    pub rows: usize,
    pub millis: f64,
    pub error: Option<String>,
}

/// Outcome of the whole batch.
#[derive(Debug)]
pub struct RunReport {
    pub outcomes: Vec<QueryOutcome>,
}

impl RunReport {
    pub fn any_failed(&self) -> bool {
        self.outcomes.iter().any(|outcome| outcome.error.is_some())
    }
}

/// Execute every query and write `q<N>.csv` result files.
pub fn run_queries(options: &RunOptions) -> Result<RunReport> {
    let documents = load_query_documents(options)?;
    if documents.is_empty() {
        return Err(Error::QueryMalformed("no queries to run".into()));
    }
    tracing::info!(queries = documents.len(), "loaded query batch");

    // Artifact problems are fatal before any query runs.
    let loader = RollupLoader::open(&options.rollup_dir)?;
    for cube in loader.residency() {
        match cube.rows {
            Some(rows) => tracing::debug!(cube = cube.id, rows, "cube resident"),
            None => tracing::debug!(cube = cube.id, "cube on disk"),
        }
    }
    let fallback = FallbackExecutor::open(&options.fallback_path)?;
    let router = QueryRouter::new();
    std::fs::create_dir_all(&options.output_dir)?;

    let mut outcomes = Vec::with_capacity(documents.len());
    for (position, document) in documents.iter().enumerate() {
        let index = position + 1;
        let started = Instant::now();
        match execute_one(&router, &loader, &fallback, document) {
            Ok((source, result)) => {
                let path = options.output_dir.join(format!("q{index}.csv"));
                match write_result_csv(&path, &result) {
                    Ok(()) => {
                        let millis = started.elapsed().as_secs_f64() * 1e3;
                        tracing::info!(
                            query = index,
                            source = %source,
                            rows = result.num_rows(),
                            millis = format!("{millis:.3}"),
                            "query complete"
                        );
                        outcomes.push(QueryOutcome {
                            index,
                            source,
                            rows: result.num_rows(),
                            millis,
                            error: None,
                        });
                    }
                    Err(err) => {
                        // No partial result file survives a write failure.
                        let _ = std::fs::remove_file(&path);
                        outcomes.push(failed(index, started, err));
                    }
                }
            }
            Err(err) if err.is_run_fatal() => return Err(err),
            Err(err) => outcomes.push(failed(index, started, err)),
        }
    }

    Ok(RunReport { outcomes })
}

fn failed(index: usize, started: Instant, err: Error) -> QueryOutcome {
    tracing::error!(query = index, error = %err, "query failed");
    QueryOutcome {
        index,
        source: "none".into(),
        rows: 0,
        millis: started.elapsed().as_secs_f64() * 1e3,
        error: Some(err.to_string()),
    }
}

fn execute_one(
    router: &QueryRouter,
    loader: &RollupLoader,
    fallback: &FallbackExecutor,
    document: &Value,
) -> Result<(String, RecordBatch)> {
    let query = parse_query(document)?;
    let routed = router.route(&query)?;
    let source = routed.plan.source_label().to_string();
    let result = match &routed.plan {
        QueryPlan::Rollup(plan) => {
            let table = loader.get(plan.cube)?;
            execute_rollup(plan, &routed.query, &table)?
        }
        QueryPlan::Fallback(_) => fallback.execute(&routed.query)?,
    };
    Ok((source, result))
}

/// Collect raw query documents, keeping per-query JSON errors isolated to
/// the query that carries them (a malformed batch container is fatal).
fn load_query_documents(options: &RunOptions) -> Result<Vec<Value>> {
    let mut documents = Vec::new();

    if let Some(query_file) = &options.query_file {
        let text = std::fs::read_to_string(query_file)?;
        let value: Value = serde_json::from_str(&text).map_err(|err| {
            Error::QueryMalformed(format!(
                "query file '{}' is not valid JSON: {err}",
                query_file.display()
            ))
        })?;
        match value {
            Value::Array(items) => documents.extend(items),
            Value::Object(mut map) => match map.remove("queries") {
                Some(Value::Array(items)) => documents.extend(items),
                _ => {
                    return Err(Error::QueryMalformed(format!(
                        "query file '{}' must hold an array of queries",
                        query_file.display()
                    )));
                }
            },
            _ => {
                return Err(Error::QueryMalformed(format!(
                    "query file '{}' must hold an array of queries",
                    query_file.display()
                )));
            }
        }
    }

    if let Some(query_dir) = &options.query_dir {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(query_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .is_some_and(|ext| ext == std::ffi::OsStr::new("json"))
                    && path
                        .file_name()
                        .and_then(|name| name.to_str())
                        .is_some_and(|name| name.starts_with('q'))
            })
            .collect();
        paths.sort();
        for path in paths {
            let text = std::fs::read_to_string(&path)?;
            let value: Value = serde_json::from_str(&text).map_err(|err| {
                Error::QueryMalformed(format!(
                    "query file '{}' is not valid JSON: {err}",
                    path.display()
                ))
            })?;
            documents.push(value);
        }
    }

    Ok(documents)
}

/// Serialize one result table as CSV: header row always, NULLs as empty
/// fields.
fn write_result_csv(path: &Path, result: &RecordBatch) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = arrow::csv::WriterBuilder::new()
        .with_header(true)
        .build(BufWriter::new(file));
    writer.write(result)?;
    writer.into_inner().flush()?;
    Ok(())
}
