//! Runtime cube loading.
//!
//! Small cubes are read into memory when the loader opens and stay resident
//! for the life of the process. Large cubes are memory-mapped and decoded on
//! first demand; the decoded table is cached so every caller sees the same
//! bits. The cache insert path is the only synchronized region.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use arrow::record_batch::RecordBatch;
use memmap2::Mmap;
use rustc_hash::FxHashMap;

use adcube_catalog::{CubeSpec, SizeClass, CATALOG};
use adcube_result::{Error, Result};

use crate::ipc::{read_cube_bytes, read_cube_file};

/// Residency snapshot for one cube, for startup logging.
#[derive(Debug, Clone)]
pub struct CubeResidency {
    pub id: &'static str,
    pub rows: Option<usize>,
    pub resident: bool,
}

/// Loads and caches published cubes. Never mutates a cube in place; cached
/// tables are shared read-only.
pub struct RollupLoader {
    dir: PathBuf,
    cache: RwLock<FxHashMap<&'static str, Arc<RecordBatch>>>,
}

impl RollupLoader {
    /// Open a published rollup directory.
    ///
    /// Every catalog cube must be present; an incomplete directory is fatal
    /// before any query is served. Small cubes are loaded eagerly.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(Error::CatalogAbsent(format!(
                "rollup directory '{}' does not exist; run prepare first",
                dir.display()
            )));
        }
        for spec in CATALOG {
            if !dir.join(spec.file_name()).is_file() {
                return Err(Error::CatalogAbsent(format!(
                    "rollup directory '{}' is missing cube '{}'",
                    dir.display(),
                    spec.id
                )));
            }
        }

        let loader = Self {
            dir,
            cache: RwLock::new(FxHashMap::default()),
        };

        let mut preloaded = 0usize;
        for spec in CATALOG {
            if spec.size_class() == SizeClass::Small {
                loader.load_into_cache(spec)?;
                preloaded += 1;
            }
        }
        tracing::info!(
            dir = %loader.dir.display(),
            cubes = CATALOG.len(),
            preloaded,
            "rollup loader ready"
        );
        Ok(loader)
    }

    /// Fetch a cube table, loading it on first access.
    pub fn get(&self, spec: &'static CubeSpec) -> Result<Arc<RecordBatch>> {
        if let Some(table) = self
            .cache
            .read()
            .map_err(|_| Error::Internal("rollup cache lock poisoned".into()))?
            .get(spec.id)
        {
            return Ok(Arc::clone(table));
        }
        self.load_into_cache(spec)
    }

    /// Residency summary in catalog order.
    pub fn residency(&self) -> Vec<CubeResidency> {
        let cache = self.cache.read().ok();
        CATALOG
            .iter()
            .map(|spec| {
                let rows = cache
                    .as_ref()
                    .and_then(|cache| cache.get(spec.id).map(|table| table.num_rows()));
                CubeResidency {
                    id: spec.id,
                    rows,
                    resident: rows.is_some(),
                }
            })
            .collect()
    }

    fn load_into_cache(&self, spec: &'static CubeSpec) -> Result<Arc<RecordBatch>> {
        let path = self.dir.join(spec.file_name());
        let table = Arc::new(match spec.size_class() {
            SizeClass::Small => read_cube_file(&path)?,
            SizeClass::Large => read_mapped_cube(&path)?,
        });
        verify_schema(spec, &table)?;

        let mut cache = self
            .cache
            .write()
            .map_err(|_| Error::Internal("rollup cache lock poisoned".into()))?;
        // Two callers can race to load the same cube; the first insert wins
        // so all readers share one table.
        let entry = cache.entry(spec.id).or_insert_with(|| Arc::clone(&table));
        Ok(Arc::clone(entry))
    }
}

/// Decode a large cube from a memory-mapped file.
fn read_mapped_cube(path: &Path) -> Result<RecordBatch> {
    let file = File::open(path)?;
    // SAFETY: cube files are written once during PREPARE and never modified
    // afterwards; the mapping is read-only.
    let mmap = unsafe { Mmap::map(&file)? };
    tracing::debug!(file = %path.display(), bytes = mmap.len(), "mapped large cube");
    read_cube_bytes(&mmap)
}

fn verify_schema(spec: &CubeSpec, table: &RecordBatch) -> Result<()> {
    let expected = spec.schema();
    if table.schema().as_ref() != expected.as_ref() {
        return Err(Error::CatalogAbsent(format!(
            "cube '{}' has an unexpected schema; rebuild the rollup directory",
            spec.id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::write_cube_file;
    use adcube_events::{EventScanOptions, EventScanner, EVENT_COLUMNS};
    use adcube_rollup::RollupBuilder;
    use std::io::Write;

    fn build_rollup_dir(dir: &Path) {
        let data_dir = dir.join("data");
        std::fs::create_dir(&data_dir).unwrap();
        let mut file = File::create(data_dir.join("events_0.csv")).unwrap();
        writeln!(file, "{}", EVENT_COLUMNS.join(",")).unwrap();
        writeln!(file, "1717200000000,impression,a-1,1,10,1.0,42,,US").unwrap();
        writeln!(file, "1717286400000,purchase,a-2,2,11,,43,9.0,JP").unwrap();
        drop(file);

        let mut builder = RollupBuilder::new();
        let scanner = EventScanner::new(&data_dir, EventScanOptions::default()).unwrap();
        for batch in scanner.scan() {
            builder.ingest(&batch.unwrap()).unwrap();
        }

        let out = dir.join("rollups");
        std::fs::create_dir(&out).unwrap();
        for (spec, table) in builder.finish().unwrap() {
            write_cube_file(&out.join(spec.file_name()), &table).unwrap();
        }
    }

    #[test]
    fn loader_preloads_small_cubes_and_maps_large_ones() {
        let dir = tempfile::TempDir::new().unwrap();
        build_rollup_dir(dir.path());

        let loader = RollupLoader::open(dir.path().join("rollups")).unwrap();

        let residency = loader.residency();
        let minute = residency.iter().find(|r| r.id == "minute_type").unwrap();
        assert!(!minute.resident, "large cubes load lazily");
        let country = residency.iter().find(|r| r.id == "country_type").unwrap();
        assert!(country.resident, "small cubes preload");

        let spec = adcube_catalog::cube("minute_type").unwrap();
        let first = loader.get(spec).unwrap();
        let second = loader.get(spec).unwrap();
        assert!(Arc::ptr_eq(&first, &second), "all callers share one table");
        assert_eq!(first.num_rows(), 2);
    }

    #[test]
    fn missing_cube_is_catalog_absent() {
        let dir = tempfile::TempDir::new().unwrap();
        build_rollup_dir(dir.path());
        let rollups = dir.path().join("rollups");
        std::fs::remove_file(rollups.join("day_type.arrow")).unwrap();

        assert!(matches!(
            RollupLoader::open(&rollups),
            Err(Error::CatalogAbsent(msg)) if msg.contains("day_type")
        ));
    }

    #[test]
    fn missing_directory_is_catalog_absent() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(matches!(
            RollupLoader::open(dir.path().join("nope")),
            Err(Error::CatalogAbsent(_))
        ));
    }
}
