//! On-disk artifacts: cube files, the rollup loader, and the sorted fact
//! store.
//!
//! Cubes are Arrow IPC files with LZ4 block compression; the fact store is a
//! single Parquet file physically ordered by (week, country, type). Both are
//! written to staging paths and renamed into place only once every artifact
//! of a PREPARE run has succeeded, so a failed run never publishes anything.

mod facts;
mod ipc;
mod loader;
mod publish;

pub use facts::{FactStoreReader, FactStoreWriter, FACT_FILE_NAME};
pub use ipc::{read_cube_bytes, read_cube_file, write_cube_file};
pub use loader::{CubeResidency, RollupLoader};
pub use publish::AtomicOutputDir;
