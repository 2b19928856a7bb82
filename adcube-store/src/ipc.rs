//! Arrow IPC cube files with LZ4 block compression.
//!
//! The byte-level contract: any reader of the standard Arrow IPC file format
//! with LZ4 frame compression can open a cube and recover its declared
//! schema.

use std::fs::File;
use std::io::{BufWriter, Cursor, Write};
use std::path::Path;

use arrow::compute::concat_batches;
use arrow::ipc::reader::FileReader;
use arrow::ipc::writer::{FileWriter, IpcWriteOptions};
use arrow::ipc::CompressionType;
use arrow::record_batch::RecordBatch;

use adcube_result::{Error, Result};

/// Write one cube table to `path` as an LZ4-compressed Arrow IPC file.
pub fn write_cube_file(path: &Path, table: &RecordBatch) -> Result<()> {
    let file = File::create(path)?;
    let options =
        IpcWriteOptions::default().try_with_compression(Some(CompressionType::LZ4_FRAME))?;
    let schema = table.schema();
    let mut writer =
        FileWriter::try_new_with_options(BufWriter::new(file), schema.as_ref(), options)?;
    writer.write(table)?;
    writer.finish()?;
    let mut inner = writer.into_inner()?;
    inner.flush()?;
    Ok(())
}

/// Read a cube file into a single table.
pub fn read_cube_file(path: &Path) -> Result<RecordBatch> {
    let file = File::open(path)?;
    read_cube(FileReader::try_new(file, None)?)
}

/// Read a cube from raw IPC bytes (e.g. a memory-mapped file).
pub fn read_cube_bytes(bytes: &[u8]) -> Result<RecordBatch> {
    read_cube(FileReader::try_new(Cursor::new(bytes), None)?)
}

fn read_cube<R: std::io::Read + std::io::Seek>(reader: FileReader<R>) -> Result<RecordBatch> {
    let schema = reader.schema();
    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    if batches.is_empty() {
        return Ok(RecordBatch::new_empty(schema));
    }
    concat_batches(&schema, &batches).map_err(Error::from)
}
