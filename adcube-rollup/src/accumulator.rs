use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, Float64Builder, Int32Builder, Int64Builder, StringBuilder,
};
use arrow::record_batch::RecordBatch;
use rustc_hash::FxHashMap;

use adcube_catalog::CubeSpec;
use adcube_events::{country_from_code, time_dim, Dimension, EventBatch, EventType};
use adcube_result::{Error, Result};

use crate::cells::AggCells;

/// Running aggregate state for one cube.
///
/// Keys are the cube's dimension codes packed into a `u128` (each dimension
/// has a fixed bit width), which keeps hashing cheap and makes the final
/// emission order well defined.
pub struct CubeAccumulator {
    spec: &'static CubeSpec,
    groups: FxHashMap<u128, AggCells>,
}

impl CubeAccumulator {
    pub fn new(spec: &'static CubeSpec) -> Self {
        Self {
            spec,
            groups: FxHashMap::default(),
        }
    }

    pub fn spec(&self) -> &'static CubeSpec {
        self.spec
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Fold one batch into the accumulator.
    pub fn absorb(&mut self, batch: &EventBatch) -> Result<()> {
        let key_codes: Vec<&[u64]> = self
            .spec
            .keys
            .iter()
            .map(|dim| batch.codes(*dim))
            .collect();
        let bid = batch.bid_price()?;
        let total = batch.total_price()?;

        for row in 0..batch.num_rows() {
            let mut key: u128 = 0;
            for (dim, codes) in self.spec.keys.iter().zip(&key_codes) {
                key = (key << dim.code_bits()) | u128::from(codes[row]);
            }
            let bid_value = bid.is_valid(row).then(|| bid.value(row));
            let total_value = total.is_valid(row).then(|| total.value(row));
            self.groups.entry(key).or_default().absorb(bid_value, total_value);
        }
        Ok(())
    }

    /// Housekeeping fold: rebuild the hash index at exact capacity.
    ///
    /// Semantically a no-op; it releases the slack an incrementally grown
    /// table accumulates so a long PREPARE stays under its memory cap.
    pub fn fold(&mut self) {
        let compacted: FxHashMap<u128, AggCells> = std::mem::take(&mut self.groups)
            .into_iter()
            .collect();
        self.groups = compacted;
        self.groups.shrink_to_fit();
    }

    /// Merge another accumulator for the same cube into this one.
    pub fn merge(&mut self, other: CubeAccumulator) {
        for (key, cells) in other.groups {
            self.groups.entry(key).or_default().merge(&cells);
        }
    }

    /// Emit the finalized cube table: key columns in declared order followed
    /// by the five aggregate columns, rows sorted by packed key so the output
    /// does not depend on batch partitioning or fold cadence.
    pub fn finalize(&self) -> Result<RecordBatch> {
        let mut entries: Vec<(u128, AggCells)> =
            self.groups.iter().map(|(k, v)| (*k, *v)).collect();
        entries.sort_unstable_by_key(|(key, _)| *key);

        let mut columns: Vec<ArrayRef> = Vec::with_capacity(self.spec.keys.len() + 5);
        for (pos, dim) in self.spec.keys.iter().enumerate() {
            let codes: Vec<u64> = entries
                .iter()
                .map(|(key, _)| unpack_dim(self.spec.keys, *key, pos))
                .collect();
            columns.push(key_column(*dim, &codes)?);
        }

        let mut bid_sum = Float64Builder::with_capacity(entries.len());
        let mut bid_count = Int64Builder::with_capacity(entries.len());
        let mut total_sum = Float64Builder::with_capacity(entries.len());
        let mut total_count = Int64Builder::with_capacity(entries.len());
        let mut rows = Int64Builder::with_capacity(entries.len());
        for (_, cells) in &entries {
            bid_sum.append_value(cells.bid_price_sum);
            bid_count.append_value(cells.bid_price_count);
            total_sum.append_value(cells.total_price_sum);
            total_count.append_value(cells.total_price_count);
            rows.append_value(cells.rows);
        }
        columns.push(Arc::new(bid_sum.finish()));
        columns.push(Arc::new(bid_count.finish()));
        columns.push(Arc::new(total_sum.finish()));
        columns.push(Arc::new(total_count.finish()));
        columns.push(Arc::new(rows.finish()));

        RecordBatch::try_new(self.spec.schema(), columns).map_err(Error::from)
    }
}

/// Extract the code of the `pos`-th key dimension from a packed key.
fn unpack_dim(keys: &[Dimension], key: u128, pos: usize) -> u64 {
    let trailing: u32 = keys[pos + 1..].iter().map(|d| d.code_bits()).sum();
    let mask = (1u128 << keys[pos].code_bits()) - 1;
    ((key >> trailing) & mask) as u64
}

/// Render one key dimension's codes as its cube-file column.
fn key_column(dim: Dimension, codes: &[u64]) -> Result<ArrayRef> {
    match dim {
        Dimension::Day => {
            let mut builder = StringBuilder::with_capacity(codes.len(), codes.len() * 10);
            for &code in codes {
                builder.append_value(time_dim::format_day(code as i64)?);
            }
            Ok(Arc::new(builder.finish()))
        }
        Dimension::Minute => {
            let mut builder = StringBuilder::with_capacity(codes.len(), codes.len() * 16);
            for &code in codes {
                builder.append_value(time_dim::format_minute(code as i64)?);
            }
            Ok(Arc::new(builder.finish()))
        }
        Dimension::Week => {
            let mut builder = StringBuilder::with_capacity(codes.len(), codes.len() * 8);
            for &code in codes {
                builder.append_value(time_dim::format_week(code as i64));
            }
            Ok(Arc::new(builder.finish()))
        }
        Dimension::Country => {
            let mut builder = StringBuilder::with_capacity(codes.len(), codes.len() * 2);
            for &code in codes {
                builder.append_value(country_from_code(code));
            }
            Ok(Arc::new(builder.finish()))
        }
        Dimension::Type => {
            let mut builder = StringBuilder::with_capacity(codes.len(), codes.len() * 10);
            for &code in codes {
                builder.append_value(EventType::from_code(code)?.as_str());
            }
            Ok(Arc::new(builder.finish()))
        }
        Dimension::Hour => {
            let mut builder = Int64Builder::with_capacity(codes.len());
            for &code in codes {
                builder.append_value(code as i64);
            }
            Ok(Arc::new(builder.finish()))
        }
        Dimension::AdvertiserId | Dimension::PublisherId => {
            let mut builder = Int32Builder::with_capacity(codes.len());
            for &code in codes {
                builder.append_value(code as i32);
            }
            Ok(Arc::new(builder.finish()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float64Array, Int64Array, StringArray};
    use adcube_catalog::cube;

    fn batch_from_csv(rows: &[&str]) -> EventBatch {
        use adcube_events::{EventScanOptions, EventScanner, EVENT_COLUMNS};
        use std::io::Write;

        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("events_0.csv");
        let mut file = std::fs::File::create(&path).expect("create csv");
        writeln!(file, "{}", EVENT_COLUMNS.join(",")).unwrap();
        for row in rows {
            writeln!(file, "{row}").unwrap();
        }
        drop(file);

        EventScanner::new(dir.path(), EventScanOptions::default())
            .expect("scanner")
            .scan()
            .next()
            .expect("one batch")
            .expect("decodes")
    }

    fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> &'a T {
        batch
            .column_by_name(name)
            .expect("column present")
            .as_any()
            .downcast_ref::<T>()
            .expect("column type")
    }

    #[test]
    fn accumulates_null_safe_aggregates_per_group() {
        let batch = batch_from_csv(&[
            "1717200000000,impression,a-1,1,10,1.0,42,,US",
            "1717200060000,impression,a-2,1,10,2.0,42,,US",
            "1717200120000,click,a-3,1,10,,42,,US",
            "1717286400000,impression,a-4,2,11,4.0,43,,JP",
        ]);

        let mut acc = CubeAccumulator::new(cube("day_type").unwrap());
        acc.absorb(&batch).expect("absorb");
        let table = acc.finalize().expect("finalize");

        assert_eq!(table.num_rows(), 3);
        let days = column::<StringArray>(&table, "day");
        let types = column::<StringArray>(&table, "type");
        let bid_sum = column::<Float64Array>(&table, "bid_price_sum");
        let bid_count = column::<Int64Array>(&table, "bid_price_count");
        let rows = column::<Int64Array>(&table, "row_count");

        // Rows come out sorted by packed (day, type) key.
        assert_eq!(days.value(0), "2024-06-01");
        assert_eq!(types.value(0), "impression");
        assert_eq!(bid_sum.value(0), 3.0);
        assert_eq!(bid_count.value(0), 2);
        assert_eq!(rows.value(0), 2);

        assert_eq!(types.value(1), "click");
        assert_eq!(bid_sum.value(1), 0.0);
        assert_eq!(bid_count.value(1), 0);
        assert_eq!(rows.value(1), 1);

        assert_eq!(days.value(2), "2024-06-02");
        assert_eq!(bid_sum.value(2), 4.0);
    }

    #[test]
    fn fold_preserves_contents() {
        let batch = batch_from_csv(&[
            "1717200000000,impression,a-1,1,10,1.0,42,,US",
            "1717286400000,purchase,a-2,2,11,,43,9.0,JP",
        ]);

        let mut folded = CubeAccumulator::new(cube("country_type").unwrap());
        folded.absorb(&batch).expect("absorb");
        folded.fold();

        let mut plain = CubeAccumulator::new(cube("country_type").unwrap());
        plain.absorb(&batch).expect("absorb");

        let folded = folded.finalize().expect("finalize");
        let plain = plain.finalize().expect("finalize");
        assert_eq!(folded, plain);
    }

    #[test]
    fn merge_matches_single_pass() {
        let first = batch_from_csv(&["1717200000000,impression,a-1,1,10,1.0,42,,US"]);
        let second = batch_from_csv(&["1717200060000,impression,a-2,1,10,2.0,42,,US"]);

        let spec = cube("day_type").unwrap();
        let mut together = CubeAccumulator::new(spec);
        together.absorb(&first).expect("absorb");
        together.absorb(&second).expect("absorb");

        let mut left = CubeAccumulator::new(spec);
        left.absorb(&first).expect("absorb");
        let mut right = CubeAccumulator::new(spec);
        right.absorb(&second).expect("absorb");
        left.merge(right);

        assert_eq!(
            together.finalize().expect("finalize"),
            left.finalize().expect("finalize")
        );
    }

    #[test]
    fn wide_cube_key_round_trips() {
        let batch = batch_from_csv(&["1717200000000,impression,a-1,1,10,1.0,42,,US"]);
        let mut acc = CubeAccumulator::new(cube("day_publisher_country_type").unwrap());
        acc.absorb(&batch).expect("absorb");
        let table = acc.finalize().expect("finalize");

        assert_eq!(column::<StringArray>(&table, "day").value(0), "2024-06-01");
        assert_eq!(
            column::<arrow::array::Int32Array>(&table, "publisher_id").value(0),
            10
        );
        assert_eq!(column::<StringArray>(&table, "country").value(0), "US");
        assert_eq!(column::<StringArray>(&table, "type").value(0), "impression");
    }
}
