//! The rollup catalog: a closed, declaration-ordered set of cube descriptors.
//!
//! Each cube is described by data, never by code; the router scans these
//! descriptors and the executor works off whichever one the router picked.
//! Every cube stores the same five aggregate columns, so a descriptor is
//! just its key dimensions plus sizing metadata.

use std::sync::Arc;

use adcube_events::Dimension;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};

/// Row-count threshold separating eagerly resident cubes from lazily mapped
/// ones.
pub const SMALL_CUBE_ROWS: u64 = 100_000;

/// The five aggregate columns every cube stores, in file order.
pub const AGGREGATE_COLUMNS: [&str; 5] = [
    "bid_price_sum",
    "bid_price_count",
    "total_price_sum",
    "total_price_count",
    "row_count",
];

/// File extension for published cube files.
pub const CUBE_FILE_EXT: &str = "arrow";

/// Size class of a cube, derived from its expected row count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SizeClass {
    /// Expected to stay under [`SMALL_CUBE_ROWS`]; loaded eagerly at startup.
    Small,
    /// Loaded lazily (memory-mapped) on first demand.
    Large,
}

/// Descriptor for one pre-aggregated cube.
#[derive(Debug)]
pub struct CubeSpec {
    /// Stable identifier; also the stem of the on-disk file name.
    pub id: &'static str,
    /// Key dimensions, in the column order of the cube file.
    pub keys: &'static [Dimension],
    /// Rough expected row count over the reference corpus; drives cube
    /// selection (smallest wins) and the size class.
    pub expected_rows: u64,
}

impl CubeSpec {
    pub fn size_class(&self) -> SizeClass {
        if self.expected_rows < SMALL_CUBE_ROWS {
            SizeClass::Small
        } else {
            SizeClass::Large
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self.id, CUBE_FILE_EXT)
    }

    pub fn has_key(&self, dim: Dimension) -> bool {
        self.keys.contains(&dim)
    }

    /// Arrow schema of this cube's file: the key columns in declared order
    /// followed by the five fixed aggregate columns.
    ///
    /// The stored sums are non-nullable; a sum of zero with a zero count
    /// means "no non-null contributions" and is turned back into NULL at
    /// query time.
    pub fn schema(&self) -> SchemaRef {
        let mut fields: Vec<Field> = self
            .keys
            .iter()
            .map(|dim| Field::new(dim.name(), dim.data_type(), false))
            .collect();
        fields.push(Field::new("bid_price_sum", DataType::Float64, false));
        fields.push(Field::new("bid_price_count", DataType::Int64, false));
        fields.push(Field::new("total_price_sum", DataType::Float64, false));
        fields.push(Field::new("total_price_count", DataType::Int64, false));
        fields.push(Field::new("row_count", DataType::Int64, false));
        Arc::new(Schema::new(fields))
    }
}

use adcube_events::Dimension::{AdvertiserId, Country, Day, Hour, Minute, PublisherId, Type, Week};

/// The fixed cube set, in declaration order (the router breaks size ties by
/// position in this slice).
///
/// Every single dimension is paired with `type` because nearly every query
/// filters on the event type; the composites cover the date × geography ×
/// counterparty shapes, and the wide cube keeps geography × publisher × day
/// queries off the fallback path.
pub const CATALOG: &[CubeSpec] = &[
    CubeSpec {
        id: "day_type",
        keys: &[Day, Type],
        expected_rows: 1_500,
    },
    CubeSpec {
        id: "hour_type",
        keys: &[Hour, Type],
        expected_rows: 96,
    },
    CubeSpec {
        id: "minute_type",
        keys: &[Minute, Type],
        expected_rows: 2_110_000,
    },
    CubeSpec {
        id: "week_type",
        keys: &[Week, Type],
        expected_rows: 220,
    },
    CubeSpec {
        id: "country_type",
        keys: &[Country, Type],
        expected_rows: 48,
    },
    CubeSpec {
        id: "advertiser_type",
        keys: &[AdvertiserId, Type],
        expected_rows: 6_600,
    },
    CubeSpec {
        id: "publisher_type",
        keys: &[PublisherId, Type],
        expected_rows: 4_500,
    },
    CubeSpec {
        id: "day_country_type",
        keys: &[Day, Country, Type],
        expected_rows: 17_000,
    },
    CubeSpec {
        id: "day_advertiser_type",
        keys: &[Day, AdvertiserId, Type],
        expected_rows: 1_835_000,
    },
    CubeSpec {
        id: "hour_country_type",
        keys: &[Hour, Country, Type],
        expected_rows: 1_200,
    },
    CubeSpec {
        id: "day_publisher_country_type",
        keys: &[Day, PublisherId, Country, Type],
        expected_rows: 2_500_000,
    },
];

/// Look up a cube by id.
pub fn cube(id: &str) -> Option<&'static CubeSpec> {
    CATALOG.iter().find(|spec| spec.id == id)
}
