use adcube_result::{Error, Result};
use arrow::datatypes::DataType;

/// Event kind. The code values are load-bearing: they are the dense encoding
/// used in accumulator keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
    Serve = 0,
    Impression = 1,
    Click = 2,
    Purchase = 3,
}

impl EventType {
    pub const ALL: [EventType; 4] = [
        EventType::Serve,
        EventType::Impression,
        EventType::Click,
        EventType::Purchase,
    ];

    pub fn parse(text: &str) -> Result<Self> {
        match text {
            "serve" => Ok(EventType::Serve),
            "impression" => Ok(EventType::Impression),
            "click" => Ok(EventType::Click),
            "purchase" => Ok(EventType::Purchase),
            other => Err(Error::InputFormat(format!("unknown event type '{other}'"))),
        }
    }

    pub fn from_code(code: u64) -> Result<Self> {
        EventType::ALL
            .get(code as usize)
            .copied()
            .ok_or_else(|| Error::Internal(format!("invalid event type code {code}")))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Serve => "serve",
            EventType::Impression => "impression",
            EventType::Click => "click",
            EventType::Purchase => "purchase",
        }
    }
}

/// A groupable dimension: a raw key column or a time dimension derived from
/// `ts`. This is the vocabulary the catalog, router, and executor share.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Dimension {
    Day,
    Hour,
    Minute,
    Week,
    Country,
    AdvertiserId,
    PublisherId,
    Type,
}

impl Dimension {
    pub const ALL: [Dimension; 8] = [
        Dimension::Day,
        Dimension::Hour,
        Dimension::Minute,
        Dimension::Week,
        Dimension::Country,
        Dimension::AdvertiserId,
        Dimension::PublisherId,
        Dimension::Type,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Dimension::Day => "day",
            Dimension::Hour => "hour",
            Dimension::Minute => "minute",
            Dimension::Week => "week",
            Dimension::Country => "country",
            Dimension::AdvertiserId => "advertiser_id",
            Dimension::PublisherId => "publisher_id",
            Dimension::Type => "type",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Dimension::ALL.iter().copied().find(|d| d.name() == name)
    }

    /// Index into per-batch dimension code arrays.
    #[inline]
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Width of this dimension's dense code when packed into a cube key.
    ///
    /// The widths are fixed so that any catalog cube key (at most four
    /// dimensions) packs into a `u128` with room to spare.
    pub fn code_bits(&self) -> u32 {
        match self {
            Dimension::Day => 24,
            Dimension::Hour => 8,
            Dimension::Minute => 32,
            Dimension::Week => 32,
            Dimension::Country => 16,
            Dimension::AdvertiserId => 32,
            Dimension::PublisherId => 32,
            Dimension::Type => 8,
        }
    }

    /// Arrow type of this dimension in cube files and the fact store.
    pub fn data_type(&self) -> DataType {
        match self {
            Dimension::Day | Dimension::Minute | Dimension::Week => DataType::Utf8,
            Dimension::Country | Dimension::Type => DataType::Utf8,
            Dimension::Hour => DataType::Int64,
            Dimension::AdvertiserId | Dimension::PublisherId => DataType::Int32,
        }
    }
}

/// Encode a two-letter country code into its dense form.
pub fn country_code(text: &str) -> Result<u64> {
    let bytes = text.as_bytes();
    if bytes.len() != 2 || !bytes.iter().all(u8::is_ascii_alphabetic) {
        return Err(Error::InputFormat(format!(
            "country must be a two-letter ISO code, got '{text}'"
        )));
    }
    Ok(((bytes[0] as u64) << 8) | bytes[1] as u64)
}

/// Decode a dense country code back into its two-letter form.
pub fn country_from_code(code: u64) -> String {
    let bytes = [(code >> 8) as u8, code as u8];
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_round_trips() {
        for ty in EventType::ALL {
            assert_eq!(EventType::parse(ty.as_str()).unwrap(), ty);
            assert_eq!(EventType::from_code(ty as u64).unwrap(), ty);
        }
        assert!(EventType::parse("install").is_err());
    }

    #[test]
    fn dimension_names_round_trip() {
        for dim in Dimension::ALL {
            assert_eq!(Dimension::parse(dim.name()), Some(dim));
        }
        assert_eq!(Dimension::parse("bid_price"), None);
    }

    #[test]
    fn widest_catalog_key_fits_in_u128() {
        let widest: u32 = [
            Dimension::Day,
            Dimension::PublisherId,
            Dimension::Country,
            Dimension::Type,
        ]
        .iter()
        .map(|d| d.code_bits())
        .sum();
        assert!(widest <= 128);
    }

    #[test]
    fn country_codes_round_trip() {
        let code = country_code("JP").unwrap();
        assert_eq!(country_from_code(code), "JP");
        assert!(country_code("JPN").is_err());
        assert!(country_code("J1").is_err());
    }
}
