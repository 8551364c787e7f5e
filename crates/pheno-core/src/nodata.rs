//! Nodata handling for serde.
//!
//! JSON has no NaN: serde_json writes non-finite floats as `null`. These
//! helpers read `null` back as the type's nodata value so rasters and records
//! survive a round trip.

use serde::{Deserialize, Deserializer};

/// A cell type with a designated nodata value that `null` decodes to.
pub trait NullCell: Sized {
    fn null() -> Self;
}

impl NullCell for f64 {
    fn null() -> Self {
        f64::NAN
    }
}

/// Class grids never carry `null`; `u16::MAX` is reserved as the decode value.
impl NullCell for u16 {
    fn null() -> Self {
        u16::MAX
    }
}

pub fn deserialize_cells<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: NullCell + Deserialize<'de>,
{
    let v: Vec<Option<T>> = Vec::deserialize(d)?;
    Ok(v.into_iter().map(|x| x.unwrap_or_else(T::null)).collect())
}

pub fn f64_or_nan<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(d)?.unwrap_or(f64::NAN))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize, Deserialize)]
    struct Row {
        #[serde(deserialize_with = "deserialize_cells")]
        data: Vec<f64>,
        #[serde(deserialize_with = "f64_or_nan")]
        scalar: f64,
    }

    #[test]
    fn nan_survives_json() {
        let row = Row { data: vec![1.0, f64::NAN, 3.0], scalar: f64::NAN };
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"{"data":[1.0,null,3.0],"scalar":null}"#);
        let back: Row = serde_json::from_str(&json).unwrap();
        assert_eq!(back.data[0], 1.0);
        assert!(back.data[1].is_nan());
        assert!(back.scalar.is_nan());
    }
}
