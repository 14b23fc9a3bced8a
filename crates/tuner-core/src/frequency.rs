//! The dial position, stored as tenths of a MHz so that cache keys and
//! equality checks never depend on float formatting.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::{Result, TunerError};

pub const MIN_TENTHS: u16 = 870;
pub const MAX_TENTHS: u16 = 1080;
pub const MIN_MHZ: f64 = 87.0;
pub const MAX_MHZ: f64 = 108.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Frequency(u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Frequency {
    pub const MIN: Frequency = Frequency(MIN_TENTHS);
    pub const MAX: Frequency = Frequency(MAX_TENTHS);

    /// Validate against the band, then round to one decimal.  A value just
    /// outside the band is rejected even if it would round onto an edge.
    pub fn new(mhz: f64) -> Result<Self> {
        if !(MIN_MHZ..=MAX_MHZ).contains(&mhz) {
            return Err(TunerError::InvalidFrequency(mhz));
        }
        let tenths = ((mhz * 10.0).round() as u16).clamp(MIN_TENTHS, MAX_TENTHS);
        Ok(Self(tenths))
    }

    pub fn from_tenths(tenths: u16) -> Option<Self> {
        (MIN_TENTHS..=MAX_TENTHS).contains(&tenths).then_some(Self(tenths))
    }

    pub fn tenths(self) -> u16 {
        self.0
    }

    pub fn mhz(self) -> f64 {
        self.0 as f64 / 10.0
    }

    /// One 0.1 MHz step, wrapping at the band edges.
    pub fn step(self, direction: Direction) -> Self {
        match direction {
            Direction::Up if self.0 >= MAX_TENTHS => Self(MIN_TENTHS),
            Direction::Up => Self(self.0 + 1),
            Direction::Down if self.0 <= MIN_TENTHS => Self(MAX_TENTHS),
            Direction::Down => Self(self.0 - 1),
        }
    }

    /// Number of distinct dial positions.
    pub fn band_len() -> usize {
        (MAX_TENTHS - MIN_TENTHS + 1) as usize
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.0 / 10, self.0 % 10)
    }
}

impl Serialize for Frequency {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.mhz())
    }
}

impl<'de> Deserialize<'de> for Frequency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let mhz = f64::deserialize(deserializer)?;
        Frequency::new(mhz).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_edges() {
        assert!(Frequency::new(87.0).is_ok());
        assert!(Frequency::new(108.0).is_ok());
        assert!(Frequency::new(86.9).is_err());
        assert!(Frequency::new(108.1).is_err());
        assert!(Frequency::new(108.04).is_err());
        assert!(Frequency::new(86.96).is_err());
        assert!(Frequency::new(f64::NAN).is_err());
        assert_eq!(Frequency::new(107.96).unwrap(), Frequency::MAX);
    }

    #[test]
    fn test_rounds_to_one_decimal() {
        let f = Frequency::new(101.34).unwrap();
        assert_eq!(f.tenths(), 1013);
        assert_eq!(f.to_string(), "101.3");
        assert_eq!(Frequency::new(99.0).unwrap().to_string(), "99.0");
    }

    #[test]
    fn test_step_wraps() {
        assert_eq!(Frequency::MAX.step(Direction::Up), Frequency::MIN);
        assert_eq!(Frequency::MIN.step(Direction::Down), Frequency::MAX);
        let f = Frequency::new(92.1).unwrap();
        assert_eq!(f.step(Direction::Up).to_string(), "92.2");
    }

    #[test]
    fn test_serde_as_number() {
        let f = Frequency::new(92.1).unwrap();
        assert_eq!(serde_json::to_string(&f).unwrap(), "92.1");
        let back: Frequency = serde_json::from_str("92.1").unwrap();
        assert_eq!(back, f);
        assert!(serde_json::from_str::<Frequency>("120.0").is_err());
    }
}
