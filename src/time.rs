// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Simulated time.
//!
//! Time points are femtosecond counts. The textual form `<decimal><unit>`
//! (e.g. `10ns`, `1500ps`, `0s`) is what the debug protocol consumes and
//! emits; `Display` always picks the largest unit that divides the value
//! exactly, so formatting then parsing is the identity.

use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Recognized unit suffixes, largest first.
const UNITS: [(&str, u128); 6] = [
    ("s", 1_000_000_000_000_000),
    ("ms", 1_000_000_000_000),
    ("us", 1_000_000_000),
    ("ns", 1_000_000),
    ("ps", 1_000),
    ("fs", 1),
];

/// A point on the simulated timeline, in femtoseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimePoint(u128);

impl TimePoint {
    /// The origin of the timeline.
    pub const ZERO: TimePoint = TimePoint(0);

    /// The largest representable time point. Used as the "run forever"
    /// bound; never serialized onto the wire.
    pub const MAXIMUM: TimePoint = TimePoint(u128::MAX);

    pub fn from_femtos(fs: u128) -> TimePoint {
        TimePoint(fs)
    }

    pub fn from_nanos(ns: u64) -> TimePoint {
        TimePoint(ns as u128 * 1_000_000)
    }

    pub fn from_picos(ps: u64) -> TimePoint {
        TimePoint(ps as u128 * 1_000)
    }

    pub fn femtos(self) -> u128 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for TimePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return write!(f, "0s");
        }
        for (suffix, scale) in UNITS {
            if self.0 % scale == 0 {
                return write!(f, "{}{}", self.0 / scale, suffix);
            }
        }
        unreachable!("the femtosecond scale divides everything")
    }
}

/// Error returned when a textual time point does not parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTimeError;

impl fmt::Display for ParseTimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected a decimal number followed by s/ms/us/ns/ps/fs")
    }
}

impl std::error::Error for ParseTimeError {}

impl FromStr for TimePoint {
    type Err = ParseTimeError;

    fn from_str(s: &str) -> Result<TimePoint, ParseTimeError> {
        let digits_end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        if digits_end == 0 {
            return Err(ParseTimeError);
        }
        let value: u128 = s[..digits_end].parse().map_err(|_| ParseTimeError)?;
        let suffix = &s[digits_end..];
        let scale = UNITS
            .iter()
            .find(|(name, _)| *name == suffix)
            .map(|(_, scale)| *scale)
            .ok_or(ParseTimeError)?;
        value.checked_mul(scale).map(TimePoint).ok_or(ParseTimeError)
    }
}

impl Serialize for TimePoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimePoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<TimePoint, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(D::Error::custom)
    }
}

impl Add for TimePoint {
    type Output = TimePoint;

    fn add(self, rhs: TimePoint) -> TimePoint {
        TimePoint(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for TimePoint {
    fn add_assign(&mut self, rhs: TimePoint) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Sub for TimePoint {
    type Output = TimePoint;

    fn sub(self, rhs: TimePoint) -> TimePoint {
        TimePoint(self.0.saturating_sub(rhs.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_picks_largest_unit() {
        assert_eq!(TimePoint::ZERO.to_string(), "0s");
        assert_eq!(TimePoint::from_nanos(10).to_string(), "10ns");
        assert_eq!(TimePoint::from_picos(1500).to_string(), "1500ps");
        assert_eq!(TimePoint::from_femtos(1_000_000_000_000_000).to_string(), "1s");
        assert_eq!(TimePoint::from_femtos(7).to_string(), "7fs");
    }

    #[test]
    fn test_parse_round_trip() {
        for text in ["0s", "10ns", "1500ps", "123us", "999ms", "42fs"] {
            let t: TimePoint = text.parse().unwrap();
            assert_eq!(t.to_string(), text);
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<TimePoint>().is_err());
        assert!("ns".parse::<TimePoint>().is_err());
        assert!("10".parse::<TimePoint>().is_err());
        assert!("10 ns".parse::<TimePoint>().is_err());
        assert!("-5ns".parse::<TimePoint>().is_err());
        assert!("10xs".parse::<TimePoint>().is_err());
    }

    #[test]
    fn test_ordering_and_arithmetic() {
        let a = TimePoint::from_nanos(1);
        let b = TimePoint::from_picos(999);
        assert!(b < a);
        assert_eq!(a + a, TimePoint::from_nanos(2));
        assert_eq!(a - b, TimePoint::from_femtos(1_000));
        assert!(TimePoint::MAXIMUM > TimePoint::from_nanos(u64::MAX));
        assert_eq!(TimePoint::MAXIMUM + a, TimePoint::MAXIMUM);
    }

    #[test]
    fn test_serde_as_string() {
        let t = TimePoint::from_nanos(10);
        assert_eq!(serde_json::to_string(&t).unwrap(), "\"10ns\"");
        let back: TimePoint = serde_json::from_str("\"10ns\"").unwrap();
        assert_eq!(back, t);
        assert!(serde_json::from_str::<TimePoint>("\"bogus\"").is_err());
    }
}
