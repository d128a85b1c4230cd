// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


//! Human-readable byte sizes such as `32M`, `1GiB` or `512k`.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use snafu::{OptionExt, ResultExt, Snafu};

const UNIT: u64 = 1024;

const KIB: u64 = UNIT;
const MIB: u64 = KIB * UNIT;
const GIB: u64 = MIB * UNIT;
const TIB: u64 = GIB * UNIT;
const PIB: u64 = TIB * UNIT;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ParseSizeError {
    #[snafu(display("empty size string"))]
    Empty,

    #[snafu(display("invalid size number in {input:?}"))]
    InvalidNumber {
        input:  String,
        source: std::num::ParseFloatError,
    },

    #[snafu(display("unknown size unit {unit:?} in {input:?}"))]
    UnknownUnit { input: String, unit: String },

    #[snafu(display("size {input:?} is negative or too large"))]
    OutOfRange { input: String },
}

/// A byte count that parses from and prints as a unit-suffixed string.
///
/// Units are binary (`1K` is 1024 bytes). Suffixes are case-insensitive and
/// accept an optional `iB`/`B` tail, so `8M`, `8MB`, `8mib` are all 8 MiB.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReadableSize(pub u64);

impl ReadableSize {
    pub const fn b(count: u64) -> Self { Self(count) }

    pub const fn kb(count: u64) -> Self { Self(count * KIB) }

    pub const fn mb(count: u64) -> Self { Self(count * MIB) }

    pub const fn gb(count: u64) -> Self { Self(count * GIB) }

    pub const fn as_bytes(self) -> u64 { self.0 }

    pub const fn as_mb(self) -> u64 { self.0 / MIB }
}

impl From<u64> for ReadableSize {
    fn from(bytes: u64) -> Self { Self(bytes) }
}

impl fmt::Display for ReadableSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let size = self.0;
        if size == 0 {
            write!(f, "0B")
        } else if size % PIB == 0 {
            write!(f, "{}PiB", size / PIB)
        } else if size % TIB == 0 {
            write!(f, "{}TiB", size / TIB)
        } else if size % GIB == 0 {
            write!(f, "{}GiB", size / GIB)
        } else if size % MIB == 0 {
            write!(f, "{}MiB", size / MIB)
        } else if size % KIB == 0 {
            write!(f, "{}KiB", size / KIB)
        } else {
            write!(f, "{size}B")
        }
    }
}

impl FromStr for ReadableSize {
    type Err = ParseSizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        snafu::ensure!(!input.is_empty(), EmptySnafu);

        let split = input
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(input.len());
        let (number, unit) = input.split_at(split);
        let unit = unit.trim();

        let multiplier = match unit.to_ascii_lowercase().as_str() {
            "" | "b" => 1,
            "k" | "kb" | "kib" => KIB,
            "m" | "mb" | "mib" => MIB,
            "g" | "gb" | "gib" => GIB,
            "t" | "tb" | "tib" => TIB,
            "p" | "pb" | "pib" => PIB,
            _ => {
                return UnknownUnitSnafu {
                    input,
                    unit,
                }
                .fail();
            }
        };

        if !number.contains('.') {
            if let Ok(whole) = number.parse::<u64>() {
                return whole
                    .checked_mul(multiplier)
                    .map(Self)
                    .context(OutOfRangeSnafu { input });
            }
        }

        let value: f64 = number.parse().context(InvalidNumberSnafu { input })?;
        #[allow(clippy::cast_precision_loss)]
        let bytes = value * multiplier as f64;
        snafu::ensure!(
            bytes.is_finite() && bytes >= 0.0 && bytes <= u64::MAX as f64,
            OutOfRangeSnafu { input }
        );
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Ok(Self(bytes as u64))
    }
}

impl Serialize for ReadableSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ReadableSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bytes(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Bytes(bytes) => Ok(Self(bytes)),
            Raw::Text(text) => text.parse().map_err(de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_bytes() {
        assert_eq!("100".parse::<ReadableSize>().unwrap(), ReadableSize(100));
        assert_eq!("0".parse::<ReadableSize>().unwrap(), ReadableSize(0));
    }

    #[test]
    fn parses_unit_suffixes() {
        assert_eq!("32M".parse::<ReadableSize>().unwrap(), ReadableSize::mb(32));
        assert_eq!("512k".parse::<ReadableSize>().unwrap(), ReadableSize::kb(512));
        assert_eq!("1GiB".parse::<ReadableSize>().unwrap(), ReadableSize::gb(1));
        assert_eq!("8 MB".parse::<ReadableSize>().unwrap(), ReadableSize::mb(8));
        assert_eq!("1.5K".parse::<ReadableSize>().unwrap(), ReadableSize(1536));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            "".parse::<ReadableSize>(),
            Err(ParseSizeError::Empty)
        ));
        assert!(matches!(
            "12Q".parse::<ReadableSize>(),
            Err(ParseSizeError::UnknownUnit { .. })
        ));
        assert!(matches!(
            "M".parse::<ReadableSize>(),
            Err(ParseSizeError::InvalidNumber { .. })
        ));
        assert!(matches!(
            "99999999999P".parse::<ReadableSize>(),
            Err(ParseSizeError::OutOfRange { .. })
        ));
    }

    #[test]
    fn display_picks_largest_exact_unit() {
        assert_eq!(ReadableSize::mb(8).to_string(), "8MiB");
        assert_eq!(ReadableSize::kb(1536).to_string(), "1536KiB");
        assert_eq!(ReadableSize(1000).to_string(), "1000B");
        assert_eq!(ReadableSize(0).to_string(), "0B");
    }

    #[test]
    fn serde_accepts_numbers_and_strings() {
        let from_text: ReadableSize = serde_json::from_str("\"4M\"").unwrap();
        let from_number: ReadableSize = serde_json::from_str("4194304").unwrap();
        assert_eq!(from_text, from_number);
        assert_eq!(serde_json::to_string(&from_text).unwrap(), "\"4MiB\"");
    }
}
