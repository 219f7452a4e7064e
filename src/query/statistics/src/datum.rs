// Copyright 2024 CrestDB Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use chrono::NaiveDate;
use chrono::NaiveDateTime;
use chrono::TimeZone;
use chrono::Utc;
use crestdb_common_exception::ErrorCode;
use crestdb_common_exception::Result;

/// Column data types the stats subsystem distinguishes.
///
/// Histogram bounds are persisted as blobs; on load they are converted back
/// to the owning column's field type. Index bounds stay blobs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldType {
    Int,
    UInt,
    Float,
    String,
    Blob,
    Timestamp,
}

/// A single decoded catalog value.
#[derive(Clone, Debug, PartialEq)]
pub enum Datum {
    Null,
    Int64(i64),
    UInt64(u64),
    Float64(f64),
    Bytes(Vec<u8>),
}

impl Datum {
    pub fn as_i64(&self) -> Result<i64> {
        match self {
            Datum::Int64(v) => Ok(*v),
            Datum::UInt64(v) => Ok(*v as i64),
            other => Err(ErrorCode::BadDataValueType(format!(
                "cannot read {other:?} as i64"
            ))),
        }
    }

    pub fn as_u64(&self) -> Result<u64> {
        match self {
            Datum::UInt64(v) => Ok(*v),
            Datum::Int64(v) if *v >= 0 => Ok(*v as u64),
            other => Err(ErrorCode::BadDataValueType(format!(
                "cannot read {other:?} as u64"
            ))),
        }
    }

    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Datum::Float64(v) => Ok(*v),
            Datum::Int64(v) => Ok(*v as f64),
            Datum::UInt64(v) => Ok(*v as f64),
            other => Err(ErrorCode::BadDataValueType(format!(
                "cannot read {other:?} as f64"
            ))),
        }
    }

    pub fn as_bytes(&self) -> Result<&[u8]> {
        match self {
            Datum::Bytes(v) => Ok(v),
            other => Err(ErrorCode::BadDataValueType(format!(
                "cannot read {other:?} as bytes"
            ))),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    /// Convert the datum to the given field type.
    ///
    /// Bytes holding a timestamp text are interpreted in UTC; the stats
    /// catalog never stores zone-local bounds.
    pub fn convert_to(&self, tp: &FieldType) -> Result<Datum> {
        if self.is_null() {
            return Ok(Datum::Null);
        }
        match tp {
            FieldType::Blob | FieldType::String => Ok(Datum::Bytes(self.to_text_bytes())),
            FieldType::Int => match self {
                Datum::Int64(v) => Ok(Datum::Int64(*v)),
                Datum::UInt64(v) => Ok(Datum::Int64(*v as i64)),
                Datum::Float64(v) => Ok(Datum::Int64(*v as i64)),
                Datum::Bytes(b) => {
                    let s = std::str::from_utf8(b)
                        .map_err(|e| ErrorCode::BadBytes(format!("invalid utf-8: {e}")))?;
                    Ok(Datum::Int64(s.trim().parse::<i64>()?))
                }
                Datum::Null => Ok(Datum::Null),
            },
            FieldType::UInt => match self {
                Datum::UInt64(v) => Ok(Datum::UInt64(*v)),
                Datum::Int64(v) => Ok(Datum::UInt64(*v as u64)),
                Datum::Float64(v) => Ok(Datum::UInt64(*v as u64)),
                Datum::Bytes(b) => {
                    let s = std::str::from_utf8(b)
                        .map_err(|e| ErrorCode::BadBytes(format!("invalid utf-8: {e}")))?;
                    Ok(Datum::UInt64(s.trim().parse::<u64>()?))
                }
                Datum::Null => Ok(Datum::Null),
            },
            FieldType::Float => match self {
                Datum::Float64(v) => Ok(Datum::Float64(*v)),
                Datum::Int64(v) => Ok(Datum::Float64(*v as f64)),
                Datum::UInt64(v) => Ok(Datum::Float64(*v as f64)),
                Datum::Bytes(b) => {
                    let s = std::str::from_utf8(b)
                        .map_err(|e| ErrorCode::BadBytes(format!("invalid utf-8: {e}")))?;
                    Ok(Datum::Float64(s.trim().parse::<f64>()?))
                }
                Datum::Null => Ok(Datum::Null),
            },
            FieldType::Timestamp => match self {
                Datum::Int64(v) => Ok(Datum::Int64(*v)),
                Datum::UInt64(v) => Ok(Datum::Int64(*v as i64)),
                Datum::Bytes(b) => {
                    let s = std::str::from_utf8(b)
                        .map_err(|e| ErrorCode::BadBytes(format!("invalid utf-8: {e}")))?;
                    Ok(Datum::Int64(parse_timestamp_utc(s.trim())?))
                }
                other => Err(ErrorCode::IllegalDataType(format!(
                    "cannot convert {other:?} to timestamp"
                ))),
            },
        }
    }

    /// Text rendition used when the target type is a blob or string.
    fn to_text_bytes(&self) -> Vec<u8> {
        match self {
            Datum::Null => Vec::new(),
            Datum::Int64(v) => v.to_string().into_bytes(),
            Datum::UInt64(v) => v.to_string().into_bytes(),
            Datum::Float64(v) => v.to_string().into_bytes(),
            Datum::Bytes(b) => b.clone(),
        }
    }

    /// Project the datum onto the f64 axis used by range-selectivity math.
    ///
    /// Bytes map through their big-endian 8-byte prefix so that ordering is
    /// preserved for prefixes that differ within the first eight bytes.
    pub fn to_scalar(&self) -> f64 {
        match self {
            Datum::Null => 0.0,
            Datum::Int64(v) => *v as f64,
            Datum::UInt64(v) => *v as f64,
            Datum::Float64(v) => *v,
            Datum::Bytes(b) => bytes_to_scalar(b),
        }
    }
}

fn bytes_to_scalar(bytes: &[u8]) -> f64 {
    let mut buf = [0u8; 8];
    let n = bytes.len().min(8);
    buf[..n].copy_from_slice(&bytes[..n]);
    u64::from_be_bytes(buf) as f64
}

/// Parse `YYYY-MM-DD[ HH:MM:SS[.ffffff]]` as a UTC instant, in microseconds
/// since the epoch.
fn parse_timestamp_utc(s: &str) -> Result<i64> {
    let naive = match NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        Ok(datetime) => datetime,
        Err(_) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map_err(|e| ErrorCode::BadBytes(format!("invalid timestamp {s:?}: {e}")))?
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| ErrorCode::BadBytes(format!("invalid timestamp {s:?}")))?,
    };
    Ok(Utc.from_utc_datetime(&naive).timestamp_micros())
}
