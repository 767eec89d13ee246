//! Raw records and offset policies.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Partition number on the underlying log.
pub type Partition = i32;

/// Offset of a record within its partition.
pub type Offset = i64;

/// A raw record as stored on the log, before schema resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Partition the record was read from
    pub partition: Partition,
    /// Offset within the partition
    pub offset: Offset,
    /// Record timestamp in milliseconds since epoch (if available)
    pub timestamp_ms: Option<i64>,
    /// Record key (if any)
    pub key: Option<Bytes>,
    /// Record value: schema header followed by the encoded datum
    pub value: Bytes,
}

/// Where a consumer group starts reading a partition it has no committed offset for.
///
/// `Earliest` starts from the beginning of the partition, `Latest` only sees
/// records appended after the group joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OffsetPolicy {
    Earliest,
    #[default]
    Latest,
}

impl OffsetPolicy {
    /// Value for Kafka's `auto.offset.reset` setting.
    pub fn as_reset_str(&self) -> &'static str {
        match self {
            OffsetPolicy::Earliest => "earliest",
            OffsetPolicy::Latest => "latest",
        }
    }
}

impl fmt::Display for OffsetPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OffsetPolicy::Earliest => f.write_str("EARLIEST"),
            OffsetPolicy::Latest => f.write_str("LATEST"),
        }
    }
}

impl FromStr for OffsetPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "EARLIEST" => Ok(OffsetPolicy::Earliest),
            "LATEST" => Ok(OffsetPolicy::Latest),
            other => Err(format!(
                "Unknown offset policy '{other}', expected EARLIEST or LATEST"
            )),
        }
    }
}
