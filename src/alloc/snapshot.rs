use std::{
    fmt,
    fs::File,
    io::{self, Read, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::tree::TrackedRange;

/// Every range a tracker knew about at one moment, in address order. Written
/// out as JSON for post-mortem inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub ranges: Vec<TrackedRange>,
}

#[non_exhaustive]
#[derive(Debug)]
pub enum SnapshotError {
    Io(io::Error),
    SerdeJson(serde_json::Error),
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "snapshot i/o failed: {e}"),
            Self::SerdeJson(e) => write!(f, "snapshot is not valid json: {e}"),
        }
    }
}

impl std::error::Error for SnapshotError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::SerdeJson(e) => Some(e),
        }
    }
}

impl Snapshot {
    pub const fn new(ranges: Vec<TrackedRange>) -> Self {
        Self { ranges }
    }

    /// Only the ranges that are still allocated
    pub fn live(&self) -> impl Iterator<Item = &TrackedRange> {
        self.ranges.iter().filter(|range| range.is_allocated())
    }

    pub fn write_to_file<P>(&self, path: P) -> Result<(), SnapshotError>
    where
        P: AsRef<Path>,
    {
        let json = serde_json::to_vec_pretty(self).map_err(SnapshotError::SerdeJson)?;
        let mut file = File::create(path).map_err(SnapshotError::Io)?;
        file.write_all(&json).map_err(SnapshotError::Io)?;
        Ok(())
    }

    pub fn from_file<P>(path: P) -> Result<Self, SnapshotError>
    where
        P: AsRef<Path>,
    {
        let mut file = File::open(path).map_err(SnapshotError::Io)?;
        let mut buf = String::new();
        file.read_to_string(&mut buf).map_err(SnapshotError::Io)?;
        serde_json::from_str(&buf).map_err(SnapshotError::SerdeJson)
    }
}

#[cfg(test)]
mod tests {
    use std::env;

    use super::*;
    use crate::{
        alloc::{
            sim::{Fit, SimHeap},
            tracker::Tracker,
        },
        tree::RangeState,
    };

    #[test]
    fn snapshot_survives_a_trip_through_a_file() {
        let mut tracker = Tracker::new(SimHeap::new(Fit::Head));
        let a = tracker.allocate(24).unwrap();
        tracker.allocate(8).unwrap();
        tracker.release(a.as_ptr()).unwrap();

        let snapshot = tracker.snapshot();
        let path = env::temp_dir().join(format!("heapcheck-snapshot-{}.json", std::process::id()));
        snapshot.write_to_file(&path).unwrap();
        let read_back = Snapshot::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(read_back, snapshot);
        assert_eq!(read_back.live().count(), 1);
        assert_eq!(read_back.ranges[0].state, RangeState::Free);
    }

    #[test]
    fn json_uses_hex_addresses() {
        let snapshot = Snapshot::new(vec![TrackedRange::new(0x2a0, 4, RangeState::Allocated)]);
        let json = serde_json::to_string(&snapshot).unwrap();
        assert_eq!(
            json,
            r#"{"ranges":[{"start":"0x2a0","len":4,"state":"allocated"}]}"#
        );
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let error = Snapshot::from_file("/nonexistent/heapcheck.json").unwrap_err();
        assert!(matches!(error, SnapshotError::Io(_)));
    }

    #[test]
    fn garbage_is_a_json_error() {
        let path = env::temp_dir().join(format!("heapcheck-garbage-{}.json", std::process::id()));
        std::fs::write(&path, b"{ranges: nope").unwrap();
        let error = Snapshot::from_file(&path).unwrap_err();
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(error, SnapshotError::SerdeJson(_)));
    }
}
