//! Versioned data events consumed by the indexing pipelines.

use crate::Version;

/// A single unit of ingestion: an opaque payload tagged with a producer
/// assigned version.
///
/// Versions order events across all consumers. A batch of events is always
/// applied in non-decreasing version order, with ties broken by arrival
/// order within the batch, and the receiving index records
/// `max(event versions)` once the batch has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataEvent<V> {
    /// Producer-assigned version of this event.
    pub version: Version,

    /// The payload to be interpreted into an indexable document.
    pub payload: V,
}

impl<V> DataEvent<V> {
    /// Create a new event.
    pub fn new(version: Version, payload: V) -> Self {
        DataEvent { version, payload }
    }
}

/// Returns the highest version in a batch, or `None` for an empty batch.
pub fn max_version<V>(events: &[DataEvent<V>]) -> Option<Version> {
    events.iter().map(|e| e.version).max()
}

/// Sorts a batch into non-decreasing version order. The sort is stable, so
/// events carrying the same version keep their arrival order.
pub fn sort_by_version<V>(events: &mut [DataEvent<V>]) {
    events.sort_by_key(|e| e.version);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_version() {
        let events = vec![
            DataEvent::new(5, "a"),
            DataEvent::new(3, "b"),
            DataEvent::new(7, "c"),
        ];
        assert_eq!(max_version(&events), Some(7));

        let empty: Vec<DataEvent<&str>> = Vec::new();
        assert_eq!(max_version(&empty), None);
    }

    #[test]
    fn test_sort_is_stable_on_ties() {
        let mut events = vec![
            DataEvent::new(5, "first-5"),
            DataEvent::new(3, "first-3"),
            DataEvent::new(5, "second-5"),
            DataEvent::new(3, "second-3"),
        ];
        sort_by_version(&mut events);

        let order: Vec<&str> = events.iter().map(|e| e.payload).collect();
        assert_eq!(order, vec!["first-3", "second-3", "first-5", "second-5"]);
    }
}
