//! Result aggregation for completed parts
//!
//! Workers finish parts in arbitrary order. The aggregator is the single
//! point that records their acknowledgments, detects full coverage, and
//! hands the finalize call a list ordered by part index.

use crate::error::{Result, UploadError};
use crate::models::CompletedPart;
use std::collections::BTreeMap;
use tracing::debug;

/// Outcome of recording one acknowledgment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationProgress {
    /// More parts are outstanding
    Pending { received: usize, total: usize },
    /// Every index in `1..=total` has been acknowledged
    Complete,
}

/// Accumulates part acknowledgments keyed by part index
#[derive(Debug)]
pub struct PartAggregator {
    total_parts: usize,
    /// part index -> etag; BTreeMap keeps keys in ascending order
    parts: BTreeMap<u32, String>,
}

impl PartAggregator {
    pub fn new(total_parts: usize) -> Self {
        PartAggregator {
            total_parts,
            parts: BTreeMap::new(),
        }
    }

    /// Record an acknowledgment
    ///
    /// # Returns
    /// * `Ok(AggregationProgress::Complete)` once all parts are present
    /// * `Err(UploadError)` for an index outside `1..=total_parts` or an index
    ///   acknowledged twice
    pub fn record(&mut self, part: CompletedPart) -> Result<AggregationProgress> {
        if part.index == 0 || part.index as usize > self.total_parts {
            return Err(UploadError::InternalError(format!(
                "part index {} outside 1..={}",
                part.index, self.total_parts
            )));
        }

        if self.parts.contains_key(&part.index) {
            return Err(UploadError::InternalError(format!(
                "part {} acknowledged twice",
                part.index
            )));
        }

        debug!("Recorded part {} (etag {})", part.index, part.etag);
        self.parts.insert(part.index, part.etag);

        if self.is_complete() {
            debug!("All {} parts acknowledged", self.total_parts);
            Ok(AggregationProgress::Complete)
        } else {
            Ok(AggregationProgress::Pending {
                received: self.parts.len(),
                total: self.total_parts,
            })
        }
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn total_parts(&self) -> usize {
        self.total_parts
    }

    pub fn is_complete(&self) -> bool {
        self.parts.len() == self.total_parts
    }

    /// Validate that every index in `1..=total_parts` is present
    pub fn validate_completeness(&self) -> Result<()> {
        if !self.is_complete() {
            let missing: Vec<u32> = (1..=self.total_parts as u32)
                .filter(|index| !self.parts.contains_key(index))
                .collect();
            return Err(UploadError::IncompleteUpload(format!(
                "expected {} parts, got {} (missing {:?})",
                self.total_parts,
                self.parts.len(),
                missing
            )));
        }
        Ok(())
    }

    /// Consume the aggregator into the list finalize expects
    ///
    /// Parts come out strictly increasing by index.
    pub fn into_ordered_parts(self) -> Result<Vec<CompletedPart>> {
        self.validate_completeness()?;
        Ok(self
            .parts
            .into_iter()
            .map(|(index, etag)| CompletedPart { index, etag })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_order_parts_come_out_sorted() {
        let mut aggregator = PartAggregator::new(3);
        assert_eq!(
            aggregator.record(CompletedPart::new(3, "c")).unwrap(),
            AggregationProgress::Pending { received: 1, total: 3 }
        );
        aggregator.record(CompletedPart::new(1, "a")).unwrap();
        assert_eq!(
            aggregator.record(CompletedPart::new(2, "b")).unwrap(),
            AggregationProgress::Complete
        );

        let ordered = aggregator.into_ordered_parts().unwrap();
        assert_eq!(
            ordered,
            vec![
                CompletedPart::new(1, "a"),
                CompletedPart::new(2, "b"),
                CompletedPart::new(3, "c"),
            ]
        );
    }

    #[test]
    fn test_duplicate_index_rejected() {
        let mut aggregator = PartAggregator::new(2);
        aggregator.record(CompletedPart::new(1, "a")).unwrap();
        assert!(aggregator.record(CompletedPart::new(1, "a2")).is_err());
        assert_eq!(aggregator.len(), 1);
    }

    #[test]
    fn test_index_out_of_range_rejected() {
        let mut aggregator = PartAggregator::new(2);
        assert!(aggregator.record(CompletedPart::new(0, "z")).is_err());
        assert!(aggregator.record(CompletedPart::new(3, "z")).is_err());
        assert!(aggregator.is_empty());
    }

    #[test]
    fn test_incomplete_cannot_be_ordered() {
        let mut aggregator = PartAggregator::new(3);
        aggregator.record(CompletedPart::new(1, "a")).unwrap();
        aggregator.record(CompletedPart::new(3, "c")).unwrap();

        let err = aggregator.into_ordered_parts().unwrap_err();
        match err {
            UploadError::IncompleteUpload(message) => assert!(message.contains("[2]")),
            other => panic!("unexpected error: {}", other),
        }
    }
}
