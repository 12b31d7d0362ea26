//! Part Calculator
//!
//! Calculates how to split a file into parts for a multipart upload

use crate::error::{Result, UploadError};
use crate::models::{ByteRange, Part};
use tracing::debug;

/// Calculator for splitting files into fixed-size parts
#[derive(Debug, Clone, Copy)]
pub struct PartCalculator {
    /// Maximum size of each part in bytes
    part_size: u64,
}

impl PartCalculator {
    /// Create a new PartCalculator
    ///
    /// # Arguments
    /// * `part_size` - Maximum size of each part in bytes, must be > 0
    pub fn new(part_size: u64) -> Result<Self> {
        if part_size == 0 {
            return Err(UploadError::ConfigError(
                "part_size must be greater than 0".to_string(),
            ));
        }
        Ok(PartCalculator { part_size })
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    /// Calculate the total number of parts needed for a file
    pub fn calculate_total_parts(&self, file_size: u64) -> usize {
        file_size.div_ceil(self.part_size) as usize
    }

    /// Calculate the parts for a file
    ///
    /// # Behavior
    /// - Parts are indexed from 1 and cover `0..file_size` without gaps
    /// - Each part except possibly the last is exactly `part_size` bytes
    /// - A zero-sized file yields no parts; callers reject it beforehand
    pub fn calculate_parts(&self, file_size: u64) -> Result<Vec<Part>> {
        if file_size == 0 {
            debug!("File size is 0, returning empty part list");
            return Ok(Vec::new());
        }

        let mut parts = Vec::with_capacity(self.calculate_total_parts(file_size));
        let mut current_pos = 0u64;
        let mut index = 1u32;

        loop {
            let len = (file_size - current_pos).min(self.part_size);
            let part_end = current_pos + len - 1;
            parts.push(Part::new(index, ByteRange::new(current_pos, part_end)?));

            if part_end == file_size - 1 {
                break;
            }
            current_pos = part_end + 1;
            index = index.checked_add(1).ok_or_else(|| {
                UploadError::ConfigError(format!(
                    "{} bytes in {} byte parts exceeds the part numbering range",
                    file_size, self.part_size
                ))
            })?;
        }

        debug!(
            "Calculated {} parts (file_size={}, part_size={})",
            parts.len(),
            file_size,
            self.part_size
        );

        Ok(parts)
    }
}
