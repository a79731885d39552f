//! Memory geometry configuration
//!
//! One immutable struct enumerates every dimension of the external-memory
//! subsystem. Models embed it and instantiate each sub-component from it
//! exactly once; nothing is assembled dynamically and no global state exists.

use serde::{Deserialize, Serialize};

use crate::error::MemoryError;
use crate::MemoryResult;

/// Numeric floor used throughout the addressing machinery (zero-norm keys,
/// usage cumulative products). A stability contract, not a tunable.
pub const EPSILON: f64 = 1e-6;

/// Dimensions of the external memory and its heads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Number of addressable memory rows (slots)
    pub num_slots: usize,
    /// Width of each memory row
    pub slot_width: usize,
    /// Number of read heads
    pub num_reads: usize,
    /// Number of write heads
    pub num_writes: usize,
    /// Width of the shift kernel for location-based addressing.
    /// Must be odd; the center entry means zero displacement.
    pub num_shifts: usize,
    /// Numeric stability floor
    pub epsilon: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            num_slots: 128,
            slot_width: 20,
            num_reads: 1,
            num_writes: 1,
            num_shifts: 3,
            epsilon: EPSILON,
        }
    }
}

impl MemoryConfig {
    /// A small geometry for unit tests and quick experiments.
    pub fn tiny() -> Self {
        Self {
            num_slots: 16,
            slot_width: 8,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> MemoryResult<()> {
        if self.num_slots == 0 || self.slot_width == 0 {
            return Err(MemoryError::InvalidParameter(format!(
                "memory must be non-empty, got {} slots of width {}",
                self.num_slots, self.slot_width
            )));
        }
        if self.num_reads == 0 {
            return Err(MemoryError::InvalidParameter(
                "at least one read head is required".to_string(),
            ));
        }
        if self.num_shifts % 2 == 0 {
            return Err(MemoryError::InvalidParameter(format!(
                "shift kernel width must be odd, got {}",
                self.num_shifts
            )));
        }
        if self.num_shifts > self.num_slots {
            return Err(MemoryError::InvalidParameter(format!(
                "shift kernel width {} exceeds slot count {}",
                self.num_shifts, self.num_slots
            )));
        }
        if !(self.epsilon > 0.0 && self.epsilon < 1.0) {
            return Err(MemoryError::InvalidParameter(format!(
                "epsilon must lie in (0, 1), got {}",
                self.epsilon
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(MemoryConfig::default().validate().is_ok());
        assert!(MemoryConfig::tiny().validate().is_ok());
    }

    #[test]
    fn test_even_shift_width_rejected() {
        let config = MemoryConfig {
            num_shifts: 4,
            ..MemoryConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_reads_rejected() {
        let config = MemoryConfig {
            num_reads: 0,
            ..MemoryConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
