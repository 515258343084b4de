//! Memory configuration
//!
//! Sizing inputs for the pools and the staging ring. Device alignment
//! requirements are not configured here; they come from the adapter.

use serde::{Deserialize, Serialize};
use thiserror::Error;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be non-zero")]
    Zero { field: &'static str },

    #[error("{field} ({value}) must be a multiple of 4 bytes")]
    Unaligned { field: &'static str, value: u64 },

    #[error("{pool} pool initial size {initial} exceeds its maximum {max}")]
    InitialAboveMax {
        pool: &'static str,
        initial: u64,
        max: u64,
    },
}

/// Sizes of the process-wide GPU memory pools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Initial size of the unified vertex/index/indirect buffer
    pub geometry_initial_size: u64,
    /// Growth ceiling of the geometry buffer (also its largest size class)
    pub geometry_max_size: u64,
    /// Initial size of the scene record buffer
    pub scene_initial_size: u64,
    /// Growth ceiling of the scene record buffer
    pub scene_max_size: u64,
    /// Total bytes of the per-frame staging ring
    pub staging_ring_size: u64,
    /// Frames the GPU may still be working on while the CPU records the next
    pub frames_in_flight: u32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            geometry_initial_size: 32 * MIB,
            geometry_max_size: 128 * MIB,
            scene_initial_size: 2 * MIB,
            scene_max_size: 64 * MIB,
            staging_ring_size: 24 * MIB,
            frames_in_flight: 3,
        }
    }
}

impl MemoryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sizes = [
            ("geometry_initial_size", self.geometry_initial_size),
            ("geometry_max_size", self.geometry_max_size),
            ("scene_initial_size", self.scene_initial_size),
            ("scene_max_size", self.scene_max_size),
            ("staging_ring_size", self.staging_ring_size),
        ];
        for (field, value) in sizes {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
            if value % 4 != 0 {
                return Err(ConfigError::Unaligned { field, value });
            }
        }
        if self.frames_in_flight == 0 {
            return Err(ConfigError::Zero {
                field: "frames_in_flight",
            });
        }
        if self.geometry_initial_size > self.geometry_max_size {
            return Err(ConfigError::InitialAboveMax {
                pool: "geometry",
                initial: self.geometry_initial_size,
                max: self.geometry_max_size,
            });
        }
        if self.scene_initial_size > self.scene_max_size {
            return Err(ConfigError::InitialAboveMax {
                pool: "scene",
                initial: self.scene_initial_size,
                max: self.scene_max_size,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = MemoryConfig::default();
        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn rejects_bad_sizes() {
        let config = MemoryConfig {
            staging_ring_size: 1023,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::Unaligned {
                field: "staging_ring_size",
                value: 1023
            })
        );

        let config = MemoryConfig {
            frames_in_flight: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Zero { .. })));

        let config = MemoryConfig {
            scene_initial_size: 8 * MIB,
            scene_max_size: 4 * MIB,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InitialAboveMax { pool: "scene", .. })
        ));
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: MemoryConfig =
            serde_json::from_str(r#"{ "staging_ring_size": 1048576, "frames_in_flight": 2 }"#)
                .expect("valid json");
        assert_eq!(config.staging_ring_size, MIB);
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.geometry_max_size, MemoryConfig::default().geometry_max_size);
    }
}
