use anyhow::{Error, Result};
use serde::{Deserialize, Serialize};

/// Config for an ITQ-LSH index.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ItqLshConfig {
    /// Size of each hash table. Bucket ids are always in `[0, table_size)`.
    /// Default: 521
    pub table_size: u32,

    /// Number of hash tables. A vector is inserted into every table, so more
    /// tables trade memory for recall.
    /// Default: 4
    pub num_tables: usize,

    /// Number of dimensions of the input vectors.
    /// Default: 128
    pub num_features: usize,

    /// Length of the learned binary code, i.e. the number of principal
    /// directions kept per table. Must not exceed `num_features`.
    /// Default: 8
    pub num_bits: usize,

    /// Number of vectors sampled from the dataset to train each table.
    /// Default: 100
    pub num_training_samples: usize,

    /// Number of rotation-refinement sweeps per table during training.
    /// Don't change unless you know what you're doing.
    /// Default: 50
    pub max_iteration: usize,
}

impl ItqLshConfig {
    pub fn validate(&self) -> Result<()> {
        if self.table_size == 0 {
            return Err(Error::msg("Table size must be at least 1"));
        }
        if self.num_tables == 0 {
            return Err(Error::msg("Number of tables must be at least 1"));
        }
        if self.num_bits == 0 {
            return Err(Error::msg("Code length must be at least 1"));
        }
        if self.num_bits > self.num_features {
            return Err(Error::msg(
                "Code length must not exceed the number of features",
            ));
        }
        // The sample covariance is normalized by (num_training_samples - 1).
        if self.num_training_samples < 2 {
            return Err(Error::msg("Training sample size must be at least 2"));
        }
        Ok(())
    }
}

impl Default for ItqLshConfig {
    fn default() -> Self {
        Self {
            table_size: 521,
            num_tables: 4,
            num_features: 128,
            num_bits: 8,
            num_training_samples: 100,
            max_iteration: 50,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ItqLshConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_configs_are_rejected() {
        let valid = ItqLshConfig::default();

        let mut config = valid.clone();
        config.table_size = 0;
        assert!(config.validate().is_err());

        let mut config = valid.clone();
        config.num_tables = 0;
        assert!(config.validate().is_err());

        let mut config = valid.clone();
        config.num_bits = 0;
        assert!(config.validate().is_err());

        let mut config = valid.clone();
        config.num_bits = config.num_features + 1;
        assert!(config.validate().is_err());

        let mut config = valid;
        config.num_training_samples = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_code_length_equal_to_dimension_is_valid() {
        let config = ItqLshConfig {
            num_features: 8,
            num_bits: 8,
            ..ItqLshConfig::default()
        };
        assert!(config.validate().is_ok());
    }
}
