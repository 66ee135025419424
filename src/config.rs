// Copyright 2020 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! `BaqConfig`: the tunable defaults (`d`, `e`, `b`, `minQ`) plus the
//! facade's mode selection, deserialisable from a YAML sidecar the way
//! the calling code's own scenario grammar loads from a config file.

use serde_derive::{Deserialize, Serialize};

use crate::facade::{CalculationMode, QualityMode};
use crate::hmm::HmmConfig;

/// Facade mode names, mirrored here so `BaqConfig` can derive
/// `Deserialize` without requiring it upstream on `facade`'s own enums.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CalculationModeConfig {
    None,
    AsNecessary,
    Recalculate,
}

impl From<CalculationModeConfig> for CalculationMode {
    fn from(value: CalculationModeConfig) -> Self {
        match value {
            CalculationModeConfig::None => CalculationMode::None,
            CalculationModeConfig::AsNecessary => CalculationMode::AsNecessary,
            CalculationModeConfig::Recalculate => CalculationMode::Recalculate,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QualityModeConfig {
    AddTag,
    OverwriteQuals,
    DontModify,
}

impl From<QualityModeConfig> for QualityMode {
    fn from(value: QualityModeConfig) -> Self {
        match value {
            QualityModeConfig::AddTag => QualityMode::AddTag,
            QualityModeConfig::OverwriteQuals => QualityMode::OverwriteQuals,
            QualityModeConfig::DontModify => QualityMode::DontModify,
        }
    }
}

/// Everything needed to construct an [`HmmConfig`] and a
/// [`crate::facade::BaqFacade`] from a sidecar file instead of code.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BaqConfig {
    pub gap_open: f64,
    pub gap_extend: f64,
    pub band: i32,
    pub min_qual: u8,
    pub calculation_mode: CalculationModeConfig,
    pub quality_mode: QualityModeConfig,
}

impl Default for BaqConfig {
    fn default() -> Self {
        let hmm = HmmConfig::default();
        BaqConfig {
            gap_open: hmm.gap_open,
            gap_extend: hmm.gap_extend,
            band: hmm.band,
            min_qual: hmm.min_qual,
            calculation_mode: CalculationModeConfig::AsNecessary,
            quality_mode: QualityModeConfig::AddTag,
        }
    }
}

impl BaqConfig {
    pub fn hmm_config(&self) -> HmmConfig {
        HmmConfig {
            gap_open: self.gap_open,
            gap_extend: self.gap_extend,
            band: self.band,
            min_qual: self.min_qual,
        }
    }

    pub fn from_yaml(yaml: &str) -> serde_yaml::Result<Self> {
        serde_yaml::from_str(yaml)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_hmm_defaults() {
        let config = BaqConfig::default();
        let hmm = HmmConfig::default();
        assert_eq!(config.gap_open, hmm.gap_open);
        assert_eq!(config.gap_extend, hmm.gap_extend);
        assert_eq!(config.band, hmm.band);
        assert_eq!(config.min_qual, hmm.min_qual);
    }

    #[test]
    fn yaml_round_trip_overrides_defaults() {
        let yaml = "
gap_open: 0.002
gap_extend: 0.2
band: 11
min_qual: 6
calculation_mode: recalculate
quality_mode: overwrite-quals
";
        let config = BaqConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.band, 11);
        assert_eq!(config.calculation_mode, CalculationModeConfig::Recalculate);
        assert_eq!(config.quality_mode, QualityModeConfig::OverwriteQuals);
    }
}
