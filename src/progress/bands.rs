//! Sub-phase percentage bands for the GENERATING stage.
//!
//! Each sub-phase owns a disjoint slice of the overall 0-100 range, in order,
//! so a sub-phase's own 0-100% maps onto its slice and the overall bar keeps
//! moving forward across sub-phases.

use serde::{Deserialize, Serialize};

use crate::error::ProgressError;

/// Configured sub-phase: a name and a relative weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandSpec {
    pub name: String,
    pub weight: f64,
}

impl BandSpec {
    pub fn new(name: impl Into<String>, weight: f64) -> Self {
        Self {
            name: name.into(),
            weight,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Band {
    pub name: String,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationBands {
    bands: Vec<Band>,
}

impl GenerationBands {
    pub fn from_specs(specs: &[BandSpec]) -> Result<Self, ProgressError> {
        if specs.is_empty() {
            return Err(ProgressError::InvalidBands(
                "at least one generation band is required".to_string(),
            ));
        }
        if let Some(bad) = specs
            .iter()
            .find(|spec| !spec.weight.is_finite() || spec.weight <= 0.0)
        {
            return Err(ProgressError::InvalidBands(format!(
                "band '{}' has non-positive weight {}",
                bad.name, bad.weight
            )));
        }

        let total: f64 = specs.iter().map(|spec| spec.weight).sum();
        let mut bands = Vec::with_capacity(specs.len());
        let mut cumulative = 0.0;
        for (index, spec) in specs.iter().enumerate() {
            let start = cumulative / total * 100.0;
            cumulative += spec.weight;
            let end = if index + 1 == specs.len() {
                100.0
            } else {
                cumulative / total * 100.0
            };
            bands.push(Band {
                name: spec.name.clone(),
                start,
                end,
            });
        }
        Ok(Self { bands })
    }

    /// Equal-width bands.
    pub fn even(names: &[&str]) -> Result<Self, ProgressError> {
        let specs: Vec<BandSpec> = names.iter().map(|name| BandSpec::new(*name, 1.0)).collect();
        Self::from_specs(&specs)
    }

    pub fn band(&self, phase: usize) -> Option<&Band> {
        self.bands.get(phase)
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    /// Overall percentage for `percent` of sub-phase `phase`.
    pub fn map(&self, phase: usize, percent: f64) -> Result<f64, ProgressError> {
        let band = self.band(phase).ok_or(ProgressError::UnknownSubPhase {
            phase,
            bands: self.bands.len(),
        })?;
        let percent = if percent.is_nan() {
            0.0
        } else {
            percent.clamp(0.0, 100.0)
        };
        Ok(band.start + percent / 100.0 * (band.end - band.start))
    }
}

impl Default for GenerationBands {
    fn default() -> Self {
        Self {
            bands: vec![
                Band {
                    name: "draft".to_string(),
                    start: 0.0,
                    end: 50.0,
                },
                Band {
                    name: "refine".to_string(),
                    start: 50.0,
                    end: 100.0,
                },
            ],
        }
    }
}

pub(crate) fn default_band_specs() -> Vec<BandSpec> {
    vec![BandSpec::new("draft", 50.0), BandSpec::new("refine", 50.0)]
}
