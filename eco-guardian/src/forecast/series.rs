//! Validated per-municipality deforestation series.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::regions::{Biome, Uf};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SeriesError {
    #[error("municipality {municipality}: series is empty")]
    Empty { municipality: String },

    #[error("municipality {municipality}: year {year} does not follow {previous}")]
    YearsNotIncreasing {
        municipality: String,
        previous: i32,
        year: i32,
    },

    #[error("municipality {municipality}: invalid area {value} in {year}")]
    InvalidArea {
        municipality: String,
        year: i32,
        value: f64,
    },
}

/// One annual observation, in hectares converted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub year: i32,
    pub area: f64,
}

/// Annual deforested area of one municipality.
///
/// Years are strictly increasing and areas are finite and non-negative;
/// missing years are allowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MunicipalSeries {
    municipality: String,
    state: Uf,
    biome: Option<Biome>,
    observations: Vec<Observation>,
    /// Remaining forest area at the last observed year
    forest_area: Option<f64>,
    /// Farm area at the last observed year
    farm_area: Option<f64>,
}

impl MunicipalSeries {
    pub fn new(
        municipality: impl Into<String>,
        state: Uf,
        observations: Vec<Observation>,
    ) -> Result<Self, SeriesError> {
        let municipality = municipality.into();
        if observations.is_empty() {
            return Err(SeriesError::Empty { municipality });
        }

        for pair in observations.windows(2) {
            if pair[1].year <= pair[0].year {
                return Err(SeriesError::YearsNotIncreasing {
                    municipality,
                    previous: pair[0].year,
                    year: pair[1].year,
                });
            }
        }
        if let Some(bad) = observations
            .iter()
            .find(|o| !o.area.is_finite() || o.area < 0.0)
        {
            return Err(SeriesError::InvalidArea {
                municipality,
                year: bad.year,
                value: bad.area,
            });
        }

        Ok(Self {
            municipality,
            state,
            biome: None,
            observations,
            forest_area: None,
            farm_area: None,
        })
    }

    pub fn with_biome(mut self, biome: Option<Biome>) -> Self {
        self.biome = biome;
        self
    }

    /// Attach land-use areas; negative or non-finite values are ignored.
    pub fn with_land_use(mut self, forest_area: Option<f64>, farm_area: Option<f64>) -> Self {
        let valid = |v: Option<f64>| v.filter(|a| a.is_finite() && *a >= 0.0);
        self.forest_area = valid(forest_area);
        self.farm_area = valid(farm_area);
        self
    }

    pub fn municipality(&self) -> &str {
        &self.municipality
    }

    pub fn state(&self) -> Uf {
        self.state
    }

    pub fn biome(&self) -> Option<Biome> {
        self.biome
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn first_year(&self) -> i32 {
        self.observations.first().map_or(0, |o| o.year)
    }

    pub fn last_year(&self) -> i32 {
        self.observations.last().map_or(0, |o| o.year)
    }

    pub fn area_in(&self, year: i32) -> Option<f64> {
        self.observations
            .binary_search_by_key(&year, |o| o.year)
            .ok()
            .map(|idx| self.observations[idx].area)
    }

    pub fn forest_area(&self) -> Option<f64> {
        self.forest_area
    }

    pub fn farm_area(&self) -> Option<f64> {
        self.farm_area
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(points: &[(i32, f64)]) -> Vec<Observation> {
        points
            .iter()
            .map(|(year, area)| Observation {
                year: *year,
                area: *area,
            })
            .collect()
    }

    #[test]
    fn test_gaps_allowed() {
        let series =
            MunicipalSeries::new("1500107", Uf::Para, obs(&[(2015, 10.0), (2018, 12.0)])).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.area_in(2018), Some(12.0));
        assert_eq!(series.area_in(2016), None);
        assert_eq!((series.first_year(), series.last_year()), (2015, 2018));
    }

    #[test]
    fn test_rejects_unordered_years() {
        let err = MunicipalSeries::new("x", Uf::Para, obs(&[(2018, 1.0), (2018, 2.0)])).unwrap_err();
        assert!(matches!(err, SeriesError::YearsNotIncreasing { year: 2018, .. }));
    }

    #[test]
    fn test_rejects_negative_and_empty() {
        let err = MunicipalSeries::new("x", Uf::Para, obs(&[(2018, -1.0)])).unwrap_err();
        assert!(matches!(err, SeriesError::InvalidArea { .. }));
        assert!(MunicipalSeries::new("x", Uf::Para, vec![]).is_err());
    }

    #[test]
    fn test_land_use_filters_invalid() {
        let series = MunicipalSeries::new("x", Uf::Acre, obs(&[(2020, 1.0)]))
            .unwrap()
            .with_land_use(Some(500.0), Some(-3.0));
        assert_eq!(series.forest_area(), Some(500.0));
        assert_eq!(series.farm_area(), None);
    }
}
