use std::{fs, path::Path};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use orcatrail_core::{BehaviorTag, GeoPoint, Region};
use serde::{Deserialize, Serialize};

/// Past observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sighting {
    /// Where.
    pub point: GeoPoint,
    /// When.
    pub observed_on: NaiveDate,
    /// Dominant behaviour, when recorded.
    #[serde(default)]
    pub behavior: Option<BehaviorTag>,
    /// Observer confidence in the identification.
    #[serde(default = "full_confidence")]
    pub confidence: f32,
}

const fn full_confidence() -> f32 {
    1.0
}

/// Read-only historical sightings.
pub trait HistoricalCorpus: Send + Sync {
    /// Sightings within `radius_km` of `point`.
    fn near(&self, point: &GeoPoint, radius_km: f64) -> Vec<Sighting>;

    /// Sightings inside a region.
    fn in_region(&self, region: &Region) -> Vec<Sighting> {
        self.near(&region.center, region.radius_km)
    }

    /// Number of stored sightings.
    fn size(&self) -> usize;
}

/// Corpus held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCorpus {
    sightings: Vec<Sighting>,
}

impl InMemoryCorpus {
    /// Wraps a list of sightings.
    #[must_use]
    pub fn new(sightings: Vec<Sighting>) -> Self {
        Self { sightings }
    }

    /// Loads a JSON array of sightings.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading sightings corpus {}", path.display()))?;
        let sightings: Vec<Sighting> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing sightings corpus {}", path.display()))?;
        Ok(Self::new(sightings))
    }

    /// All sightings.
    #[must_use]
    pub fn sightings(&self) -> &[Sighting] {
        &self.sightings
    }
}

impl HistoricalCorpus for InMemoryCorpus {
    fn near(&self, point: &GeoPoint, radius_km: f64) -> Vec<Sighting> {
        self.sightings
            .iter()
            .filter(|sighting| sighting.point.distance_km(point) <= radius_km)
            .cloned()
            .collect()
    }

    fn size(&self) -> usize {
        self.sightings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn loads_json_and_queries_by_proximity() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sightings.json");
        fs::write(
            &path,
            r#"[
                {"point": {"lat": 48.516, "lon": -123.152}, "observed_on": "2023-07-14", "behavior": "foraging"},
                {"point": {"lat": 48.520, "lon": -123.150}, "observed_on": "2023-08-02", "confidence": 0.5},
                {"point": {"lat": 48.783, "lon": -123.045}, "observed_on": "2022-06-30"}
            ]"#,
        )
        .unwrap();
        let corpus = InMemoryCorpus::load(&path).unwrap();
        assert_eq!(corpus.size(), 3);
        let near = corpus.near(&GeoPoint::new(48.5159, -123.1524), 5.0);
        assert_eq!(near.len(), 2);
        assert_eq!(near[0].behavior, Some(BehaviorTag::Foraging));
        assert_eq!(near[0].confidence, 1.0);
    }

    #[test]
    fn load_reports_the_path() {
        let err = InMemoryCorpus::load("/nonexistent/sightings.json").unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/sightings.json"));
    }
}
