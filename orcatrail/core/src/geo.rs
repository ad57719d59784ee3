use serde::{Deserialize, Serialize};

const EARTH_RADIUS_KM: f64 = 6371.0;
const KM_PER_DEGREE_LAT: f64 = 111.32;

/// WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude.
    pub lat: f64,
    /// Longitude.
    pub lon: f64,
}

impl GeoPoint {
    /// Creates a point.
    #[must_use]
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Haversine distance in kilometres.
    #[must_use]
    pub fn distance_km(&self, other: &Self) -> f64 {
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lon = (other.lon - self.lon).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + self.lat.to_radians().cos() * other.lat.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
    }
}

/// Axis-aligned latitude/longitude box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Southern edge.
    pub min_lat: f64,
    /// Western edge.
    pub min_lon: f64,
    /// Northern edge.
    pub max_lat: f64,
    /// Eastern edge.
    pub max_lon: f64,
}

impl BoundingBox {
    /// Box enclosing a circle of `radius_km` around `center`.
    #[must_use]
    pub fn around(center: GeoPoint, radius_km: f64) -> Self {
        let d_lat = radius_km / KM_PER_DEGREE_LAT;
        let d_lon = radius_km / (KM_PER_DEGREE_LAT * center.lat.to_radians().cos().abs().max(0.01));
        Self {
            min_lat: center.lat - d_lat,
            min_lon: center.lon - d_lon,
            max_lat: center.lat + d_lat,
            max_lon: center.lon + d_lon,
        }
    }

    /// Whether the point lies inside the box.
    #[must_use]
    pub fn contains(&self, point: &GeoPoint) -> bool {
        (self.min_lat..=self.max_lat).contains(&point.lat)
            && (self.min_lon..=self.max_lon).contains(&point.lon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_matches_known_distance() {
        // Friday Harbor to Lime Kiln lighthouse is roughly 10 km.
        let friday_harbor = GeoPoint::new(48.5343, -123.0171);
        let lime_kiln = GeoPoint::new(48.5159, -123.1524);
        let d = friday_harbor.distance_km(&lime_kiln);
        assert!((9.0..12.0).contains(&d), "distance was {d}");
        assert!(friday_harbor.distance_km(&friday_harbor) < 1e-9);
    }

    #[test]
    fn bounding_box_encloses_radius() {
        let center = GeoPoint::new(48.5, -123.0);
        let bounds = BoundingBox::around(center, 10.0);
        assert!(bounds.contains(&center));
        assert!(bounds.contains(&GeoPoint::new(48.55, -123.05)));
        assert!(!bounds.contains(&GeoPoint::new(49.0, -123.0)));
    }
}
