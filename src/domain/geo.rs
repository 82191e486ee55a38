//! Great-circle distance on a spherical Earth

/// Mean Earth radius in statute miles
pub const EARTH_RADIUS_MILES: f64 = 3959.0;

/// Meters per statute mile, used to convert routing-service distances
pub const METERS_PER_MILE: f64 = 1609.34;

/// Haversine distance between two coordinates, in miles.
///
/// Pure and symmetric; identical inputs yield exactly 0.
#[inline]
pub fn haversine_miles(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin() * (dlat / 2.0).sin()
        + lat1.to_radians().cos()
            * lat2.to_radians().cos()
            * (dlon / 2.0).sin()
            * (dlon / 2.0).sin();
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_MILES * c
}

#[cfg(test)]
mod tests {
    use super::*;

    const MILES_PER_DEGREE_LAT: f64 = EARTH_RADIUS_MILES * std::f64::consts::PI / 180.0;

    #[test]
    fn test_zero_distance() {
        assert_eq!(haversine_miles(32.3, -86.3, 32.3, -86.3), 0.0);
    }

    #[test]
    fn test_symmetric() {
        let ab = haversine_miles(32.32177734375, -86.33056640625, 37.4419, -121.9080);
        let ba = haversine_miles(37.4419, -121.9080, 32.32177734375, -86.33056640625);
        assert!((ab - ba).abs() < 1e-6);
    }

    #[test]
    fn test_one_degree_latitude() {
        let d = haversine_miles(0.0, 0.0, 1.0, 0.0);
        assert!((d - MILES_PER_DEGREE_LAT).abs() < 1e-6);
    }

    #[test]
    fn test_known_city_pair() {
        // Montgomery, AL -> Milpitas, CA is roughly 2000 miles great-circle
        let d = haversine_miles(32.3668, -86.3000, 37.4323, -121.8996);
        assert!(d > 1950.0 && d < 2050.0, "got {d}");
    }
}
