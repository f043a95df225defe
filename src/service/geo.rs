//! Great-circle distances

/// Mean Earth radius used by the haversine formula (km)
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Search radius used when the caller gives none (km)
pub const DEFAULT_RADIUS_KM: f64 = 5.0;

/// Haversine distance between two WGS84 points, in kilometres
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Latitude/longitude box enclosing a circle, used to pre-filter rows
/// before the exact haversine check
pub fn bounding_box(lat: f64, lng: f64, radius_km: f64) -> (f64, f64, f64, f64) {
    let d_lat = (radius_km / EARTH_RADIUS_KM).to_degrees();
    let cos_lat = lat.to_radians().cos().abs().max(1e-6);
    let d_lng = (radius_km / (EARTH_RADIUS_KM * cos_lat)).to_degrees().min(180.0);

    (
        (lat - d_lat).max(-90.0),
        (lat + d_lat).min(90.0),
        (lng - d_lng).max(-180.0),
        (lng + d_lng).min(180.0),
    )
}

pub fn valid_coordinates(lat: f64, lng: f64) -> bool {
    lat.is_finite() && lng.is_finite() && (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng)
}
