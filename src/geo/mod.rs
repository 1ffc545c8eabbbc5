use crate::models::service::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6_371.0;
const AVERAGE_SPEED_KMH: f64 = 30.0;
const MIN_PICKUP_MINUTES: u32 = 1;
const MAX_PICKUP_MINUTES: u32 = 60;

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().asin();

    EARTH_RADIUS_KM * central_angle
}

/// Minutes to cover `distance_km` at the average city speed, rounded up and
/// clamped to [1, 60].
pub fn estimate_arrival_minutes(distance_km: f64) -> u32 {
    let minutes = (distance_km / AVERAGE_SPEED_KMH * 60.0).ceil() as u32;
    minutes.clamp(MIN_PICKUP_MINUTES, MAX_PICKUP_MINUTES)
}

pub fn estimated_pickup_minutes(driver: &GeoPoint, origin: &GeoPoint) -> u32 {
    estimate_arrival_minutes(haversine_km(driver, origin))
}
