use crate::survey::types::{Bounds, GeoPoint};
use geo::Area;
use geo_types::{LineString, Polygon};

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Metres spanned by one degree of latitude on the reference sphere
pub const METERS_PER_DEGREE: f64 = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;

/// Convert survey points to a geo_types Polygon (x = lng, y = lat)
fn to_geo_polygon(points: &[GeoPoint]) -> Polygon<f64> {
    let coords: Vec<(f64, f64)> = points.iter().map(|p| (p.lng, p.lat)).collect();
    Polygon::new(LineString::from(coords), vec![])
}

/// Even-odd ray casting. Polygons with fewer than 3 vertices contain nothing.
pub fn point_in_polygon(point: GeoPoint, polygon: &[GeoPoint]) -> bool {
    if polygon.len() < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (pi, pj) = (polygon[i], polygon[j]);
        let crosses = (pi.lat > point.lat) != (pj.lat > point.lat)
            && point.lng < (pj.lng - pi.lng) * (point.lat - pi.lat) / (pj.lat - pi.lat) + pi.lng;
        if crosses {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Shoelace area in squared coordinate units (degrees²)
pub fn polygon_area(polygon: &[GeoPoint]) -> f64 {
    if polygon.len() < 3 {
        return 0.0;
    }
    to_geo_polygon(polygon).unsigned_area()
}

/// Min/max reduction over the points
pub fn bounds_of(points: &[GeoPoint]) -> Option<Bounds> {
    if points.is_empty() {
        return None;
    }

    let mut min_lat = f64::MAX;
    let mut min_lng = f64::MAX;
    let mut max_lat = f64::MIN;
    let mut max_lng = f64::MIN;

    for p in points {
        min_lat = min_lat.min(p.lat);
        max_lat = max_lat.max(p.lat);
        min_lng = min_lng.min(p.lng);
        max_lng = max_lng.max(p.lng);
    }

    Some(Bounds {
        south_west: GeoPoint::new(min_lat, min_lng),
        north_east: GeoPoint::new(max_lat, max_lng),
    })
}

/// Grow bounds by `amount` (coordinate units) on every side
pub fn expand_bounds(bounds: &Bounds, amount: f64) -> Bounds {
    Bounds {
        south_west: GeoPoint::new(bounds.south_west.lat - amount, bounds.south_west.lng - amount),
        north_east: GeoPoint::new(bounds.north_east.lat + amount, bounds.north_east.lng + amount),
    }
}

/// Great-circle distance in metres
pub fn haversine_distance_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let d_phi = (b.lat - a.lat).to_radians();
    let d_lambda = (b.lng - a.lng).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}

/// Arithmetic mean of the finite points. `{0, 0}` means "unknown".
pub fn centroid(points: &[GeoPoint]) -> GeoPoint {
    let valid: Vec<&GeoPoint> = points.iter().filter(|p| p.is_valid()).collect();
    if valid.is_empty() {
        return GeoPoint::new(0.0, 0.0);
    }

    let n = valid.len() as f64;
    let lat = valid.iter().map(|p| p.lat).sum::<f64>() / n;
    let lng = valid.iter().map(|p| p.lng).sum::<f64>() / n;
    GeoPoint::new(lat, lng)
}

/// Project `p` to local east/north metres around `origin` (equirectangular)
fn to_local_meters(origin: GeoPoint, p: GeoPoint) -> (f64, f64) {
    let x = (p.lng - origin.lng).to_radians() * EARTH_RADIUS_M * origin.lat.to_radians().cos();
    let y = (p.lat - origin.lat).to_radians() * EARTH_RADIUS_M;
    (x, y)
}

/// Point displaced by the given north/east offsets in metres
pub fn offset_meters(origin: GeoPoint, north_m: f64, east_m: f64) -> GeoPoint {
    let lat = origin.lat + meters_to_degrees(north_m);
    let lng = origin.lng + meters_to_degrees(east_m) / origin.lat.to_radians().cos();
    GeoPoint::new(lat, lng)
}

pub fn meters_to_degrees(meters: f64) -> f64 {
    meters / METERS_PER_DEGREE
}

/// Polygon area in m², projected around the centroid
pub fn polygon_area_m2(polygon: &[GeoPoint]) -> f64 {
    if polygon.len() < 3 {
        return 0.0;
    }
    let origin = centroid(polygon);
    let local: Vec<GeoPoint> = polygon
        .iter()
        .map(|p| {
            let (x, y) = to_local_meters(origin, *p);
            GeoPoint::new(y, x)
        })
        .collect();
    to_geo_polygon(&local).unsigned_area()
}

/// Sum of haversine edge lengths, closing edge included
pub fn polygon_perimeter_m(polygon: &[GeoPoint]) -> f64 {
    if polygon.len() < 3 {
        return 0.0;
    }
    (0..polygon.len())
        .map(|i| haversine_distance_m(polygon[i], polygon[(i + 1) % polygon.len()]))
        .sum()
}

/// Shortest distance in metres from `point` to any polygon edge
pub fn distance_to_boundary_m(point: GeoPoint, polygon: &[GeoPoint]) -> f64 {
    if polygon.len() < 3 {
        return 0.0;
    }

    let mut best = f64::MAX;
    for i in 0..polygon.len() {
        let a = to_local_meters(point, polygon[i]);
        let b = to_local_meters(point, polygon[(i + 1) % polygon.len()]);
        best = best.min(distance_origin_to_segment(a, b));
    }
    best
}

fn distance_origin_to_segment(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq > 0.0 {
        (-(a.0 * dx + a.1 * dy) / len_sq).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let (cx, cy) = (a.0 + t * dx, a.1 + t * dy);
    (cx * cx + cy * cy).sqrt()
}

/// Rough area of a bounds box in m²: south edge length times west edge length
pub fn bounds_area_m2(bounds: &Bounds) -> f64 {
    let sw = bounds.south_west;
    let lat_distance = haversine_distance_m(sw, GeoPoint::new(bounds.north_east.lat, sw.lng));
    let lng_distance = haversine_distance_m(sw, GeoPoint::new(sw.lat, bounds.north_east.lng));
    lat_distance * lng_distance
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Contains;

    fn square(size: f64) -> Vec<GeoPoint> {
        vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, size),
            GeoPoint::new(size, size),
            GeoPoint::new(size, 0.0),
        ]
    }

    #[test]
    fn test_degenerate_polygons() {
        let line = vec![GeoPoint::new(0.0, 0.0), GeoPoint::new(1.0, 1.0)];
        assert!(!point_in_polygon(GeoPoint::new(0.5, 0.5), &line));
        assert!(!point_in_polygon(GeoPoint::new(0.0, 0.0), &[]));
        assert_eq!(polygon_area(&line), 0.0);
        assert_eq!(polygon_area(&[]), 0.0);
        assert_eq!(polygon_area_m2(&line), 0.0);
        assert_eq!(polygon_perimeter_m(&line), 0.0);
    }

    #[test]
    fn test_point_in_convex_polygon() {
        let poly = square(4.0);
        assert!(point_in_polygon(GeoPoint::new(2.0, 2.0), &poly));
        assert!(!point_in_polygon(GeoPoint::new(50.0, -50.0), &poly));
        assert!(!point_in_polygon(GeoPoint::new(2.0, 4.5), &poly));
    }

    #[test]
    fn test_point_in_concave_polygon_matches_geo() {
        // U shape opening to the north
        let poly = vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 3.0),
            GeoPoint::new(3.0, 3.0),
            GeoPoint::new(3.0, 2.0),
            GeoPoint::new(1.0, 2.0),
            GeoPoint::new(1.0, 1.0),
            GeoPoint::new(3.0, 1.0),
            GeoPoint::new(3.0, 0.0),
        ];
        let geo_poly = to_geo_polygon(&poly);

        for p in [
            GeoPoint::new(2.0, 1.5),
            GeoPoint::new(0.5, 1.5),
            GeoPoint::new(2.5, 0.5),
            GeoPoint::new(2.5, 2.5),
        ] {
            let expected = geo_poly.contains(&geo_types::Point::new(p.lng, p.lat));
            assert_eq!(point_in_polygon(p, &poly), expected, "mismatch at {:?}", p);
        }
        assert!(!point_in_polygon(GeoPoint::new(2.0, 1.5), &poly));
    }

    #[test]
    fn test_polygon_area_shoelace() {
        assert_eq!(polygon_area(&square(3.0)), 9.0);
        let triangle = vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 4.0),
            GeoPoint::new(2.0, 0.0),
        ];
        assert_eq!(polygon_area(&triangle), 4.0);
    }

    #[test]
    fn test_bounds_and_expand() {
        assert!(bounds_of(&[]).is_none());
        let bounds = bounds_of(&[GeoPoint::new(1.0, 5.0), GeoPoint::new(-1.0, 2.0)]).unwrap();
        assert_eq!(bounds.south_west, GeoPoint::new(-1.0, 2.0));
        assert_eq!(bounds.north_east, GeoPoint::new(1.0, 5.0));

        let expanded = expand_bounds(&bounds, 0.5);
        assert_eq!(expanded.south_west, GeoPoint::new(-1.5, 1.5));
        assert_eq!(expanded.north_east, GeoPoint::new(1.5, 5.5));
    }

    #[test]
    fn test_haversine_one_degree_of_latitude() {
        let d = haversine_distance_m(GeoPoint::new(0.0, 0.0), GeoPoint::new(1.0, 0.0));
        assert!((d - METERS_PER_DEGREE).abs() < 1e-6);
        assert_eq!(haversine_distance_m(GeoPoint::new(3.0, 4.0), GeoPoint::new(3.0, 4.0)), 0.0);
    }

    #[test]
    fn test_centroid_sentinel_and_mean() {
        assert_eq!(centroid(&[]), GeoPoint::new(0.0, 0.0));
        assert_eq!(centroid(&[GeoPoint::new(f64::NAN, 1.0)]), GeoPoint::new(0.0, 0.0));
        let c = centroid(&[
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(2.0, 4.0),
            GeoPoint::new(f64::INFINITY, 0.0),
        ]);
        assert_eq!(c, GeoPoint::new(1.0, 2.0));
    }

    #[test]
    fn test_metric_area_and_perimeter_of_square_field() {
        let side = meters_to_degrees(40.0);
        let poly = square(side);
        let area = polygon_area_m2(&poly);
        let perimeter = polygon_perimeter_m(&poly);
        assert!((area - 1600.0).abs() < 1.0, "area was {}", area);
        assert!((perimeter - 160.0).abs() < 0.1, "perimeter was {}", perimeter);
    }

    #[test]
    fn test_distance_to_boundary() {
        let side = meters_to_degrees(40.0);
        let poly = square(side);
        let center = GeoPoint::new(side / 2.0, side / 2.0);
        let near_edge = GeoPoint::new(meters_to_degrees(5.0), side / 2.0);

        assert!((distance_to_boundary_m(center, &poly) - 20.0).abs() < 0.01);
        assert!((distance_to_boundary_m(near_edge, &poly) - 5.0).abs() < 0.01);
    }

    #[test]
    fn test_offset_meters_round_trip_distance() {
        let origin = GeoPoint::new(-0.68885, 34.78321);
        let moved = offset_meters(origin, 30.0, 40.0);
        assert!((haversine_distance_m(origin, moved) - 50.0).abs() < 0.05);
    }
}
