// Coverage grid builder: turns a field polygon into a serpentine flight path
// of interior sample points.

use crate::survey::geometry::{
    bounds_of, point_in_polygon, polygon_area, polygon_area_m2, polygon_perimeter_m,
};
use crate::survey::types::{EnvironmentalConditions, GeoPoint, Weather};
use serde::Serialize;
use std::cmp::Ordering;

/// Absorbs floating point noise when the extent is an exact multiple of the cell size
const GRID_EPSILON: f64 = 1e-9;

/// Spacing between scan lines assumed by the flight-time estimate
const SCAN_LINE_SPACING_M: f64 = 5.0;

/// A lattice point retained on the flight path
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct CoverageCell {
    pub row: usize,
    pub col: usize,
    pub point: GeoPoint,
}

fn cells_spanning(extent: f64, cell_size: f64) -> usize {
    ((extent / cell_size) - GRID_EPSILON).ceil().max(0.0) as usize
}

/// Build the boustrophedon coverage path for `polygon`.
///
/// Rows run south to north; even rows are flown west to east and odd rows
/// east to west. An empty result means the polygon is degenerate or too
/// small for the grid, which callers treat as an already-complete survey.
pub fn build_coverage_path(polygon: &[GeoPoint], cell_size_degrees: f64) -> Vec<CoverageCell> {
    if polygon.len() < 3 || !(cell_size_degrees.is_finite() && cell_size_degrees > 0.0) {
        return Vec::new();
    }
    // Collinear vertices enclose nothing
    if polygon_area(polygon) == 0.0 {
        return Vec::new();
    }
    let Some(bounds) = bounds_of(polygon) else {
        return Vec::new();
    };

    let south = bounds.south_west.lat;
    let west = bounds.south_west.lng;
    let rows = cells_spanning(bounds.north_east.lat - south, cell_size_degrees);
    let cols = cells_spanning(bounds.north_east.lng - west, cell_size_degrees);

    let mut cells: Vec<CoverageCell> = (0..rows)
        .flat_map(|row| (0..cols).map(move |col| (row, col)))
        .map(|(row, col)| CoverageCell {
            row,
            col,
            point: GeoPoint::new(
                south + row as f64 * cell_size_degrees,
                west + col as f64 * cell_size_degrees,
            ),
        })
        .filter(|cell| point_in_polygon(cell.point, polygon))
        .collect();

    cells.sort_by(boustrophedon_order);
    cells
}

fn boustrophedon_order(a: &CoverageCell, b: &CoverageCell) -> Ordering {
    a.row.cmp(&b.row).then_with(|| {
        if a.row % 2 == 0 {
            a.col.cmp(&b.col)
        } else {
            b.col.cmp(&a.col)
        }
    })
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct FlightEstimate {
    pub area_m2: f64,
    pub perimeter_m: f64,
    pub scan_lines: u32,
    pub distance_m: f64,
    pub flight_minutes: u32,
}

fn weather_time_factor(conditions: &EnvironmentalConditions) -> f64 {
    match conditions.weather {
        Weather::LightRain => 1.2,
        Weather::HeavyRain => 1.5,
        Weather::Windy if conditions.wind_speed_kph > 15.0 => 1.3,
        _ => 1.0,
    }
}

/// Rough flight duration for covering `polygon` at `speed_mps`.
/// Adds 10% for turns and scales by a weather factor.
pub fn estimate_flight(
    polygon: &[GeoPoint],
    speed_mps: f64,
    conditions: &EnvironmentalConditions,
) -> Option<FlightEstimate> {
    if polygon.len() < 3 || speed_mps <= 0.0 {
        return None;
    }

    let area_m2 = polygon_area_m2(polygon);
    let perimeter_m = polygon_perimeter_m(polygon);
    if perimeter_m <= 0.0 {
        return None;
    }

    let scan_lines = (area_m2 / (perimeter_m * SCAN_LINE_SPACING_M / 2.0)).ceil() as u32;
    let distance_m = perimeter_m + scan_lines as f64 * (perimeter_m / 2.0);
    let seconds = distance_m / speed_mps * 1.1;
    let flight_minutes = (seconds * weather_time_factor(conditions) / 60.0).ceil() as u32;

    Some(FlightEstimate {
        area_m2,
        perimeter_m,
        scan_lines,
        distance_m,
        flight_minutes,
    })
}
