use geo::Simplify;
use geo_types::{Coord, LineString};

/// Douglas–Peucker simplification of an open or closed pixel path.
///
/// Closed paths are simplified as a ring through the first point; the
/// returned vertices never repeat the first point at the end.
pub fn simplify_path(points: &[[f64; 2]], epsilon: f64, closed: bool) -> Vec<[f64; 2]> {
    if points.len() < 3 || epsilon <= 0.0 {
        return points.to_vec();
    }

    let mut coords: Vec<Coord<f64>> = points.iter().map(|&[x, y]| Coord { x, y }).collect();
    if closed && points.first() != points.last() {
        coords.push(coords[0]);
    }

    let simplified = LineString::new(coords).simplify(&epsilon);
    let mut out: Vec<[f64; 2]> = simplified.coords().map(|c| [c.x, c.y]).collect();

    if closed && out.len() > 1 && out.first() == out.last() {
        out.pop();
    }
    out
}
