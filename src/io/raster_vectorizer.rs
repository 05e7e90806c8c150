use crate::core::sieve::{label_components, Connectivity, UNLABELLED};
use crate::io::{IcePolygon, Vectorizer};
use crate::types::{ensure_same_dim, GeoTransform, GridGeolocation, IceError, IceResult};
use geo::{Area, BooleanOps, Coord, LineString, MultiLineString, MultiPolygon, Polygon};
use ndarray::Array2;
use std::collections::{BTreeMap, HashMap};

/// Pixel corner in grid coordinates (x = column, y = row, y pointing down)
type Vertex = (i64, i64);

/// In-memory vectorizer tracing region outlines along pixel edges.
///
/// Each polygon keeps the cells it was traced from, so rasterizing a
/// polygon set reproduces exactly the cells that were polygonized.
#[derive(Debug, Clone)]
pub struct RasterVectorizer {
    connectivity: Connectivity,
}

impl Default for RasterVectorizer {
    fn default() -> Self {
        Self {
            connectivity: Connectivity::Four,
        }
    }
}

impl RasterVectorizer {
    pub fn new(connectivity: Connectivity) -> Self {
        Self { connectivity }
    }
}

impl Vectorizer for RasterVectorizer {
    fn polygonize(
        &self,
        grid: &Array2<u8>,
        mask: Option<&Array2<u8>>,
        geolocation: &GridGeolocation,
    ) -> IceResult<Vec<IcePolygon>> {
        let include = match mask {
            Some(m) => {
                ensure_same_dim("polygonize mask", grid.dim(), m.dim())?;
                Some(m.mapv(|v| v != 0))
            }
            None => None,
        };

        let components = label_components(grid, include.as_ref(), self.connectivity);
        let mut regions: Vec<Vec<(usize, usize)>> = vec![Vec::new(); components.len()];
        for (pos, &label) in components.labels.indexed_iter() {
            if label != UNLABELLED {
                regions[label].push(pos);
            }
        }

        let polygons: Vec<IcePolygon> = regions
            .into_iter()
            .enumerate()
            .map(|(label, pixels)| {
                let geometry = trace_region(&components.labels, label, &pixels, &geolocation.transform);
                IcePolygon {
                    dn: components.values[label],
                    area: geometry.unsigned_area(),
                    geometry,
                    pixels,
                }
            })
            .collect();

        log::debug!("Polygonized {} regions", polygons.len());
        Ok(polygons)
    }

    fn rasterize(
        &self,
        polygons: &[IcePolygon],
        dim: (usize, usize),
        burn: u8,
    ) -> IceResult<Array2<u8>> {
        let mut grid = Array2::zeros(dim);
        for polygon in polygons {
            for &(row, col) in &polygon.pixels {
                let cell = grid.get_mut((row, col)).ok_or_else(|| {
                    IceError::Processing(format!(
                        "polygon cell ({}, {}) outside {}x{} grid",
                        row, col, dim.0, dim.1
                    ))
                })?;
                *cell = burn;
            }
        }
        Ok(grid)
    }

    fn to_lines(&self, polygons: &[IcePolygon]) -> MultiLineString<f64> {
        let lines = polygons
            .iter()
            .flat_map(|p| {
                std::iter::once(p.geometry.exterior().clone())
                    .chain(p.geometry.interiors().iter().cloned())
            })
            .collect();
        MultiLineString::new(lines)
    }

    fn clip(&self, lines: &MultiLineString<f64>, region: &MultiPolygon<f64>) -> MultiLineString<f64> {
        region.clip(lines, false)
    }
}

/// Outline of one labelled region with its holes
fn trace_region(
    labels: &Array2<usize>,
    label: usize,
    pixels: &[(usize, usize)],
    transform: &GeoTransform,
) -> Polygon<f64> {
    let (rows, cols) = labels.dim();
    let inside = |row: i64, col: i64| {
        row >= 0
            && col >= 0
            && (row as usize) < rows
            && (col as usize) < cols
            && labels[[row as usize, col as usize]] == label
    };

    // Edges run clockwise on screen around each cell, region on the right
    let mut edges: BTreeMap<Vertex, Vec<Vertex>> = BTreeMap::new();
    let mut add = |from: Vertex, to: Vertex| edges.entry(from).or_default().push(to);
    for &(row, col) in pixels {
        let (r, c) = (row as i64, col as i64);
        if !inside(r - 1, c) {
            add((c, r), (c + 1, r));
        }
        if !inside(r, c + 1) {
            add((c + 1, r), (c + 1, r + 1));
        }
        if !inside(r + 1, c) {
            add((c + 1, r + 1), (c, r + 1));
        }
        if !inside(r, c - 1) {
            add((c, r + 1), (c, r));
        }
    }

    let mut exteriors = Vec::new();
    let mut holes = Vec::new();
    while let Some(ring) = next_ring(&mut edges) {
        for ring in split_at_pinches(ring).into_iter().map(simplify) {
            if signed_area(&ring) > 0 {
                exteriors.push(ring);
            } else {
                holes.push(ring);
            }
        }
    }

    if exteriors.len() > 1 {
        log::warn!(
            "Region {} traced into {} outer rings, keeping the largest",
            label,
            exteriors.len()
        );
    }
    let exterior = exteriors
        .into_iter()
        .max_by_key(|ring| signed_area(ring))
        .unwrap_or_default();

    Polygon::new(
        to_map(&exterior, transform),
        holes.iter().map(|h| to_map(h, transform)).collect(),
    )
}

/// Extract one closed walk, starting from the smallest remaining vertex.
///
/// That vertex is never a pinch point. At pinch points met later the walk
/// turns right, which keeps diagonal neighbours apart but can run from an
/// outline into a hole touching it; `split_at_pinches` separates those.
fn next_ring(edges: &mut BTreeMap<Vertex, Vec<Vertex>>) -> Option<Vec<Vertex>> {
    let start = *edges.keys().next()?;
    let mut ring = vec![start];
    let mut current = start;
    let mut heading: Option<Vertex> = None;

    loop {
        let next = take_edge(edges, current, heading)?;
        heading = Some((next.0 - current.0, next.1 - current.1));
        current = next;
        if current == start {
            break;
        }
        ring.push(current);
    }

    Some(ring)
}

/// Cut a closed walk into simple rings wherever it revisits a vertex
fn split_at_pinches(walk: Vec<Vertex>) -> Vec<Vec<Vertex>> {
    let mut rings = Vec::new();
    let mut open: Vec<Vertex> = Vec::with_capacity(walk.len());
    let mut position: HashMap<Vertex, usize> = HashMap::new();

    for vertex in walk {
        match position.get(&vertex) {
            Some(&at) => {
                let tail: Vec<Vertex> = open.drain(at + 1..).collect();
                for v in &tail {
                    position.remove(v);
                }
                let mut ring = Vec::with_capacity(tail.len() + 1);
                ring.push(vertex);
                ring.extend(tail);
                rings.push(ring);
            }
            None => {
                position.insert(vertex, open.len());
                open.push(vertex);
            }
        }
    }

    rings.push(open);
    rings
}

fn take_edge(
    edges: &mut BTreeMap<Vertex, Vec<Vertex>>,
    from: Vertex,
    heading: Option<Vertex>,
) -> Option<Vertex> {
    let outgoing = edges.get_mut(&from)?;
    let idx = match heading {
        None => 0,
        Some((dx, dy)) => {
            // right turn, straight on, left turn (screen orientation)
            let preferences = [(-dy, dx), (dx, dy), (dy, -dx)];
            preferences
                .iter()
                .find_map(|&(px, py)| {
                    outgoing
                        .iter()
                        .position(|&(x, y)| (x - from.0, y - from.1) == (px, py))
                })
                .unwrap_or(0)
        }
    };
    let next = outgoing.swap_remove(idx);
    if outgoing.is_empty() {
        edges.remove(&from);
    }
    Some(next)
}

/// Drop vertices in the middle of straight runs
fn simplify(ring: Vec<Vertex>) -> Vec<Vertex> {
    let n = ring.len();
    if n < 4 {
        return ring;
    }
    (0..n)
        .filter(|&i| {
            let prev = ring[(i + n - 1) % n];
            let here = ring[i];
            let next = ring[(i + 1) % n];
            (here.0 - prev.0, here.1 - prev.1) != (next.0 - here.0, next.1 - here.1)
        })
        .map(|i| ring[i])
        .collect()
}

/// Twice the signed area; positive for outer rings in grid coordinates
fn signed_area(ring: &[Vertex]) -> i64 {
    let n = ring.len();
    (0..n)
        .map(|i| {
            let (x0, y0) = ring[i];
            let (x1, y1) = ring[(i + 1) % n];
            x0 * y1 - x1 * y0
        })
        .sum()
}

fn to_map(ring: &[Vertex], transform: &GeoTransform) -> LineString<f64> {
    ring.iter()
        .map(|&(x, y)| {
            let (mx, my) = transform.pixel_to_map(x as f64, y as f64);
            Coord { x: mx, y: my }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geo::polygon;

    fn unit_geolocation() -> GridGeolocation {
        GridGeolocation {
            transform: GeoTransform::from_gdal([0.0, 1.0, 0.0, 0.0, 0.0, -1.0]),
            projection: String::new(),
        }
    }

    #[test]
    fn test_polygonize_square_with_hole() {
        let mut grid = Array2::<u8>::zeros((5, 5));
        for row in 1..4 {
            for col in 1..4 {
                grid[[row, col]] = 1;
            }
        }
        grid[[2, 2]] = 0;

        let polygons = RasterVectorizer::default()
            .polygonize(&grid, None, &unit_geolocation())
            .unwrap();
        let ring = polygons.iter().find(|p| p.dn == 1).unwrap();

        assert_eq!(ring.pixels.len(), 8);
        assert_relative_eq!(ring.area, 8.0);
        assert_eq!(ring.geometry.exterior().0.len(), 5, "square outline, closed");
        assert_eq!(ring.geometry.interiors().len(), 1);
    }

    #[test]
    fn test_diagonal_contact_keeps_polygons_apart() {
        let grid = ndarray::array![[1u8, 0], [0, 1]];
        let polygons = RasterVectorizer::default()
            .polygonize(&grid, None, &unit_geolocation())
            .unwrap();

        let ice: Vec<_> = polygons.iter().filter(|p| p.dn == 1).collect();
        assert_eq!(ice.len(), 2);
        for p in ice {
            assert_relative_eq!(p.area, 1.0);
            assert!(p.geometry.interiors().is_empty());
        }
    }

    #[test]
    fn test_hole_touching_outline_at_a_corner() {
        // the hole at (1, 1) meets the open corner at (2, 2) in one vertex
        let grid = ndarray::array![[1u8, 1, 1], [1, 0, 1], [1, 1, 0]];
        let polygons = RasterVectorizer::default()
            .polygonize(&grid, None, &unit_geolocation())
            .unwrap();
        let ring = polygons.iter().find(|p| p.dn == 1).unwrap();

        assert_eq!(ring.pixels.len(), 7);
        assert_relative_eq!(ring.area, 7.0);
        assert_eq!(ring.geometry.exterior().0.len(), 7, "six corners, closed");
        assert_eq!(ring.geometry.interiors().len(), 1);
        assert_eq!(ring.geometry.interiors()[0].0.len(), 5);

        let corners = &ring.geometry.exterior().0[..6];
        for (i, a) in corners.iter().enumerate() {
            assert!(corners[i + 1..].iter().all(|b| a != b), "repeated corner {:?}", a);
        }
    }

    #[test]
    fn test_split_at_pinches() {
        // outline of two diagonal squares walked through their shared corner
        let walk = vec![(0, 0), (1, 0), (1, 1), (2, 1), (2, 2), (1, 2), (1, 1), (0, 1)];
        let rings = split_at_pinches(walk);

        assert_eq!(rings.len(), 2);
        assert_eq!(rings[0], vec![(1, 1), (2, 1), (2, 2), (1, 2)]);
        assert_eq!(rings[1], vec![(0, 0), (1, 0), (1, 1), (0, 1)]);
        assert!(rings.iter().all(|r| signed_area(r) > 0));
    }

    #[test]
    fn test_area_uses_pixel_size() {
        let grid = Array2::<u8>::ones((2, 3));
        let geolocation = GridGeolocation::default();
        let polygons = RasterVectorizer::default()
            .polygonize(&grid, None, &geolocation)
            .unwrap();

        assert_eq!(polygons.len(), 1);
        assert_relative_eq!(polygons[0].area, 6.0 * 625_000_000.0);
    }

    #[test]
    fn test_mask_limits_polygonize() {
        let grid = Array2::<u8>::ones((3, 3));
        let mut mask = Array2::<u8>::zeros((3, 3));
        mask[[0, 0]] = 1;
        mask[[0, 1]] = 1;

        let polygons = RasterVectorizer::default()
            .polygonize(&grid, Some(&mask), &unit_geolocation())
            .unwrap();
        assert_eq!(polygons.len(), 1);
        assert_eq!(polygons[0].pixels, vec![(0, 0), (0, 1)]);
    }

    #[test]
    fn test_rasterize_reproduces_cells() {
        let grid = ndarray::array![[1u8, 1, 0], [0, 0, 0], [0, 1, 1]];
        let vectorizer = RasterVectorizer::default();
        let polygons = vectorizer
            .polygonize(&grid, None, &unit_geolocation())
            .unwrap();
        let ice: Vec<_> = polygons.into_iter().filter(|p| p.dn == 1).collect();

        let raster = vectorizer.rasterize(&ice, (3, 3), 1).unwrap();
        assert_eq!(raster, grid);

        let err = vectorizer.rasterize(&ice, (2, 2), 1).unwrap_err();
        assert!(matches!(err, IceError::Processing(_)));
    }

    #[test]
    fn test_lines_clipped_to_region() {
        let grid = ndarray::array![[1u8, 1], [1, 1]];
        let vectorizer = RasterVectorizer::default();
        let polygons = vectorizer
            .polygonize(&grid, None, &unit_geolocation())
            .unwrap();

        let lines = vectorizer.to_lines(&polygons);
        assert_eq!(lines.0.len(), 1);

        // Keep only the left half of the 2x2 outline (x in [-1, 1])
        let region = MultiPolygon::new(vec![polygon![
            (x: -1.0, y: 1.0),
            (x: 1.0, y: 1.0),
            (x: 1.0, y: -3.0),
            (x: -1.0, y: -3.0),
        ]]);
        let clipped = vectorizer.clip(&lines, &region);
        let total: f64 = clipped
            .0
            .iter()
            .map(|ls| {
                ls.lines()
                    .map(|l| (l.dx() * l.dx() + l.dy() * l.dy()).sqrt())
                    .sum::<f64>()
            })
            .sum();
        // full outline is 8 units long; left half keeps 4 of them
        assert_relative_eq!(total, 4.0, epsilon = 1e-9);
    }
}
