//! Closed test meshes shared by the shape and Bezier test suites.

use nalgebra::Vector3;

/// A triangulated axis-aligned cube of the given edge length, centered at
/// the origin, wound outward.
pub fn cube_mesh(edge: f64) -> (Vec<Vector3<f64>>, Vec<[usize; 3]>) {
    let h = edge / 2.0;
    let vertices = vec![
        Vector3::new(-h, -h, -h),
        Vector3::new(h, -h, -h),
        Vector3::new(-h, h, -h),
        Vector3::new(h, h, -h),
        Vector3::new(-h, -h, h),
        Vector3::new(h, -h, h),
        Vector3::new(-h, h, h),
        Vector3::new(h, h, h),
    ];

    let facets = vec![
        // -z
        [0, 2, 3],
        [0, 3, 1],
        // +z
        [4, 5, 7],
        [4, 7, 6],
        // -y
        [0, 1, 5],
        [0, 5, 4],
        // +y
        [2, 6, 7],
        [2, 7, 3],
        // -x
        [0, 4, 6],
        [0, 6, 2],
        // +x
        [1, 3, 7],
        [1, 7, 5],
    ];

    (vertices, facets)
}

/// A UV-sphere of the given radius: `rows` polar bands and `cols` azimuthal
/// steps, with polar caps, wound outward.
pub fn uv_sphere_mesh(
    radius: f64,
    rows: usize,
    cols: usize,
) -> (Vec<Vector3<f64>>, Vec<[usize; 3]>) {
    let mut vertices = vec![
        Vector3::new(0.0, 0.0, radius),
        Vector3::new(0.0, 0.0, -radius),
    ];

    // Ring vertices, north to south
    for ring in 1..rows {
        let theta = std::f64::consts::PI * ring as f64 / rows as f64;
        for step in 0..cols {
            let phi = 2.0 * std::f64::consts::PI * step as f64 / cols as f64;
            vertices.push(Vector3::new(
                radius * theta.sin() * phi.cos(),
                radius * theta.sin() * phi.sin(),
                radius * theta.cos(),
            ));
        }
    }

    let ring_vertex = |ring: usize, step: usize| 2 + (ring - 1) * cols + (step % cols);
    let mut facets = Vec::new();

    // North cap
    for step in 0..cols {
        facets.push([0, ring_vertex(1, step), ring_vertex(1, step + 1)]);
    }
    // Quad bands
    for ring in 1..rows - 1 {
        for step in 0..cols {
            let a = ring_vertex(ring, step);
            let b = ring_vertex(ring + 1, step);
            let c = ring_vertex(ring + 1, step + 1);
            let d = ring_vertex(ring, step + 1);
            facets.push([a, b, c]);
            facets.push([a, c, d]);
        }
    }
    // South cap
    for step in 0..cols {
        facets.push([1, ring_vertex(rows - 1, step + 1), ring_vertex(rows - 1, step)]);
    }

    (vertices, facets)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn assert_closed(facets: &[[usize; 3]]) {
        let mut edges: HashMap<(usize, usize), i64> = HashMap::new();
        for facet in facets {
            let [a, b, c] = *facet;
            for (u, v) in [(a, b), (b, c), (c, a)] {
                // Count directed edges; a closed orientable surface pairs
                // each with its reverse
                *edges.entry((u, v)).or_insert(0) += 1;
                *edges.entry((v, u)).or_insert(0) -= 1;
            }
        }
        assert!(edges.values().all(|count| *count == 0));
    }

    #[test]
    fn test_cube_is_closed() {
        let (vertices, facets) = cube_mesh(1.0);
        assert_eq!(vertices.len(), 8);
        assert_eq!(facets.len(), 12);
        assert_closed(&facets);
    }

    #[test]
    fn test_sphere_is_closed() {
        let (vertices, facets) = uv_sphere_mesh(1.0, 12, 16);
        assert_eq!(vertices.len(), 2 + 11 * 16);
        assert_eq!(facets.len(), 2 * 16 + 10 * 16 * 2);
        assert_closed(&facets);
        assert!(vertices.iter().all(|v| (v.norm() - 1.0).abs() < 1e-12));
    }
}
