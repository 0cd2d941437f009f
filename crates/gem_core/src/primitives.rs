//! Procedural meshes: a round brilliant gem plus simple solids for tests.

use std::f32::consts::TAU;

use gem_math::Vec3;

use crate::Mesh;

/// Table radius relative to a unit girdle radius.
const TABLE_RADIUS: f32 = 0.55;
/// Height of the table above the girdle plane.
const CROWN_HEIGHT: f32 = 0.16;
/// Depth of the culet below the girdle plane.
const PAVILION_DEPTH: f32 = 0.43;

impl Mesh {
    /// Axis-aligned unit cube centered at the origin (side 1).
    ///
    /// Indexed, 4 vertices per face so every face keeps a flat normal.
    pub fn unit_cube() -> Self {
        // (normal, u, v) with u x v = normal, so corners wind CCW from outside
        let faces = [
            (Vec3::X, Vec3::Y, Vec3::Z),
            (Vec3::NEG_X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::Z, Vec3::X),
            (Vec3::NEG_Y, Vec3::X, Vec3::Z),
            (Vec3::Z, Vec3::X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::Y, Vec3::X),
        ];

        let mut positions = Vec::with_capacity(24);
        let mut normals = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);

        for (n, u, v) in faces {
            let base = positions.len() as u32;
            for (su, sv) in [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)] {
                positions.push(n * 0.5 + u * su + v * sv);
                normals.push(n);
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        Mesh::new(positions, indices, Some(normals))
    }

    /// Regular octahedron with unit circumradius, flat shaded.
    pub fn octahedron() -> Self {
        let mut triangles = Vec::with_capacity(8);
        for sx in [-1.0, 1.0] {
            for sy in [-1.0, 1.0] {
                for sz in [-1.0, 1.0] {
                    triangles.push([Vec3::X * sx, Vec3::Y * sy, Vec3::Z * sz]);
                }
            }
        }
        flat_convex(triangles)
    }

    /// Round brilliant cut with `facets` segments around the girdle.
    ///
    /// Girdle radius 1 in the XZ plane, table facing +Y. Flat shaded and
    /// non-indexed, the way a faceted gem is usually authored.
    pub fn brilliant_cut(facets: usize) -> Self {
        let n = facets.max(3);
        let step = TAU / n as f32;

        let ring = |radius: f32, height: f32, offset: f32| -> Vec<Vec3> {
            (0..n)
                .map(|i| {
                    let angle = i as f32 * step + offset;
                    Vec3::new(radius * angle.cos(), height, radius * angle.sin())
                })
                .collect()
        };

        let table_center = Vec3::new(0.0, CROWN_HEIGHT, 0.0);
        let culet = Vec3::new(0.0, -PAVILION_DEPTH, 0.0);
        let table = ring(TABLE_RADIUS, CROWN_HEIGHT, 0.0);
        let girdle = ring(1.0, 0.0, step * 0.5);

        let mut triangles = Vec::with_capacity(n * 4);
        for i in 0..n {
            let next = (i + 1) % n;
            // Table
            triangles.push([table_center, table[i], table[next]]);
            // Crown strip between table and girdle
            triangles.push([table[i], girdle[i], table[next]]);
            triangles.push([table[next], girdle[i], girdle[next]]);
            // Pavilion
            triangles.push([girdle[i], culet, girdle[next]]);
        }

        flat_convex(triangles)
    }
}

/// Triangle soup for a convex solid containing the origin, with every face
/// wound outward and a flat per-face normal.
fn flat_convex(triangles: Vec<[Vec3; 3]>) -> Mesh {
    let mut positions = Vec::with_capacity(triangles.len() * 3);
    let mut normals = Vec::with_capacity(triangles.len() * 3);

    for [a, mut b, mut c] in triangles {
        let mut normal = (b - a).cross(c - b).normalize_or_zero();
        let centroid = (a + b + c) / 3.0;
        if normal.dot(centroid) < 0.0 {
            std::mem::swap(&mut b, &mut c);
            normal = -normal;
        }
        positions.extend_from_slice(&[a, b, c]);
        normals.extend_from_slice(&[normal; 3]);
    }

    Mesh::from_triangles(positions, Some(normals))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every face normal of a convex solid centred on the origin points away from it.
    fn assert_outward(mesh: &Mesh) {
        let prepared = mesh.to_non_indexed();
        for t in 0..prepared.triangle_count() {
            let [a, b, c] = prepared.triangle(t);
            let centroid = (a + b + c) / 3.0;
            assert!(
                prepared.face_normal(t).dot(centroid) > 0.0,
                "triangle {} winds inward",
                t
            );
        }
    }

    #[test]
    fn test_unit_cube() {
        let cube = Mesh::unit_cube();
        assert_eq!(cube.triangle_count(), 12);
        assert_eq!(cube.vertex_count(), 24);
        assert!((cube.bounds.x.min + 0.5).abs() < 1e-6);
        assert!((cube.bounds.x.max - 0.5).abs() < 1e-6);
        assert_outward(&cube);
    }

    #[test]
    fn test_octahedron() {
        let octa = Mesh::octahedron();
        assert_eq!(octa.triangle_count(), 8);
        assert!(!octa.is_indexed());
        assert_outward(&octa);
    }

    #[test]
    fn test_brilliant_cut() {
        let gem = Mesh::brilliant_cut(16);
        assert_eq!(gem.triangle_count(), 64);
        assert_outward(&gem);

        // Flat shading: the three normals of each face agree
        let prepared = gem.to_non_indexed();
        for t in 0..prepared.triangle_count() {
            let n = &prepared.normals()[t * 3..t * 3 + 3];
            assert_eq!(n[0], n[1]);
            assert_eq!(n[1], n[2]);
        }
    }

    #[test]
    fn test_brilliant_cut_clamps_facets() {
        assert_eq!(Mesh::brilliant_cut(1).triangle_count(), 12);
    }
}
