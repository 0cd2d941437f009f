//! Mesh geometry and mesh preparation.
//!
//! `Mesh` is the loader-facing representation: positions, optional normals
//! and optional triangle indices. `PreparedMesh` is what the rest of the
//! pipeline consumes: a non-indexed triangle list where every triangle owns
//! its three vertices, which keeps BVH leaves and per-vertex shading outputs
//! trivially addressable by face index.

use gem_math::{Aabb, Vec3};

/// A mesh consisting of vertex positions, optional normals, and optional
/// triangle indices.
///
/// Without indices, every three consecutive positions form a triangle.
#[derive(Clone, Debug)]
pub struct Mesh {
    /// Vertex positions (one Vec3 per vertex)
    pub positions: Vec<Vec3>,

    /// Vertex normals (optional - computed during preparation if missing)
    pub normals: Option<Vec<Vec3>>,

    /// Triangle indices (every 3 indices form a triangle)
    pub indices: Option<Vec<u32>>,

    /// Axis-aligned bounding box
    pub bounds: Aabb,
}

impl Mesh {
    /// Create an indexed mesh from positions and indices, optionally with normals.
    ///
    /// If normals are not provided, they will NOT be automatically computed.
    /// Call `compute_normals()` explicitly if you need them.
    pub fn new(positions: Vec<Vec3>, indices: Vec<u32>, normals: Option<Vec<Vec3>>) -> Self {
        let bounds = Self::compute_bounds(&positions);
        Self {
            positions,
            normals,
            indices: Some(indices),
            bounds,
        }
    }

    /// Create a non-indexed mesh (triangle soup).
    pub fn from_triangles(positions: Vec<Vec3>, normals: Option<Vec<Vec3>>) -> Self {
        let bounds = Self::compute_bounds(&positions);
        Self {
            positions,
            normals,
            indices: None,
            bounds,
        }
    }

    /// Compute axis-aligned bounding box from positions.
    fn compute_bounds(positions: &[Vec3]) -> Aabb {
        if positions.is_empty() {
            return Aabb::empty();
        }

        let mut bounds = Aabb::EMPTY;
        for pos in positions {
            bounds.grow_point(*pos);
        }

        Aabb::from_points(bounds.min(), bounds.max())
    }

    /// Check if the mesh shares vertices through an index buffer.
    pub fn is_indexed(&self) -> bool {
        self.indices.is_some()
    }

    /// Triangle corner indices, resolving the non-indexed case to 0,1,2,...
    ///
    /// Triangles referencing a vertex that does not exist are skipped.
    fn triangle_indices(&self) -> Vec<[usize; 3]> {
        let vertex_count = self.positions.len();
        let raw: Vec<[usize; 3]> = match &self.indices {
            Some(indices) => indices
                .chunks_exact(3)
                .map(|c| [c[0] as usize, c[1] as usize, c[2] as usize])
                .collect(),
            None => (0..vertex_count / 3)
                .map(|t| [3 * t, 3 * t + 1, 3 * t + 2])
                .collect(),
        };

        raw.into_iter()
            .filter(|tri| {
                let valid = tri.iter().all(|&i| i < vertex_count);
                if !valid {
                    log::warn!(
                        "Invalid triangle indices: [{}, {}, {}], vertex count: {}",
                        tri[0],
                        tri[1],
                        tri[2],
                        vertex_count
                    );
                }
                valid
            })
            .collect()
    }

    /// Compute smooth vertex normals by averaging face normals.
    ///
    /// Each vertex normal is the normalized, area-weighted average of the
    /// face normals of the faces sharing that vertex. Faces are expected to
    /// wind counter-clockwise when seen from outside.
    pub fn compute_normals(&mut self) {
        let mut normals = vec![Vec3::ZERO; self.positions.len()];

        for [i0, i1, i2] in self.triangle_indices() {
            let p0 = self.positions[i0];
            let p1 = self.positions[i1];
            let p2 = self.positions[i2];

            let face_normal = (p1 - p0).cross(p2 - p0);

            normals[i0] += face_normal;
            normals[i1] += face_normal;
            normals[i2] += face_normal;
        }

        for normal in &mut normals {
            // Default up normal for unreferenced or degenerate vertices
            *normal = normal.try_normalize().unwrap_or(Vec3::Y);
        }

        self.normals = Some(normals);
    }

    /// Ensure the mesh has normals, computing them if necessary.
    /// Also recomputes if existing normals don't match vertex count.
    pub fn ensure_normals(&mut self) {
        let mismatched = match &self.normals {
            None => true,
            Some(normals) => normals.len() != self.positions.len(),
        };

        if mismatched {
            if let Some(normals) = &self.normals {
                log::debug!(
                    "Normals array length ({}) doesn't match vertex count ({}), computing smooth normals",
                    normals.len(),
                    self.positions.len()
                );
            }
            self.compute_normals();
        }
    }

    /// Get the number of triangles in the mesh.
    pub fn triangle_count(&self) -> usize {
        match &self.indices {
            Some(indices) => indices.len() / 3,
            None => self.positions.len() / 3,
        }
    }

    /// Get the number of vertices in the mesh.
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Flatten into a non-indexed triangle list.
    ///
    /// Shared vertices are duplicated so each triangle owns three. Normals
    /// are carried across, computed first when missing. An empty mesh gives
    /// an empty `PreparedMesh`.
    pub fn to_non_indexed(&self) -> PreparedMesh {
        let mut source = self.clone();
        source.ensure_normals();
        let normals = source.normals.as_deref().unwrap_or(&[]);

        let triangles = source.triangle_indices();
        let mut positions = Vec::with_capacity(triangles.len() * 3);
        let mut flat_normals = Vec::with_capacity(triangles.len() * 3);

        for tri in &triangles {
            for &i in tri {
                positions.push(source.positions[i]);
                flat_normals.push(normals.get(i).copied().unwrap_or(Vec3::Y));
            }
        }

        log::debug!(
            "Prepared mesh: {} triangles ({} -> {} vertices)",
            triangles.len(),
            self.positions.len(),
            positions.len()
        );

        PreparedMesh::new(positions, flat_normals)
    }
}

/// Non-indexed triangle list: vertices `3*i..3*i+3` belong to triangle `i`.
///
/// Immutable once built; the BVH and the vertex stage both read it.
#[derive(Clone, Debug, Default)]
pub struct PreparedMesh {
    positions: Vec<Vec3>,
    normals: Vec<Vec3>,
    bounds: Aabb,
}

impl PreparedMesh {
    /// Build from flat per-vertex arrays. Trailing vertices that do not
    /// complete a triangle are dropped.
    pub fn new(mut positions: Vec<Vec3>, mut normals: Vec<Vec3>) -> Self {
        let len = (positions.len().min(normals.len()) / 3) * 3;
        positions.truncate(len);
        normals.truncate(len);

        let mut bounds = Aabb::EMPTY;
        for p in &positions {
            bounds.grow_point(*p);
        }

        Self {
            positions,
            normals,
            bounds,
        }
    }

    /// An empty mesh; everything built from it reports "nothing to intersect".
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    pub fn normals(&self) -> &[Vec3] {
        &self.normals
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    pub fn triangle_count(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// The three corner positions of triangle `index`.
    #[inline]
    pub fn triangle(&self, index: usize) -> [Vec3; 3] {
        let base = index * 3;
        [
            self.positions[base],
            self.positions[base + 1],
            self.positions[base + 2],
        ]
    }

    /// Vertex indices of triangle `index` into the flat arrays.
    #[inline]
    pub fn triangle_vertices(index: usize) -> [usize; 3] {
        [index * 3, index * 3 + 1, index * 3 + 2]
    }

    /// Geometric normal from the winding (counter-clockwise = front).
    pub fn face_normal(&self, index: usize) -> Vec3 {
        let [v0, v1, v2] = self.triangle(index);
        (v1 - v0).cross(v2 - v0).normalize_or_zero()
    }
}
