//! Bounding Volume Hierarchy (BVH) over a prepared gem mesh.
//!
//! A flattened binary tree built eagerly, by default with a binned surface
//! area heuristic. Nodes are stored depth-first so a branch's left child is
//! always the next node; this is also the layout `gpu_nodes` exports.

use std::time::Instant;

use bytemuck::{Pod, Zeroable};
use gem_core::PreparedMesh;
use gem_math::{Aabb, Interval, Ray, Vec3};

use crate::triangle::intersect_triangle;

/// Maximum primitives per leaf node before splitting.
const LEAF_MAX_SIZE: usize = 4;

/// Number of centroid bins per axis evaluated by the SAH builder.
const SAH_BINS: usize = 16;
const TRAVERSAL_COST: f32 = 1.0;
const INTERSECTION_COST: f32 = 1.0;

/// Closest accepted hit distance, keeps a ray from re-hitting its origin face.
const HIT_EPSILON: f32 = 1e-5;

/// How the builder partitions triangles at each node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildStrategy {
    /// Binned surface area heuristic.
    #[default]
    Sah,
    /// Median split on the longest centroid axis.
    Center,
}

/// Closest hit found by a BVH query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intersection {
    /// Triangle index in the prepared mesh
    pub face_index: usize,
    /// Vertex indices of the hit triangle in the prepared mesh
    pub face_vertices: [usize; 3],
    /// Geometric normal of the face (from its winding)
    pub face_normal: Vec3,
    /// Barycentric weights of the triangle's three vertices
    pub barycentric: Vec3,
    /// 1.0 when the ray hit the front of the face, -1.0 for the back
    pub side: f32,
    /// Distance along the ray
    pub distance: f32,
}

impl Intersection {
    /// Face normal flipped to oppose the incoming ray.
    #[inline]
    pub fn oriented_normal(&self) -> Vec3 {
        self.face_normal * self.side
    }
}

/// Flattened BVH node.
#[derive(Debug, Clone, Copy)]
enum BvhNode {
    /// Internal node; the left child is the node right after this one.
    Branch { bounds: Aabb, right: u32 },
    /// Leaf with a run of `count` entries in the triangle index list.
    Leaf { bounds: Aabb, first: u32, count: u32 },
}

impl BvhNode {
    fn bounds(&self) -> &Aabb {
        match self {
            BvhNode::Branch { bounds, .. } | BvhNode::Leaf { bounds, .. } => bounds,
        }
    }
}

/// GPU-ready node layout: 32 bytes, `count == 0` marks a branch whose
/// `offset` is the right child; leaves address `count` triangle indices
/// starting at `offset`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuBvhNode {
    pub bounds_min: [f32; 3],
    pub offset: u32,
    pub bounds_max: [f32; 3],
    pub count: u32,
}

/// Per-triangle build record.
struct PrimitiveInfo {
    index: u32,
    centroid: Vec3,
    bounds: Aabb,
}

#[derive(Clone, Copy, Default)]
struct Bin {
    bounds: Aabb,
    count: u32,
}

/// Spatial index over the triangles of one `PreparedMesh`, in the mesh's
/// local space. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct MeshBvh {
    nodes: Vec<BvhNode>,
    triangle_indices: Vec<u32>,
    triangles: Vec<[Vec3; 3]>,
    face_normals: Vec<Vec3>,
}

impl MeshBvh {
    /// Build a BVH over every triangle of `mesh`.
    ///
    /// An empty mesh yields an empty tree whose queries always miss.
    pub fn build(mesh: &PreparedMesh, strategy: BuildStrategy) -> Self {
        Self::build_with_leaf_size(mesh, strategy, LEAF_MAX_SIZE)
    }

    /// Build with an explicit maximum leaf size.
    pub fn build_with_leaf_size(mesh: &PreparedMesh, strategy: BuildStrategy, max_leaf_size: usize) -> Self {
        let start = Instant::now();
        let triangle_count = mesh.triangle_count();

        let triangles: Vec<[Vec3; 3]> = (0..triangle_count).map(|i| mesh.triangle(i)).collect();
        let face_normals = (0..triangle_count).map(|i| mesh.face_normal(i)).collect();

        if triangles.is_empty() {
            log::debug!("BVH build: empty mesh, nothing to intersect");
            return Self::default();
        }

        let mut primitives: Vec<PrimitiveInfo> = triangles
            .iter()
            .enumerate()
            .map(|(i, &[v0, v1, v2])| {
                let bounds = Aabb::from_triangle(v0, v1, v2);
                PrimitiveInfo {
                    index: i as u32,
                    centroid: bounds.centroid(),
                    bounds,
                }
            })
            .collect();

        let mut builder = Builder {
            nodes: Vec::with_capacity(2 * triangle_count),
            ordered: Vec::with_capacity(triangle_count),
            strategy,
            max_leaf_size: max_leaf_size.max(1),
        };
        builder.build_recursive(&mut primitives);

        let bvh = Self {
            nodes: builder.nodes,
            triangle_indices: builder.ordered,
            triangles,
            face_normals,
        };

        log::debug!(
            "BVH build ({:?}): {} triangles, {} nodes, depth {} in {:?}",
            strategy,
            triangle_count,
            bvh.node_count(),
            bvh.depth(),
            start.elapsed()
        );

        bvh
    }

    /// True when the tree holds no triangles.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Bounds of the whole tree (empty for an empty tree).
    pub fn bounds(&self) -> Aabb {
        self.nodes.first().map(|n| *n.bounds()).unwrap_or(Aabb::EMPTY)
    }

    /// Longest root-to-leaf path, counting the root as depth 1.
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[BvhNode], idx: usize) -> usize {
            match nodes[idx] {
                BvhNode::Leaf { .. } => 1,
                BvhNode::Branch { right, .. } => 1 + walk(nodes, idx + 1).max(walk(nodes, right as usize)),
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }

    /// Closest intersection along `ray`, if any.
    pub fn first_hit(&self, ray: &Ray) -> Option<Intersection> {
        self.first_hit_within(ray, Interval::new(HIT_EPSILON, f32::INFINITY))
    }

    /// Closest intersection along `ray` with a parameter inside `ray_t`.
    pub fn first_hit_within(&self, ray: &Ray, ray_t: Interval) -> Option<Intersection> {
        let root = self.nodes.first()?;
        let entry = root.bounds().hit(ray, ray_t)?;

        let mut closest = ray_t.max;
        let mut best: Option<(u32, crate::triangle::TriangleHit)> = None;
        let mut stack: Vec<(u32, f32)> = Vec::with_capacity(32);
        stack.push((0, entry));

        while let Some((idx, entry)) = stack.pop() {
            if entry > closest {
                continue;
            }

            match self.nodes[idx as usize] {
                BvhNode::Leaf { first, count, .. } => {
                    let range = first as usize..(first + count) as usize;
                    for &tri in &self.triangle_indices[range] {
                        let interval = ray_t.with_max(closest);
                        if let Some(hit) = intersect_triangle(ray, self.triangles[tri as usize], interval) {
                            closest = hit.t;
                            best = Some((tri, hit));
                        }
                    }
                }
                BvhNode::Branch { right, .. } => {
                    let interval = ray_t.with_max(closest);
                    let left = idx + 1;
                    let near = self.nodes[left as usize].bounds().hit(ray, interval);
                    let far = self.nodes[right as usize].bounds().hit(ray, interval);

                    // Push the farther child first so the nearer one is visited first
                    match (near, far) {
                        (Some(tl), Some(tr)) if tl <= tr => {
                            stack.push((right, tr));
                            stack.push((left, tl));
                        }
                        (Some(tl), Some(tr)) => {
                            stack.push((left, tl));
                            stack.push((right, tr));
                        }
                        (Some(tl), None) => stack.push((left, tl)),
                        (None, Some(tr)) => stack.push((right, tr)),
                        (None, None) => {}
                    }
                }
            }
        }

        best.map(|(tri, hit)| {
            let face_normal = self.face_normals[tri as usize];
            let side = if ray.direction().dot(face_normal) < 0.0 { 1.0 } else { -1.0 };
            Intersection {
                face_index: tri as usize,
                face_vertices: PreparedMesh::triangle_vertices(tri as usize),
                face_normal,
                barycentric: hit.barycentric(),
                side,
                distance: hit.t,
            }
        })
    }

    /// Pack the tree for upload to a shader storage buffer.
    ///
    /// Returns the nodes and the triangle index list leaves point into.
    pub fn gpu_nodes(&self) -> (Vec<GpuBvhNode>, &[u32]) {
        let nodes = self
            .nodes
            .iter()
            .map(|node| {
                let bounds = node.bounds();
                let (offset, count) = match *node {
                    BvhNode::Branch { right, .. } => (right, 0),
                    BvhNode::Leaf { first, count, .. } => (first, count),
                };
                GpuBvhNode {
                    bounds_min: bounds.min().to_array(),
                    offset,
                    bounds_max: bounds.max().to_array(),
                    count,
                }
            })
            .collect();
        (nodes, &self.triangle_indices)
    }
}

struct Builder {
    nodes: Vec<BvhNode>,
    ordered: Vec<u32>,
    strategy: BuildStrategy,
    max_leaf_size: usize,
}

impl Builder {
    /// Recursive BVH construction, returns the index of the created node.
    fn build_recursive(&mut self, prims: &mut [PrimitiveInfo]) -> u32 {
        let bounds = prims.iter().fold(Aabb::EMPTY, |mut acc, p| {
            acc.grow(&p.bounds);
            acc
        });

        if prims.len() <= self.max_leaf_size {
            return self.create_leaf(prims, bounds);
        }

        // Compute centroid bounds to choose split axis
        let centroid_bounds = prims.iter().fold(Aabb::EMPTY, |mut acc, p| {
            acc.grow_point(p.centroid);
            acc
        });
        let extent = centroid_bounds.extent();
        if extent.max_element() < 1e-7 {
            return self.create_leaf(prims, bounds);
        }

        let mid = match self.strategy {
            BuildStrategy::Sah => {
                let (axis, split_pos, split_cost) = find_best_split(prims, &centroid_bounds, &bounds);
                let leaf_cost = INTERSECTION_COST * prims.len() as f32;
                if split_cost >= leaf_cost {
                    return self.create_leaf(prims, bounds);
                }
                let mid = partition(prims, axis, split_pos);
                if mid == 0 || mid == prims.len() {
                    median_split(prims, axis)
                } else {
                    mid
                }
            }
            BuildStrategy::Center => median_split(prims, centroid_bounds.longest_axis()),
        };

        let node_idx = self.nodes.len() as u32;
        self.nodes.push(BvhNode::Branch { bounds, right: 0 });

        let (left, right) = prims.split_at_mut(mid);
        self.build_recursive(left);
        let right_idx = self.build_recursive(right);
        self.nodes[node_idx as usize] = BvhNode::Branch {
            bounds,
            right: right_idx,
        };

        node_idx
    }

    fn create_leaf(&mut self, prims: &[PrimitiveInfo], bounds: Aabb) -> u32 {
        let node_idx = self.nodes.len() as u32;
        let first = self.ordered.len() as u32;
        self.ordered.extend(prims.iter().map(|p| p.index));
        self.nodes.push(BvhNode::Leaf {
            bounds,
            first,
            count: prims.len() as u32,
        });
        node_idx
    }
}

/// Sort by centroid on `axis` and split in half.
fn median_split(prims: &mut [PrimitiveInfo], axis: usize) -> usize {
    prims.sort_unstable_by(|a, b| {
        a.centroid[axis]
            .partial_cmp(&b.centroid[axis])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    prims.len() / 2
}

/// Evaluate SAH cost at every bin boundary of every axis.
///
/// Returns (axis, split position, cost); cost is infinite when no split exists.
fn find_best_split(prims: &[PrimitiveInfo], centroid_bounds: &Aabb, node_bounds: &Aabb) -> (usize, f32, f32) {
    let node_area = node_bounds.surface_area();
    if node_area <= 0.0 {
        return (0, 0.0, f32::INFINITY);
    }

    let extent = centroid_bounds.extent();
    let base = centroid_bounds.min();
    let mut best = (0, 0.0f32, f32::INFINITY);

    for axis in 0..3 {
        if extent[axis] < 1e-7 {
            continue;
        }

        let scale = SAH_BINS as f32 / extent[axis];
        let mut bins = [Bin::default(); SAH_BINS];
        for prim in prims {
            let bin = ((prim.centroid[axis] - base[axis]) * scale).clamp(0.0, (SAH_BINS - 1) as f32) as usize;
            bins[bin].bounds.grow(&prim.bounds);
            bins[bin].count += 1;
        }

        // Sweep from the left, then from the right evaluating each boundary
        let mut left_bounds = [Aabb::EMPTY; SAH_BINS - 1];
        let mut left_counts = [0u32; SAH_BINS - 1];
        let mut running = (Aabb::EMPTY, 0u32);
        for i in 0..(SAH_BINS - 1) {
            running.0.grow(&bins[i].bounds);
            running.1 += bins[i].count;
            left_bounds[i] = running.0;
            left_counts[i] = running.1;
        }

        running = (Aabb::EMPTY, 0);
        for i in (0..(SAH_BINS - 1)).rev() {
            running.0.grow(&bins[i + 1].bounds);
            running.1 += bins[i + 1].count;

            if left_counts[i] == 0 || running.1 == 0 {
                continue;
            }

            let cost = TRAVERSAL_COST
                + INTERSECTION_COST
                    * (left_counts[i] as f32 * left_bounds[i].surface_area()
                        + running.1 as f32 * running.0.surface_area())
                    / node_area;

            if cost < best.2 {
                best = (axis, base[axis] + (i + 1) as f32 / scale, cost);
            }
        }
    }

    best
}

/// In-place partition: centroids below `split_pos` on `axis` go left.
fn partition(prims: &mut [PrimitiveInfo], axis: usize, split_pos: f32) -> usize {
    let mut left = 0;
    let mut right = prims.len();

    while left < right {
        if prims[left].centroid[axis] < split_pos {
            left += 1;
        } else {
            right -= 1;
            prims.swap(left, right);
        }
    }

    left
}
