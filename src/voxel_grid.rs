//! Dense voxel grid over the target cloud.
//!
//! Each occupied cell stores the Gaussian statistics (mean and inverse
//! covariance) of the target points it contains, per Magnusson 2009. The
//! grid spans the axis-aligned bounding box of the target cloud expanded by
//! the transformation epsilon, and cells are addressed by
//! `x + nx * (y + ny * z)`.
//!
//! The covariance finalization reproduces the reference kernel exactly: the
//! outer-product accumulator starts from the sentinel matrix, and the
//! single-pass expression divides by the total cell count before rescaling
//! by `(cells - 1) / point_count`. Neither matches the textbook sample
//! covariance; both are baked into the reference output stream.

use nalgebra::{Matrix3, Vector3};
use rayon::prelude::*;

use crate::cloud::{Point, PointCloud};
use crate::math::invert3x3;

/// A single grid cell.
///
/// Unfilled cells keep the zero mean and the anti-diagonal sentinel in
/// `inv_covariance`; the radius search's distance filter keeps them from
/// contributing at any realistic query point.
#[derive(Debug, Clone)]
pub struct VoxelCell {
    pub mean: Vector3<f64>,
    pub inv_covariance: Matrix3<f64>,
    pub point_count: i32,
}

impl VoxelCell {
    fn empty() -> Self {
        Self {
            mean: Vector3::zeros(),
            inv_covariance: sentinel_inverse_covariance(),
            point_count: 0,
        }
    }
}

/// Inverse-covariance pattern assigned to cells before any point lands in
/// them. Occupied cells accumulate their outer products on top of it.
fn sentinel_inverse_covariance() -> Matrix3<f64> {
    Matrix3::new(
        0.0, 0.0, 1.0, //
        0.0, 1.0, 0.0, //
        1.0, 0.0, 0.0,
    )
}

/// Axis-partitioned grid of Gaussian cells, read-only after build.
#[derive(Debug)]
pub struct VoxelGrid {
    min_corner: Vector3<f32>,
    max_corner: Vector3<f32>,
    resolution: f32,
    dims: [i32; 3],
    cells: Vec<VoxelCell>,
}

impl VoxelGrid {
    /// Build the grid for a target cloud.
    ///
    /// Bounds are the componentwise min/max of the cloud expanded by
    /// `transformation_epsilon` on all sides, so later lookups of slightly
    /// out-of-cloud query points still land inside the grid.
    pub fn build(target: &PointCloud, resolution: f32, transformation_epsilon: f64) -> Self {
        let first = target.first().copied().unwrap_or_default();
        let mut min = Vector3::new(first.x, first.y, first.z);
        let mut max = min;
        for p in target.iter().skip(1) {
            let coords = [p.x, p.y, p.z];
            for (elem, &value) in coords.iter().enumerate() {
                if value > max[elem] {
                    max[elem] = value;
                }
                if value < min[elem] {
                    min[elem] = value;
                }
            }
        }

        let mut dims = [0i32; 3];
        for i in 0..3 {
            min[i] = (min[i] as f64 - transformation_epsilon) as f32;
            max[i] = (max[i] as f64 + transformation_epsilon) as f32;
            dims[i] = ((max[i] - min[i]) / resolution + 1.0) as i32;
        }

        let cell_count = (dims[0] * dims[1] * dims[2]) as usize;
        let mut grid = Self {
            min_corner: min,
            max_corner: max,
            resolution,
            dims,
            cells: vec![VoxelCell::empty(); cell_count],
        };

        // First pass: scatter point sums and outer products into the cells.
        // The mean slot holds the running sum until finalization.
        for p in target {
            let idx = grid.linearize_coord(p.x, p.y, p.z);
            let cell = &mut grid.cells[idx];
            cell.mean[0] += p.x as f64;
            cell.mean[1] += p.y as f64;
            cell.mean[2] += p.z as f64;
            cell.point_count += 1;
            let coords = [p.x, p.y, p.z];
            for row in 0..3 {
                for col in 0..3 {
                    cell.inv_covariance[(row, col)] += (coords[row] * coords[col]) as f64;
                }
            }
        }

        // Second pass: finalize occupied cells, each independent of the rest.
        let total_cells = cell_count as f64;
        grid.cells.par_iter_mut().for_each(|cell| {
            if cell.point_count == 0 {
                return;
            }
            let count = cell.point_count as f64;
            let point_sum = cell.mean;
            cell.mean /= count;
            for row in 0..3 {
                for col in 0..3 {
                    cell.inv_covariance[(row, col)] = (cell.inv_covariance[(row, col)]
                        - 2.0 * (point_sum[row] * cell.mean[col]))
                        / total_cells
                        + cell.mean[row] * cell.mean[col];
                    cell.inv_covariance[(row, col)] *= (total_cells - 1.0) / count;
                }
            }
            invert3x3(&mut cell.inv_covariance);
        });

        grid
    }

    #[inline]
    fn linearize_addr(&self, x: i32, y: i32, z: i32) -> usize {
        (x + self.dims[0] * (y + self.dims[1] * z)) as usize
    }

    #[inline]
    fn linearize_coord(&self, x: f32, y: f32, z: f32) -> usize {
        let idx_x = ((x - self.min_corner.x) / self.resolution) as i32;
        let idx_y = ((y - self.min_corner.y) / self.resolution) as i32;
        let idx_z = ((z - self.min_corner.z) / self.resolution) as i32;
        self.linearize_addr(idx_x, idx_y, idx_z)
    }

    /// Collect the cells whose mean lies within `radius` of `point`.
    ///
    /// Candidates are enumerated by stepping the axis-aligned neighborhood
    /// of the query at grid resolution, skipping steps outside the grid
    /// extent, and filtering by Euclidean distance to the cell mean. With
    /// the radius equal to the resolution this visits a constant number of
    /// candidates per query. Results are `(cell index, distance)` pairs in
    /// enumeration order.
    pub fn radius_search(&self, point: &Point, radius: f64, neighborhood: &mut Vec<(usize, f32)>) {
        neighborhood.clear();
        let mut x = (point.x as f64 - radius) as f32;
        while (x as f64) <= point.x as f64 + radius {
            let mut y = (point.y as f64 - radius) as f32;
            while (y as f64) <= point.y as f64 + radius {
                let mut z = (point.z as f64 - radius) as f32;
                while (z as f64) <= point.z as f64 + radius {
                    let outside = x < self.min_corner[0]
                        || x > self.max_corner[0]
                        || y < self.min_corner[1]
                        || y > self.max_corner[1]
                        || z < self.min_corner[2]
                        || z > self.max_corner[2];
                    if !outside {
                        let idx = self.linearize_coord(x, y, z);
                        let mean = &self.cells[idx].mean;
                        let dx = (mean[0] - point.x as f64) as f32;
                        let dy = (mean[1] - point.y as f64) as f32;
                        let dz = (mean[2] - point.z as f64) as f32;
                        let dist = f64::sqrt((dx * dx + dy * dy + dz * dz) as f64) as f32;
                        if (dist as f64) < radius {
                            neighborhood.push((idx, dist));
                        }
                    }
                    z += self.resolution;
                }
                y += self.resolution;
            }
            x += self.resolution;
        }
    }

    pub fn cell(&self, idx: usize) -> &VoxelCell {
        &self.cells[idx]
    }

    pub fn cells(&self) -> &[VoxelCell] {
        &self.cells
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn resolution(&self) -> f32 {
        self.resolution
    }

    pub fn dims(&self) -> [i32; 3] {
        self.dims
    }

    pub fn min_corner(&self) -> Vector3<f32> {
        self.min_corner
    }

    pub fn max_corner(&self) -> Vector3<f32> {
        self.max_corner
    }
}
