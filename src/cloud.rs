//! Point cloud primitives shared by the registration pipeline.

use nalgebra::Matrix4;
use rayon::prelude::*;

/// A single LiDAR return.
///
/// The intensity channel is carried through parsing and transformation but
/// is not consulted by the registration math; the facade overwrites it with
/// `1.0` on its working copy so the buffer doubles as homogeneous
/// coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub intensity: f32,
}

impl Point {
    pub fn new(x: f32, y: f32, z: f32, intensity: f32) -> Self {
        Self { x, y, z, intensity }
    }
}

/// An ordered point cloud. Sized once per test case.
pub type PointCloud = Vec<Point>;

/// Apply an affine rigid transform to every point of a cloud.
///
/// Only the spatial rows of the matrix participate; the homogeneous row is
/// assumed to be `(0, 0, 0, 1)` and the intensity channel is passed through
/// unchanged. Arithmetic is single precision, matching the wire format.
pub fn transform_cloud(input: &PointCloud, transform: &Matrix4<f32>) -> PointCloud {
    let mut output = Vec::new();
    input
        .par_iter()
        .map(|p| transform_point(p, transform))
        .collect_into_vec(&mut output);
    output
}

/// Transform a single point, keeping its intensity.
pub fn transform_point(p: &Point, transform: &Matrix4<f32>) -> Point {
    let mut out = [0.0f32; 3];
    for (row, out_row) in out.iter_mut().enumerate() {
        *out_row = transform[(row, 0)] * p.x
            + transform[(row, 1)] * p.y
            + transform[(row, 2)] * p.z
            + transform[(row, 3)];
    }
    Point::new(out[0], out[1], out[2], p.intensity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Matrix4;

    #[test]
    fn identity_transform_keeps_points() {
        let cloud = vec![Point::new(1.0, 2.0, 3.0, 0.5)];
        let out = transform_cloud(&cloud, &Matrix4::identity());

        assert_relative_eq!(out[0].x, 1.0);
        assert_relative_eq!(out[0].y, 2.0);
        assert_relative_eq!(out[0].z, 3.0);
        assert_relative_eq!(out[0].intensity, 0.5);
    }

    #[test]
    fn translation_moves_points() {
        let mut m = Matrix4::identity();
        m[(0, 3)] = 1.0;
        m[(1, 3)] = -2.0;
        m[(2, 3)] = 0.5;

        let cloud = vec![Point::new(1.0, 1.0, 1.0, 1.0)];
        let out = transform_cloud(&cloud, &m);

        assert_relative_eq!(out[0].x, 2.0);
        assert_relative_eq!(out[0].y, -1.0);
        assert_relative_eq!(out[0].z, 1.5);
    }

    #[test]
    fn rotation_ignores_intensity() {
        // 90 degree rotation about z
        let mut m = Matrix4::identity();
        m[(0, 0)] = 0.0;
        m[(0, 1)] = -1.0;
        m[(1, 0)] = 1.0;
        m[(1, 1)] = 0.0;

        let cloud = vec![Point::new(1.0, 0.0, 0.0, 7.0)];
        let out = transform_cloud(&cloud, &m);

        assert_relative_eq!(out[0].x, 0.0);
        assert_relative_eq!(out[0].y, 1.0);
        assert_relative_eq!(out[0].intensity, 7.0);
    }
}
