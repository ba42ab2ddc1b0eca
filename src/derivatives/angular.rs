//! Precomputed trigonometric coefficients for the pose Jacobian and Hessian.
//!
//! Equations 6.19 and 6.21 of Magnusson 2009, specialized to the
//! `(tx, ty, tz, rx, ry, rz)` pose vector. The translation derivatives are
//! constant, so only the rotation terms live here; each field is dotted with
//! a source point to fill the point gradient and Hessian.

use nalgebra::{Vector3, Vector6};

/// Angles this close to zero are treated as exactly zero, skipping the trig
/// evaluation.
const ANGLE_EPSILON: f64 = 1e-4;

/// Jacobian (`j_ang_*`) and Hessian (`h_ang_*`) coefficient vectors for one
/// pose. Rebuilt whenever the pose changes.
#[derive(Debug, Clone)]
pub struct AngularDerivatives {
    pub j_ang_a: Vector3<f64>,
    pub j_ang_b: Vector3<f64>,
    pub j_ang_c: Vector3<f64>,
    pub j_ang_d: Vector3<f64>,
    pub j_ang_e: Vector3<f64>,
    pub j_ang_f: Vector3<f64>,
    pub j_ang_g: Vector3<f64>,
    pub j_ang_h: Vector3<f64>,

    pub h_ang_a2: Vector3<f64>,
    pub h_ang_a3: Vector3<f64>,
    pub h_ang_b2: Vector3<f64>,
    pub h_ang_b3: Vector3<f64>,
    pub h_ang_c2: Vector3<f64>,
    pub h_ang_c3: Vector3<f64>,
    pub h_ang_d1: Vector3<f64>,
    pub h_ang_d2: Vector3<f64>,
    pub h_ang_d3: Vector3<f64>,
    pub h_ang_e1: Vector3<f64>,
    pub h_ang_e2: Vector3<f64>,
    pub h_ang_e3: Vector3<f64>,
    pub h_ang_f1: Vector3<f64>,
    pub h_ang_f2: Vector3<f64>,
    pub h_ang_f3: Vector3<f64>,
}

impl AngularDerivatives {
    /// Evaluate the coefficient vectors at pose `p`.
    pub fn new(p: &Vector6<f64>) -> Self {
        let (sx, cx) = if p[3].abs() < ANGLE_EPSILON {
            (0.0, 1.0)
        } else {
            (p[3].sin(), p[3].cos())
        };
        let (sy, cy) = if p[4].abs() < ANGLE_EPSILON {
            (0.0, 1.0)
        } else {
            (p[4].sin(), p[4].cos())
        };
        let (sz, cz) = if p[5].abs() < ANGLE_EPSILON {
            (0.0, 1.0)
        } else {
            (p[5].sin(), p[5].cos())
        };

        Self {
            j_ang_a: Vector3::new(-sx * sz + cx * sy * cz, -sx * cz - cx * sy * sz, -cx * cy),
            j_ang_b: Vector3::new(cx * sz + sx * sy * cz, cx * cz - sx * sy * sz, -sx * cy),
            j_ang_c: Vector3::new(-sy * cz, sy * sz, cy),
            j_ang_d: Vector3::new(sx * cy * cz, -sx * cy * sz, sx * sy),
            j_ang_e: Vector3::new(-cx * cy * cz, cx * cy * sz, -cx * sy),
            j_ang_f: Vector3::new(-cy * sz, -cy * cz, 0.0),
            j_ang_g: Vector3::new(cx * cz - sx * sy * sz, -cx * sz - sx * sy * cz, 0.0),
            j_ang_h: Vector3::new(sx * cz + cx * sy * sz, cx * sy * cz - sx * sz, 0.0),

            h_ang_a2: Vector3::new(-cx * sz - sx * sy * cz, -cx * cz + sx * sy * sz, sx * cy),
            h_ang_a3: Vector3::new(-sx * sz + cx * sy * cz, -cx * sy * sz - sx * cz, -cx * cy),
            h_ang_b2: Vector3::new(cx * cy * cz, -cx * cy * sz, cx * sy),
            h_ang_b3: Vector3::new(sx * cy * cz, -sx * cy * sz, sx * sy),
            h_ang_c2: Vector3::new(-sx * cz - cx * sy * sz, sx * sz - cx * sy * cz, 0.0),
            h_ang_c3: Vector3::new(cx * cz - sx * sy * sz, -sx * sy * cz - cx * sz, 0.0),
            h_ang_d1: Vector3::new(-cy * cz, cy * sz, sy),
            h_ang_d2: Vector3::new(-sx * sy * cz, sx * sy * sz, sx * cy),
            h_ang_d3: Vector3::new(cx * sy * cz, -cx * sy * sz, -cx * cy),
            h_ang_e1: Vector3::new(sy * sz, sy * cz, 0.0),
            h_ang_e2: Vector3::new(-sx * cy * sz, -sx * cy * cz, 0.0),
            h_ang_e3: Vector3::new(cx * cy * sz, cx * cy * cz, 0.0),
            h_ang_f1: Vector3::new(-cy * cz, cy * sz, 0.0),
            h_ang_f2: Vector3::new(-cx * sz - sx * sy * cz, -cx * cz + sx * sy * sz, 0.0),
            h_ang_f3: Vector3::new(-sx * sz + cx * sy * cz, -cx * sy * sz - sx * cz, 0.0),
        }
    }
}
