//! Score, gradient, and Hessian of the NDT objective.
//!
//! Implements the per-point update equations 6.9, 6.12, and 6.13 of
//! Magnusson 2009 against the target voxel grid. The accumulation walks
//! source points in order and matched cells in neighborhood-enumeration
//! order, so a given input always produces bit-identical sums.

pub mod angular;

use nalgebra::{Matrix3, Matrix6, Vector3, Vector6};

use crate::cloud::PointCloud;
use crate::voxel_grid::VoxelGrid;
pub use angular::AngularDerivatives;

/// 3x6 gradient of the transformed point with respect to the pose.
pub type Matrix3x6 =
    nalgebra::Matrix<f64, nalgebra::U3, nalgebra::U6, nalgebra::ArrayStorage<f64, 3, 6>>;

/// 18x6 second derivative of the transformed point; the 3x1 block starting
/// at row `3 * i`, column `j` holds the mixed derivative for parameters
/// `(i, j)`.
pub type Matrix18x6 =
    nalgebra::Matrix<f64, nalgebra::U18, nalgebra::U6, nalgebra::ArrayStorage<f64, 18, 6>>;

/// Gaussian mixture fit controlling the NDT score shape (eq. 6.8).
///
/// `d1` comes out negative, so per-cell score contributions
/// `-d1 * exp(...)` are positive and the driver maximizes the sum.
#[derive(Debug, Clone, Copy)]
pub struct GaussianFit {
    pub d1: f64,
    pub d2: f64,
}

impl GaussianFit {
    /// Derive the fit from the outlier ratio and voxel resolution.
    pub fn new(outlier_ratio: f64, resolution: f64) -> Self {
        let gauss_c1 = 10.0 * (1.0 - outlier_ratio);
        let gauss_c2 = outlier_ratio / resolution.powi(3);
        let gauss_d3 = -gauss_c2.ln();
        let d1 = -(gauss_c1 + gauss_c2).ln() - gauss_d3;
        let d2 = -2.0 * ((-(gauss_c1 * (-0.5f64).exp() + gauss_c2).ln() - gauss_d3) / d1).ln();
        Self { d1, d2 }
    }
}

/// Derivatives of one transformed source point with respect to the pose.
///
/// The translation block of the gradient is the identity and never changes;
/// the rotation entries are refilled per point from the angular
/// coefficients.
#[derive(Debug, Clone)]
pub struct PointDerivatives {
    pub gradient: Matrix3x6,
    pub hessian: Matrix18x6,
}

impl PointDerivatives {
    pub fn new() -> Self {
        let mut gradient = Matrix3x6::zeros();
        gradient[(0, 0)] = 1.0;
        gradient[(1, 1)] = 1.0;
        gradient[(2, 2)] = 1.0;
        Self {
            gradient,
            hessian: Matrix18x6::zeros(),
        }
    }
}

impl Default for PointDerivatives {
    fn default() -> Self {
        Self::new()
    }
}

/// Accumulated objective value and its first two derivatives for one pose.
#[derive(Debug, Clone)]
pub struct ScanDerivatives {
    pub score: f64,
    pub gradient: Vector6<f64>,
    pub hessian: Matrix6<f64>,
}

impl ScanDerivatives {
    pub fn zeros() -> Self {
        Self {
            score: 0.0,
            gradient: Vector6::zeros(),
            hessian: Matrix6::zeros(),
        }
    }
}

/// Fill the rotation-dependent entries of the point derivatives for source
/// point `x` (eq. 6.18-6.21).
pub fn compute_point_derivatives(
    x: &Vector3<f64>,
    angular: &AngularDerivatives,
    out: &mut PointDerivatives,
) {
    out.gradient[(1, 3)] = x.dot(&angular.j_ang_a);
    out.gradient[(2, 3)] = x.dot(&angular.j_ang_b);
    out.gradient[(0, 4)] = x.dot(&angular.j_ang_c);
    out.gradient[(1, 4)] = x.dot(&angular.j_ang_d);
    out.gradient[(2, 4)] = x.dot(&angular.j_ang_e);
    out.gradient[(0, 5)] = x.dot(&angular.j_ang_f);
    out.gradient[(1, 5)] = x.dot(&angular.j_ang_g);
    out.gradient[(2, 5)] = x.dot(&angular.j_ang_h);

    let a = Vector3::new(0.0, x.dot(&angular.h_ang_a2), x.dot(&angular.h_ang_a3));
    let b = Vector3::new(0.0, x.dot(&angular.h_ang_b2), x.dot(&angular.h_ang_b3));
    let c = Vector3::new(0.0, x.dot(&angular.h_ang_c2), x.dot(&angular.h_ang_c3));
    let d = Vector3::new(
        x.dot(&angular.h_ang_d1),
        x.dot(&angular.h_ang_d2),
        x.dot(&angular.h_ang_d3),
    );
    let e = Vector3::new(
        x.dot(&angular.h_ang_e1),
        x.dot(&angular.h_ang_e2),
        x.dot(&angular.h_ang_e3),
    );
    let f = Vector3::new(
        x.dot(&angular.h_ang_f1),
        x.dot(&angular.h_ang_f2),
        x.dot(&angular.h_ang_f3),
    );

    let mut set_block = |row: usize, col: usize, v: &Vector3<f64>| {
        out.hessian[(row, col)] = v[0];
        out.hessian[(row + 1, col)] = v[1];
        out.hessian[(row + 2, col)] = v[2];
    };
    set_block(9, 3, &a);
    set_block(12, 3, &b);
    set_block(15, 3, &c);
    set_block(9, 4, &b);
    set_block(12, 4, &d);
    set_block(15, 4, &e);
    set_block(9, 5, &c);
    set_block(12, 5, &e);
    set_block(15, 5, &f);
}

/// Accumulate one point-cell pair into the gradient (and optionally the
/// Hessian), returning its score contribution.
///
/// A scaled exponent outside `[0, 1]` or NaN marks an overflowed or
/// ill-conditioned cell; the pair is silently dropped.
pub fn update_derivatives(
    score_gradient: &mut Vector6<f64>,
    hessian: &mut Matrix6<f64>,
    x_trans: &Vector3<f64>,
    c_inv: &Matrix3<f64>,
    point: &PointDerivatives,
    gauss: &GaussianFit,
    compute_hessian: bool,
) -> f64 {
    let x_cx = mahalanobis_quadratic(x_trans, c_inv);
    let mut e_x_cov_x = (-gauss.d2 * x_cx / 2.0).exp();
    let score_inc = -gauss.d1 * e_x_cov_x;

    e_x_cov_x = gauss.d2 * e_x_cov_x;
    if !(0.0..=1.0).contains(&e_x_cov_x) || e_x_cov_x.is_nan() {
        return 0.0;
    }
    e_x_cov_x *= gauss.d1;

    for i in 0..6 {
        let cov_dxd_pi = c_inv_times_gradient_column(c_inv, point, i);
        score_gradient[i] += x_trans.dot(&cov_dxd_pi) * e_x_cov_x;

        if compute_hessian {
            accumulate_hessian_row(hessian, x_trans, c_inv, point, i, &cov_dxd_pi, e_x_cov_x, gauss);
        }
    }

    score_inc
}

/// Accumulate one point-cell pair into a Hessian-only pass (eq. 6.13).
pub fn update_hessian(
    hessian: &mut Matrix6<f64>,
    x_trans: &Vector3<f64>,
    c_inv: &Matrix3<f64>,
    point: &PointDerivatives,
    gauss: &GaussianFit,
) {
    let x_cx = mahalanobis_quadratic(x_trans, c_inv);
    let mut e_x_cov_x = gauss.d2 * (-gauss.d2 * x_cx / 2.0).exp();
    if !(0.0..=1.0).contains(&e_x_cov_x) || e_x_cov_x.is_nan() {
        return;
    }
    e_x_cov_x *= gauss.d1;

    for i in 0..6 {
        let cov_dxd_pi = c_inv_times_gradient_column(c_inv, point, i);
        accumulate_hessian_row(hessian, x_trans, c_inv, point, i, &cov_dxd_pi, e_x_cov_x, gauss);
    }
}

/// `(x - mu)^T Sigma^-1 (x - mu)` expanded symmetrically.
#[inline]
fn mahalanobis_quadratic(x_trans: &Vector3<f64>, c_inv: &Matrix3<f64>) -> f64 {
    c_inv[(0, 0)] * x_trans[0] * x_trans[0]
        + c_inv[(1, 1)] * x_trans[1] * x_trans[1]
        + c_inv[(2, 2)] * x_trans[2] * x_trans[2]
        + (c_inv[(0, 1)] + c_inv[(1, 0)]) * x_trans[0] * x_trans[1]
        + (c_inv[(0, 2)] + c_inv[(2, 0)]) * x_trans[0] * x_trans[2]
        + (c_inv[(1, 2)] + c_inv[(2, 1)]) * x_trans[1] * x_trans[2]
}

/// `Sigma^-1 * dT/dp_i`, the reusable column product of eq. 6.12/6.13.
#[inline]
fn c_inv_times_gradient_column(
    c_inv: &Matrix3<f64>,
    point: &PointDerivatives,
    i: usize,
) -> Vector3<f64> {
    let mut out = Vector3::zeros();
    for row in 0..3 {
        for col in 0..3 {
            out[row] += c_inv[(row, col)] * point.gradient[(col, i)];
        }
    }
    out
}

#[allow(clippy::too_many_arguments)]
#[inline]
fn accumulate_hessian_row(
    hessian: &mut Matrix6<f64>,
    x_trans: &Vector3<f64>,
    c_inv: &Matrix3<f64>,
    point: &PointDerivatives,
    i: usize,
    cov_dxd_pi: &Vector3<f64>,
    e_x_cov_x: f64,
    gauss: &GaussianFit,
) {
    for j in 0..6 {
        let col_vec = Vector3::new(
            point.gradient[(0, j)],
            point.gradient[(1, j)],
            point.gradient[(2, j)],
        );
        let col_vec_hess = Vector3::new(
            col_vec[0] + point.hessian[(3 * i, j)],
            col_vec[1] + point.hessian[(3 * i + 1, j)],
            col_vec[2] + point.hessian[(3 * i + 2, j)],
        );
        let mut mat_prod = Vector3::zeros();
        for row in 0..3 {
            for col in 0..3 {
                mat_prod[row] += c_inv[(row, col)] * col_vec_hess[col];
            }
        }
        hessian[(i, j)] += e_x_cov_x
            * (-gauss.d2 * x_trans.dot(cov_dxd_pi) * x_trans.dot(&mat_prod)
                + col_vec.dot(cov_dxd_pi));
    }
}

/// Evaluate score, gradient, and (optionally) Hessian of the objective for
/// the whole cloud at pose `p`.
///
/// `trans_cloud` must already hold the source transformed to `p`; the raw
/// source points feed the pose Jacobian while the transformed points drive
/// the cell matching.
pub fn compute_derivatives(
    source: &PointCloud,
    trans_cloud: &PointCloud,
    grid: &VoxelGrid,
    p: &Vector6<f64>,
    gauss: &GaussianFit,
    compute_hessian: bool,
) -> ScanDerivatives {
    let mut result = ScanDerivatives::zeros();
    let angular = AngularDerivatives::new(p);
    let mut point_deriv = PointDerivatives::new();
    let mut neighborhood = Vec::new();

    for (idx, x_trans_pt) in trans_cloud.iter().enumerate() {
        grid.radius_search(x_trans_pt, grid.resolution() as f64, &mut neighborhood);

        for &(cell_idx, _dist) in &neighborhood {
            let cell = grid.cell(cell_idx);
            let x_pt = &source[idx];
            let x = Vector3::new(x_pt.x as f64, x_pt.y as f64, x_pt.z as f64);
            let x_trans = Vector3::new(
                x_trans_pt.x as f64 - cell.mean[0],
                x_trans_pt.y as f64 - cell.mean[1],
                x_trans_pt.z as f64 - cell.mean[2],
            );

            compute_point_derivatives(&x, &angular, &mut point_deriv);
            result.score += update_derivatives(
                &mut result.gradient,
                &mut result.hessian,
                &x_trans,
                &cell.inv_covariance,
                &point_deriv,
                gauss,
                compute_hessian,
            );
        }
    }

    result
}

/// Hessian-only evaluation at pose `p`, used to refresh the Hessian after an
/// accepted line-search step.
pub fn compute_hessian(
    source: &PointCloud,
    trans_cloud: &PointCloud,
    grid: &VoxelGrid,
    p: &Vector6<f64>,
    gauss: &GaussianFit,
) -> Matrix6<f64> {
    let mut hessian = Matrix6::zeros();
    let angular = AngularDerivatives::new(p);
    let mut point_deriv = PointDerivatives::new();
    let mut neighborhood = Vec::new();

    for (idx, x_trans_pt) in trans_cloud.iter().enumerate() {
        grid.radius_search(x_trans_pt, grid.resolution() as f64, &mut neighborhood);

        for &(cell_idx, _dist) in &neighborhood {
            let cell = grid.cell(cell_idx);
            let x_pt = &source[idx];
            let x = Vector3::new(x_pt.x as f64, x_pt.y as f64, x_pt.z as f64);
            let x_trans = Vector3::new(
                x_trans_pt.x as f64 - cell.mean[0],
                x_trans_pt.y as f64 - cell.mean[1],
                x_trans_pt.z as f64 - cell.mean[2],
            );

            compute_point_derivatives(&x, &angular, &mut point_deriv);
            update_hessian(&mut hessian, &x_trans, &cell.inv_covariance, &point_deriv, gauss);
        }
    }

    hessian
}
