//! Small fixed-size linear algebra routines with reference-parity semantics.
//!
//! The registration loop must stay numerically close to the benchmark's
//! reference kernel, so the solve, inversion, and pose-composition routines
//! here reproduce that kernel's arithmetic rather than delegating to
//! nalgebra's decompositions. Deviations from textbook formulas below are
//! deliberate.

use nalgebra::{Matrix3, Matrix4, Matrix6, Vector3, Vector6};
use tracing::trace;

/// Substituted for a zero pivot during elimination so a singular Hessian
/// degrades the Newton step instead of aborting the registration.
pub const MAX_TRANSLATION_EPS: f64 = 0.001;

/// Solve `A x = b` by Gaussian elimination with partial pivoting.
///
/// Row swaps are applied to `A` only, and an exactly-zero pivot column gets
/// [`MAX_TRANSLATION_EPS`] substituted on the diagonal; both choices mirror
/// the reference kernel and are required for output parity. The result is
/// deterministic for a given input.
pub fn solve(mut a: Matrix6<f64>, mut b: Vector6<f64>) -> Vector6<f64> {
    for j in 0..6 {
        let mut max = a[(j, j)].abs();
        let mut mi = j;
        for i in (j + 1)..6 {
            if a[(i, j)].abs() > max {
                mi = i;
                max = a[(i, j)].abs();
            }
        }
        if mi != j {
            for i in 0..6 {
                let temp = a[(mi, i)];
                a[(mi, i)] = a[(j, i)];
                a[(j, i)] = temp;
            }
        }
        if max == 0.0 {
            trace!(column = j, "singular pivot, substituting epsilon");
            a[(j, j)] = MAX_TRANSLATION_EPS;
        }
        for i in (j + 1)..6 {
            let pivot = a[(i, j)] / a[(j, j)];
            for k in 0..6 {
                a[(i, k)] -= pivot * a[(j, k)];
            }
            b[i] -= pivot * b[j];
        }
    }

    let mut result = Vector6::zeros();
    result[5] = b[5] / a[(5, 5)];
    for i in (0..5).rev() {
        let mut sum = 0.0;
        for j in (i + 1)..6 {
            sum += a[(i, j)] * result[j];
        }
        result[i] = (b[i] - sum) / a[(i, i)];
    }
    result
}

/// Invert a 3x3 matrix in place via its adjugate and determinant.
///
/// Intended for the symmetric per-cell covariance matrices, for which the
/// cofactor expressions below are exact. The caller is responsible for
/// conditioning: a singular input yields non-finite entries that the
/// derivative accumulation later filters out.
pub fn invert3x3(m: &mut Matrix3<f64>) {
    let det = m[(0, 0)] * (m[(2, 2)] * m[(1, 1)] - m[(2, 1)] * m[(1, 2)])
        - m[(1, 0)] * (m[(2, 2)] * m[(0, 1)] - m[(2, 1)] * m[(0, 2)])
        + m[(2, 0)] * (m[(1, 2)] * m[(0, 1)] - m[(1, 1)] * m[(0, 2)]);
    let inv_det = 1.0 / det;

    let mut temp = Matrix3::zeros();
    temp[(0, 0)] = m[(2, 2)] * m[(1, 1)] - m[(2, 1)] * m[(1, 2)];
    temp[(0, 1)] = -(m[(2, 2)] * m[(0, 1)] - m[(2, 1)] * m[(0, 2)]);
    temp[(0, 2)] = m[(1, 2)] * m[(0, 1)] - m[(1, 1)] * m[(0, 2)];

    temp[(1, 0)] = -(m[(2, 2)] * m[(0, 1)] - m[(2, 0)] * m[(1, 2)]);
    temp[(1, 1)] = m[(2, 2)] * m[(0, 0)] - m[(2, 1)] * m[(0, 2)];
    temp[(1, 2)] = -(m[(1, 2)] * m[(0, 0)] - m[(1, 0)] * m[(0, 2)]);

    temp[(2, 0)] = m[(2, 1)] * m[(1, 0)] - m[(2, 0)] * m[(1, 1)];
    temp[(2, 1)] = -(m[(2, 1)] * m[(0, 0)] - m[(2, 0)] * m[(0, 1)]);
    temp[(2, 2)] = m[(1, 1)] * m[(0, 0)] - m[(1, 0)] * m[(0, 1)];

    for row in 0..3 {
        for col in 0..3 {
            m[(row, col)] = temp[(row, col)] * inv_det;
        }
    }
}

/// Build the affine transform for a `(tx, ty, tz, rx, ry, rz)` pose vector.
///
/// The rotation is composed from per-axis quaternions multiplied in X, Y, Z
/// order, in single precision, with the reference kernel's component
/// ordering kept verbatim. That ordering shuffles the scalar part between
/// multiplications, so the zero pose maps to a 180-degree rotation about Y
/// rather than the identity; the benchmark comparator's tolerance exists to
/// absorb exactly this family of sign flips, and reproducing it is required
/// for output parity. The translation lands in column 3 and row 3 is
/// `(0, 0, 0, 1)`.
pub fn build_transformation_matrix(transform: &Vector6<f64>) -> Matrix4<f32> {
    let q_ha = (0.5 * transform[3]) as f32;
    let q_w = f64::cos(q_ha as f64) as f32;
    let q_x = f64::sin(q_ha as f64) as f32;
    let q_y = 0.0f32;
    let q_z = 0.0f32;

    let q_ha2 = (0.5 * transform[4]) as f32;
    let q_w2 = f64::cos(q_ha2 as f64) as f32;
    let q_x2 = 0.0f32;
    let q_y2 = f64::sin(q_ha2 as f64) as f32;
    let q_z2 = 0.0f32;

    let q_ha3 = (0.5 * transform[5]) as f32;
    let q_w3 = f64::cos(q_ha3 as f64) as f32;
    let q_x3 = 0.0f32;
    let q_y3 = 0.0f32;
    let q_z3 = f64::sin(q_ha3 as f64) as f32;

    // First product, with the scalar part landing in the x slot.
    let r_x = q_w * q_w2 - q_x * q_x2 - q_y * q_y2 - q_z * q_z2;
    let r_y = q_w * q_x2 + q_x * q_w2 + q_y * q_z2 - q_z * q_y2;
    let r_z = q_w * q_y2 + q_y * q_w2 + q_z * q_x2 - q_x * q_z2;
    let r_w = q_w * q_z2 + q_z * q_w2 + q_x * q_y2 - q_y * q_x2;

    // Second product, reading the shifted slots as (w, x, y, z).
    let r2_x = r_w * q_w3 - r_x * q_x3 - r_y * q_y3 - r_z * q_z3;
    let r2_y = r_w * q_x3 + r_x * q_w3 + r_y * q_z3 - r_z * q_y3;
    let r2_z = r_w * q_y3 + r_y * q_w3 + r_z * q_x3 - r_x * q_z3;
    let r2_w = r_w * q_z3 + r_z * q_w3 + r_x * q_y3 - r_y * q_x3;

    let tx = 2.0f32 * r2_x;
    let ty = 2.0f32 * r2_y;
    let tz = 2.0f32 * r2_z;
    let twx = tx * r2_w;
    let twy = ty * r2_w;
    let twz = tz * r2_w;
    let txx = tx * r2_x;
    let txy = ty * r2_x;
    let txz = tz * r2_x;
    let tyy = ty * r2_y;
    let tyz = tz * r2_y;
    let tzz = tz * r2_z;

    let mut matrix = Matrix4::zeros();
    matrix[(3, 0)] = 0.0;
    matrix[(3, 1)] = 0.0;
    matrix[(3, 2)] = 0.0;
    matrix[(3, 3)] = 1.0;
    matrix[(0, 3)] = transform[0] as f32;
    matrix[(1, 3)] = transform[1] as f32;
    matrix[(2, 3)] = transform[2] as f32;

    matrix[(0, 0)] = 1.0f32 - (tyy + tzz);
    matrix[(0, 1)] = txy - twz;
    matrix[(0, 2)] = txz + twy;
    matrix[(1, 0)] = txy + twz;
    matrix[(1, 1)] = 1.0f32 - (txx + tzz);
    matrix[(1, 2)] = tyz - twx;
    matrix[(2, 0)] = txz - twy;
    matrix[(2, 1)] = tyz + twx;
    matrix[(2, 2)] = 1.0f32 - (txx + tyy);

    matrix
}

/// Extract ZYX Euler angles from the rotation block of an affine transform.
///
/// Uses the reference kernel's `atan2` sequence, including the pitch branch
/// taken when the raw roll is positive, and returns the negated angles;
/// the optimization vector is seeded directly from this result.
pub fn euler_angles(trans: &Matrix4<f32>) -> Vector3<f64> {
    const I: usize = 0;
    const J: usize = 1;
    const K: usize = 2;

    let mut res = Vector3::zeros();
    res[0] = f64::atan2(trans[(J, K)] as f64, trans[(K, K)] as f64);
    let n1 = trans[(I, I)] as f64;
    let n2 = trans[(I, J)] as f64;
    let c2 = (n1 * n1 + n2 * n2).sqrt();
    if res[0] > 0.0 {
        res[0] -= std::f64::consts::PI;
        res[1] = f64::atan2(-(trans[(I, K)] as f64), -c2);
    } else {
        res[1] = f64::atan2(-(trans[(I, K)] as f64), c2);
    }
    let s1 = res[0].sin();
    let c1 = res[0].cos();
    res[2] = f64::atan2(
        s1 * trans[(K, I)] as f64 - c1 * trans[(J, I)] as f64,
        c1 * trans[(J, J)] as f64 - s1 * trans[(K, J)] as f64,
    );

    Vector3::new(-res[0], -res[1], -res[2])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn solve_identity_system() {
        let a = Matrix6::identity();
        let b = Vector6::new(1.0, -2.0, 3.0, 0.5, 0.0, 6.0);

        let x = solve(a, b);

        for i in 0..6 {
            assert_relative_eq!(x[i], b[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn solve_diagonally_dominant_system() {
        // No row swaps occur, so the solution is exact up to rounding.
        let mut a = Matrix6::identity() * 10.0;
        for i in 0..6 {
            for j in 0..6 {
                if i != j {
                    a[(i, j)] = 0.5;
                }
            }
        }
        let x_known = Vector6::new(1.0, 2.0, 3.0, -1.0, -2.0, -3.0);
        let b = a * x_known;

        let x = solve(a, b);

        for i in 0..6 {
            assert_relative_eq!(x[i], x_known[i], epsilon = 1e-10);
        }
    }

    #[test]
    fn solve_zero_matrix_stays_finite() {
        let a = Matrix6::zeros();
        let b = Vector6::new(1.0, 1.0, 1.0, 1.0, 1.0, 1.0);

        let x = solve(a, b);

        for i in 0..6 {
            assert!(x[i].is_finite(), "x[{i}] = {}", x[i]);
        }
    }

    #[test]
    fn invert3x3_symmetric_roundtrip() {
        let mut m = Matrix3::new(
            4.0, 1.0, 0.5, //
            1.0, 3.0, 0.2, //
            0.5, 0.2, 2.0,
        );
        let original = m;

        invert3x3(&mut m);

        let product = original * m;
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(product[(i, j)], expected, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn zero_pose_maps_to_y_flip() {
        let m = build_transformation_matrix(&Vector6::zeros());

        // The component shuffle turns the zero rotation into diag(-1, 1, -1).
        assert_relative_eq!(m[(0, 0)], -1.0f32);
        assert_relative_eq!(m[(1, 1)], 1.0f32);
        assert_relative_eq!(m[(2, 2)], -1.0f32);
        assert_relative_eq!(m[(0, 3)], 0.0f32);
        assert_relative_eq!(m[(3, 3)], 1.0f32);
    }

    #[test]
    fn translation_lands_in_last_column() {
        let m = build_transformation_matrix(&Vector6::new(1.5, -2.0, 0.25, 0.0, 0.0, 0.0));

        assert_relative_eq!(m[(0, 3)], 1.5f32);
        assert_relative_eq!(m[(1, 3)], -2.0f32);
        assert_relative_eq!(m[(2, 3)], 0.25f32);
        assert_relative_eq!(m[(3, 0)], 0.0f32);
        assert_relative_eq!(m[(3, 3)], 1.0f32);
    }

    #[test]
    fn rotation_block_stays_orthonormal() {
        let m = build_transformation_matrix(&Vector6::new(0.0, 0.0, 0.0, 0.3, -0.2, 0.7));

        // Columns of the rotation block are unit length and orthogonal even
        // though the composition is shuffled.
        for c in 0..3 {
            let norm_sq: f32 = (0..3).map(|r| m[(r, c)] * m[(r, c)]).sum();
            assert_relative_eq!(norm_sq, 1.0f32, epsilon = 1e-5);
        }
        for (c1, c2) in [(0, 1), (0, 2), (1, 2)] {
            let dot: f32 = (0..3).map(|r| m[(r, c1)] * m[(r, c2)]).sum();
            assert_relative_eq!(dot, 0.0f32, epsilon = 1e-5);
        }
    }

    #[test]
    fn euler_angles_of_identity_are_zero() {
        let ea = euler_angles(&Matrix4::identity());

        assert_relative_eq!(ea[0], 0.0, epsilon = 1e-12);
        assert_relative_eq!(ea[1], 0.0, epsilon = 1e-12);
        assert_relative_eq!(ea[2], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn euler_angles_recover_pure_roll() {
        // Standard rotation about x by theta, written out directly.
        let theta = 0.4f32;
        let (s, c) = (theta.sin(), theta.cos());
        let mut m = Matrix4::identity();
        m[(1, 1)] = c;
        m[(1, 2)] = -s;
        m[(2, 1)] = s;
        m[(2, 2)] = c;

        let ea = euler_angles(&m);

        // The negation convention returns the angle itself for this branch.
        assert_relative_eq!(ea[0], theta as f64, epsilon = 1e-6);
        assert_relative_eq!(ea[1], 0.0, epsilon = 1e-6);
        assert_relative_eq!(ea[2], 0.0, epsilon = 1e-6);
    }
}
