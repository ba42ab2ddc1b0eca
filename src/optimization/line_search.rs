//! More-Thuente step-length selection primitives.
//!
//! Interval update and trial value selection per More & Thuente 1994, with
//! the interpolation formulas of Sun & Yuan 2006 (eq. 2.4.2, 2.4.5,
//! 2.4.52, 2.4.56). The search driver that evaluates the objective at trial
//! steps lives in the optimization driver; this module is pure arithmetic.

/// `psi(alpha) = f(alpha) - f(0) - mu * g(0) * alpha` (eq. 2.1), the
/// auxiliary function used while the search interval is still open.
#[inline]
pub fn auxiliary_psi(a: f64, f_a: f64, f_0: f64, g_0: f64, mu: f64) -> f64 {
    f_a - f_0 - mu * g_0 * a
}

/// `psi'(alpha) = g(alpha) - mu * g(0)`.
#[inline]
pub fn auxiliary_dpsi(g_a: f64, g_0: f64, mu: f64) -> f64 {
    g_a - mu * g_0
}

/// Update the bracketing interval for the trial `(a_t, f_t, g_t)`.
///
/// Cases U1-U3 of the Updating Algorithm; returns `true` when none applies
/// and the interval has degenerated to a point.
pub fn update_interval_mt(
    a_l: &mut f64,
    f_l: &mut f64,
    g_l: &mut f64,
    a_u: &mut f64,
    f_u: &mut f64,
    g_u: &mut f64,
    a_t: f64,
    f_t: f64,
    g_t: f64,
) -> bool {
    // Case U1: the minimizer lies in [a_l, a_t].
    if f_t > *f_l {
        *a_u = a_t;
        *f_u = f_t;
        *g_u = g_t;
        false
    }
    // Case U2: the minimizer lies in [a_t, a_u].
    else if g_t * (*a_l - a_t) > 0.0 {
        *a_l = a_t;
        *f_l = f_t;
        *g_l = g_t;
        false
    }
    // Case U3: the minimizer lies in [a_t, a_l].
    else if g_t * (*a_l - a_t) < 0.0 {
        *a_u = *a_l;
        *f_u = *f_l;
        *g_u = *g_l;

        *a_l = a_t;
        *f_l = f_t;
        *g_l = g_t;
        false
    } else {
        true
    }
}

/// Select the next trial step from the current endpoints and trial.
///
/// Four cases keyed on the signs and magnitudes of `(f_t - f_l)`,
/// `g_t * g_l`, and `|g_t|` versus `|g_l|`, each blending a cubic
/// interpolant minimizer with a quadratic (or secant) one. Case 3 clamps
/// the result toward the upper endpoint by `0.66 * (a_u - a_t)`.
#[allow(clippy::too_many_arguments)]
pub fn trial_value_selection_mt(
    a_l: f64,
    f_l: f64,
    g_l: f64,
    a_u: f64,
    f_u: f64,
    g_u: f64,
    a_t: f64,
    f_t: f64,
    g_t: f64,
) -> f64 {
    // Case 1: higher function value at the trial.
    if f_t > f_l {
        // Cubic minimizer through f_l, f_t, g_l, g_t (eq. 2.4.52/2.4.56).
        let z = 3.0 * (f_t - f_l) / (a_t - a_l) - g_t - g_l;
        let w = (z * z - g_t * g_l).sqrt();
        let a_c = a_l + (a_t - a_l) * (w - g_l - z) / (g_t - g_l + 2.0 * w);

        // Quadratic minimizer through f_l, f_t, g_l (eq. 2.4.2).
        let a_q = a_l - 0.5 * (a_l - a_t) * g_l / (g_l - (f_l - f_t) / (a_l - a_t));

        if (a_c - a_l).abs() < (a_q - a_l).abs() {
            a_c
        } else {
            0.5 * (a_q + a_c)
        }
    }
    // Case 2: derivatives of opposite sign.
    else if g_t * g_l < 0.0 {
        let z = 3.0 * (f_t - f_l) / (a_t - a_l) - g_t - g_l;
        let w = (z * z - g_t * g_l).sqrt();
        let a_c = a_l + (a_t - a_l) * (w - g_l - z) / (g_t - g_l + 2.0 * w);

        // Secant step through g_l, g_t (eq. 2.4.5).
        let a_s = a_l - (a_l - a_t) / (g_l - g_t) * g_l;

        if (a_c - a_t).abs() >= (a_s - a_t).abs() {
            a_c
        } else {
            a_s
        }
    }
    // Case 3: derivative magnitude decreased.
    else if g_t.abs() <= g_l.abs() {
        let z = 3.0 * (f_t - f_l) / (a_t - a_l) - g_t - g_l;
        let w = (z * z - g_t * g_l).sqrt();
        let a_c = a_l + (a_t - a_l) * (w - g_l - z) / (g_t - g_l + 2.0 * w);

        let a_s = a_l - (a_l - a_t) / (g_l - g_t) * g_l;

        let a_t_next = if (a_c - a_t).abs() < (a_s - a_t).abs() {
            a_c
        } else {
            a_s
        };

        if a_t > a_l {
            f64::min(a_t + 0.66 * (a_u - a_t), a_t_next)
        } else {
            f64::max(a_t + 0.66 * (a_u - a_t), a_t_next)
        }
    }
    // Case 4: derivative magnitude increased; interpolate against the upper
    // endpoint instead.
    else {
        let z = 3.0 * (f_t - f_u) / (a_t - a_u) - g_t - g_u;
        let w = (z * z - g_t * g_u).sqrt();
        a_u + (a_t - a_u) * (w - g_u - z) / (g_t - g_u + 2.0 * w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn psi_is_zero_at_origin() {
        assert_relative_eq!(auxiliary_psi(0.0, 1.0, 1.0, -0.5, 1e-4), 0.0);
    }

    #[test]
    fn psi_formula() {
        let psi = auxiliary_psi(1.0, 0.5, 1.0, -0.5, 1e-4);
        assert_relative_eq!(psi, 0.5 - 1.0 - 1e-4 * (-0.5), epsilon = 1e-15);

        let dpsi = auxiliary_dpsi(-0.2, -0.5, 1e-4);
        assert_relative_eq!(dpsi, -0.2 + 1e-4 * 0.5, epsilon = 1e-15);
    }

    #[test]
    fn interval_case_u1_shrinks_upper() {
        let (mut a_l, mut f_l, mut g_l) = (0.0, 0.0, -1.0);
        let (mut a_u, mut f_u, mut g_u) = (1.0, 0.5, 1.0);

        // Trial value above f_l replaces the upper endpoint.
        let converged = update_interval_mt(
            &mut a_l, &mut f_l, &mut g_l, &mut a_u, &mut f_u, &mut g_u, 0.4, 0.3, 0.2,
        );

        assert!(!converged);
        assert_relative_eq!(a_u, 0.4);
        assert_relative_eq!(f_u, 0.3);
        assert_relative_eq!(g_u, 0.2);
        assert_relative_eq!(a_l, 0.0);
    }

    #[test]
    fn interval_case_u2_advances_lower() {
        let (mut a_l, mut f_l, mut g_l) = (0.0, 0.0, -1.0);
        let (mut a_u, mut f_u, mut g_u) = (1.0, 0.5, 1.0);

        // Lower f_t with g_t pointing back toward a_l moves the lower end.
        let converged = update_interval_mt(
            &mut a_l, &mut f_l, &mut g_l, &mut a_u, &mut f_u, &mut g_u, 0.4, -0.1, -0.2,
        );

        assert!(!converged);
        assert_relative_eq!(a_l, 0.4);
        assert_relative_eq!(f_l, -0.1);
        assert_relative_eq!(g_l, -0.2);
        assert_relative_eq!(a_u, 1.0);
    }

    #[test]
    fn interval_case_u3_swaps_endpoints() {
        let (mut a_l, mut f_l, mut g_l) = (0.0, 0.0, -1.0);
        let (mut a_u, mut f_u, mut g_u) = (1.0, 0.5, 1.0);

        // Lower f_t with g_t pointing past a_l: old lower end becomes upper.
        let converged = update_interval_mt(
            &mut a_l, &mut f_l, &mut g_l, &mut a_u, &mut f_u, &mut g_u, 0.4, -0.1, 0.2,
        );

        assert!(!converged);
        assert_relative_eq!(a_u, 0.0);
        assert_relative_eq!(f_u, 0.0);
        assert_relative_eq!(g_u, -1.0);
        assert_relative_eq!(a_l, 0.4);
        assert_relative_eq!(f_l, -0.1);
        assert_relative_eq!(g_l, 0.2);
    }

    #[test]
    fn interval_converges_on_zero_derivative() {
        let (mut a_l, mut f_l, mut g_l) = (0.0, 0.0, -1.0);
        let (mut a_u, mut f_u, mut g_u) = (1.0, 0.5, 1.0);

        let converged = update_interval_mt(
            &mut a_l, &mut f_l, &mut g_l, &mut a_u, &mut f_u, &mut g_u, 0.0, -0.1, 0.0,
        );

        assert!(converged);
    }

    #[test]
    fn trial_case1_matches_interpolants() {
        // f_t > f_l selects between the cubic and the averaged quadratic.
        let (a_l, f_l, g_l) = (0.0, 0.0, -1.0);
        let (a_u, f_u, g_u) = (0.0, 0.0, -1.0);
        let (a_t, f_t, g_t) = (1.0, 0.5, 0.8);

        let result = trial_value_selection_mt(a_l, f_l, g_l, a_u, f_u, g_u, a_t, f_t, g_t);

        let z = 3.0 * (f_t - f_l) / (a_t - a_l) - g_t - g_l;
        let w = (z * z - g_t * g_l).sqrt();
        let a_c = a_l + (a_t - a_l) * (w - g_l - z) / (g_t - g_l + 2.0 * w);
        let a_q = a_l - 0.5 * (a_l - a_t) * g_l / (g_l - (f_l - f_t) / (a_l - a_t));
        let expected = if (a_c - a_l).abs() < (a_q - a_l).abs() {
            a_c
        } else {
            0.5 * (a_q + a_c)
        };

        assert_relative_eq!(result, expected, epsilon = 1e-15);
        // The minimizer is bracketed between the endpoints.
        assert!(result > a_l && result < a_t);
    }

    #[test]
    fn trial_case2_prefers_farther_step() {
        // f_t <= f_l with sign change in the derivative.
        let (a_l, f_l, g_l) = (0.0, 0.0, -1.0);
        let (a_u, f_u, g_u) = (2.0, 1.0, 2.0);
        let (a_t, f_t, g_t) = (1.0, -0.2, 0.5);

        let result = trial_value_selection_mt(a_l, f_l, g_l, a_u, f_u, g_u, a_t, f_t, g_t);

        let a_s = a_l - (a_l - a_t) / (g_l - g_t) * g_l;
        let z = 3.0 * (f_t - f_l) / (a_t - a_l) - g_t - g_l;
        let w = (z * z - g_t * g_l).sqrt();
        let a_c = a_l + (a_t - a_l) * (w - g_l - z) / (g_t - g_l + 2.0 * w);
        let expected = if (a_c - a_t).abs() >= (a_s - a_t).abs() {
            a_c
        } else {
            a_s
        };

        assert_relative_eq!(result, expected, epsilon = 1e-15);
    }

    #[test]
    fn trial_case3_clamps_toward_upper() {
        // Same-sign derivatives, shrinking magnitude: the step is limited by
        // a_t + 0.66 * (a_u - a_t).
        let (a_l, f_l, g_l) = (0.0, 0.0, -1.0);
        let (a_u, f_u, g_u) = (2.0, -0.5, 1.0);
        let (a_t, f_t, g_t) = (1.0, -0.3, -0.4);

        let result = trial_value_selection_mt(a_l, f_l, g_l, a_u, f_u, g_u, a_t, f_t, g_t);

        assert!(result <= a_t + 0.66 * (a_u - a_t) + 1e-15);
    }
}
