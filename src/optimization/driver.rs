//! Outer optimization loop for one registration.
//!
//! Per test case: seed the pose vector from the initial guess, then iterate
//! {evaluate derivatives, solve the 6x6 Newton system, pick a step length,
//! update the pose} until the step falls under the transformation epsilon
//! or the iteration cap is hit. Every pose evaluated along the way, line
//! search trials included, is recorded in visitation order.
//!
//! Several control-flow details here are deliberate reference-kernel
//! reproductions rather than textbook Newton iteration; they are required
//! for parity with the recorded output stream and are called out inline.

use nalgebra::{Matrix4, Matrix6, Vector6};
use tracing::{debug, trace};

use super::line_search::{
    auxiliary_dpsi, auxiliary_psi, trial_value_selection_mt, update_interval_mt,
};
use crate::cloud::{Point, PointCloud};
use crate::derivatives::GaussianFit;
use crate::math::{build_transformation_matrix, euler_angles};
use crate::registration::{CallbackResult, NdtBackend, NdtParams};
use crate::voxel_grid::VoxelGrid;

/// Sufficient-decrease constant of the Wolfe conditions (eq. 1.1).
const MU: f64 = 1.0e-4;
/// Curvature constant of the Wolfe conditions (eq. 1.2).
const NU: f64 = 0.9;
/// Cap on line-search refinement iterations.
const MAX_STEP_ITERATIONS: i32 = 10;

/// State for a single `register` call. Owns the pose bookkeeping; borrows
/// the grid (read-only after build) and the source cloud.
pub struct RegistrationRun<'a, B: NdtBackend> {
    backend: &'a B,
    params: &'a NdtParams,
    grid: &'a VoxelGrid,
    input: &'a PointCloud,
    gauss: GaussianFit,

    final_transformation: Matrix4<f32>,
    transformation: Matrix4<f32>,
    /// Pose of the previous outer iteration. Tracked but not consumed.
    #[allow(dead_code)]
    previous_transformation: Matrix4<f32>,
    intermediate_transformations: Vec<Matrix4<f32>>,
    converged: bool,
    nr_iterations: i32,
    trans_probability: f64,
}

impl<'a, B: NdtBackend> RegistrationRun<'a, B> {
    pub fn new(
        backend: &'a B,
        params: &'a NdtParams,
        grid: &'a VoxelGrid,
        input: &'a PointCloud,
    ) -> Self {
        Self {
            backend,
            params,
            grid,
            input,
            gauss: GaussianFit::new(params.outlier_ratio, params.resolution as f64),
            final_transformation: Matrix4::identity(),
            transformation: Matrix4::identity(),
            previous_transformation: Matrix4::identity(),
            intermediate_transformations: Vec::new(),
            converged: false,
            nr_iterations: 0,
            trans_probability: 0.0,
        }
    }

    /// Run the registration from `guess` and consume the state into a
    /// result record.
    pub fn align(mut self, guess: &Matrix4<f32>) -> CallbackResult {
        // Working buffer with the homogeneous coordinate forced to 1 to aid
        // the rigid transform; rebuilt from the raw source on every trial.
        let mut output: PointCloud = self
            .input
            .iter()
            .map(|p| Point::new(p.x, p.y, p.z, 1.0))
            .collect();

        self.converged = false;
        self.final_transformation = Matrix4::identity();
        self.transformation = Matrix4::identity();
        self.previous_transformation = Matrix4::identity();

        self.compute_transformation(&mut output, guess);

        debug!(
            iterations = self.nr_iterations,
            converged = self.converged,
            fitness = self.trans_probability,
            "registration finished"
        );

        CallbackResult {
            final_transformation: self.final_transformation,
            converged: self.converged,
            fitness_score: self.trans_probability,
            intermediate_transformations: self.intermediate_transformations,
        }
    }

    fn fitness(&self, score: f64) -> f64 {
        // Mean negative log-likelihood per source point; zero for an empty
        // scan instead of 0/0.
        if self.input.is_empty() {
            0.0
        } else {
            score / self.input.len() as f64
        }
    }

    fn compute_transformation(&mut self, output: &mut PointCloud, guess: &Matrix4<f32>) {
        self.nr_iterations = 0;
        self.converged = false;

        // Start from the guess and match neighbors in the guessed frame.
        self.final_transformation = *guess;
        *output = self.backend.transform_cloud(output, guess);

        // Convert the guess matrix to the 6-element optimization vector.
        let mut p = Vector6::zeros();
        let (tx, ty, tz) = seed_translation(&self.final_transformation);
        p[0] = tx;
        p[1] = ty;
        p[2] = tz;
        let ea = euler_angles(&self.final_transformation);
        p[3] = ea[0];
        p[4] = ea[1];
        p[5] = ea[2];

        // Derivatives of the seed pose; later evaluations happen inside the
        // step-length selection.
        let initial = self
            .backend
            .compute_derivatives(self.input, output, self.grid, &p, &self.gauss, true);
        let mut score = initial.score;
        let mut score_gradient = initial.gradient;
        let mut hessian = initial.hessian;

        while !self.converged {
            self.previous_transformation = self.transformation;

            // Negated for maximization as opposed to minimization.
            let neg_grad = -score_gradient;
            let mut delta_p = crate::math::solve(hessian, neg_grad);

            let newton_step_norm = (delta_p[0] * delta_p[0]
                + delta_p[1] * delta_p[1]
                + delta_p[2] * delta_p[2]
                + delta_p[3] * delta_p[3]
                + delta_p[4] * delta_p[4]
                + delta_p[5] * delta_p[5])
                .sqrt();
            trace!(newton_step_norm, "solved Newton system");
            // The reference kernel overwrites the computed norm with one, so
            // the solve direction enters the line search unnormalized and
            // the step bounds alone limit its size. Required for parity.
            let mut delta_p_norm = 1.0_f64;
            if delta_p_norm == 0.0 || delta_p_norm.is_nan() {
                self.trans_probability = self.fitness(score);
                self.converged = !delta_p_norm.is_nan();
                return;
            }

            delta_p /= delta_p_norm;

            delta_p_norm = self.compute_step_length_mt(
                &p,
                &mut delta_p,
                delta_p_norm,
                self.params.step_size,
                self.params.transformation_epsilon / 2.0,
                &mut score,
                &mut score_gradient,
                &mut hessian,
                output,
            );
            delta_p *= delta_p_norm;

            self.transformation = build_transformation_matrix(&delta_p);
            self.intermediate_transformations.push(self.transformation);

            p += delta_p;

            if self.nr_iterations > self.params.max_iterations
                || (self.nr_iterations != 0
                    && delta_p_norm.abs() < self.params.transformation_epsilon)
            {
                self.converged = true;
            }
            self.nr_iterations += 1;
        }

        self.trans_probability = self.fitness(score);
    }

    /// Safeguarded step-length selection along `step_dir`.
    ///
    /// Evaluates the objective at the clamped initial step, then refines the
    /// trial with the More-Thuente interval machinery until the interval
    /// converges, the iteration cap is hit, or sufficient decrease plus the
    /// curvature condition hold. Each trial rebuilds the transformed cloud
    /// and the derivatives, and records its pose. A non-ascent direction is
    /// reversed; a flat one returns a zero step outright.
    #[allow(clippy::too_many_arguments)]
    fn compute_step_length_mt(
        &mut self,
        x: &Vector6<f64>,
        step_dir: &mut Vector6<f64>,
        step_init: f64,
        step_max: f64,
        step_min: f64,
        score: &mut f64,
        score_gradient: &mut Vector6<f64>,
        hessian: &mut Matrix6<f64>,
        trans_cloud: &mut PointCloud,
    ) -> f64 {
        // phi(0) and phi'(0) (eq. 1.3); the objective is the negated score.
        let phi_0 = -*score;
        let mut d_phi_0 = -score_gradient.dot(step_dir);

        if d_phi_0 >= 0.0 {
            if d_phi_0 == 0.0 {
                return 0.0;
            }
            // Treat the current direction as ascent and search the reverse.
            d_phi_0 *= -1.0;
            *step_dir = -*step_dir;
        }

        let mut step_iterations = 0;

        let mut a_l = 0.0;
        let mut a_u = 0.0;

        // Endpoint values of the auxiliary function while the interval is
        // open (eq. 2.1).
        let mut f_l = auxiliary_psi(a_l, phi_0, phi_0, d_phi_0, MU);
        let mut g_l = auxiliary_dpsi(d_phi_0, d_phi_0, MU);
        let mut f_u = auxiliary_psi(a_u, phi_0, phi_0, d_phi_0, MU);
        let mut g_u = auxiliary_dpsi(d_phi_0, d_phi_0, MU);

        // Seeded from the step bounds so that step_min == step_max skips the
        // refinement; with the benchmark's bounds the flag starts true and
        // the clamped initial step is accepted as-is. Kept verbatim for
        // parity with the reference kernel.
        let mut interval_converged = (step_max - step_min) > 0.0;
        let mut open_interval = true;

        let mut a_t = step_init;
        a_t = if a_t > step_max { step_max } else { a_t };
        a_t = if a_t < step_min { step_min } else { a_t };

        let mut x_t = x + *step_dir * a_t;

        self.final_transformation = build_transformation_matrix(&x_t);
        self.intermediate_transformations
            .push(self.final_transformation);

        *trans_cloud = self
            .backend
            .transform_cloud(self.input, &self.final_transformation);

        // The Hessian at the initial trial is kept: most searches accept
        // this step, and the next outer iteration needs it.
        let trial = self
            .backend
            .compute_derivatives(self.input, trans_cloud, self.grid, &x_t, &self.gauss, true);
        *score = trial.score;
        *score_gradient = trial.gradient;
        *hessian = trial.hessian;

        let mut phi_t = -*score;
        let mut d_phi_t = -score_gradient.dot(step_dir);
        let mut psi_t = auxiliary_psi(a_t, phi_t, phi_0, d_phi_0, MU);
        let mut d_psi_t = auxiliary_dpsi(d_phi_t, d_phi_0, MU);

        while !interval_converged
            && step_iterations < MAX_STEP_ITERATIONS
            && !(psi_t <= 0.0 && d_phi_t <= -NU * d_phi_0)
        {
            a_t = if open_interval {
                trial_value_selection_mt(a_l, f_l, g_l, a_u, f_u, g_u, a_t, psi_t, d_psi_t)
            } else {
                trial_value_selection_mt(a_l, f_l, g_l, a_u, f_u, g_u, a_t, phi_t, d_phi_t)
            };
            a_t = if a_t > step_max { step_max } else { a_t };
            a_t = if a_t < step_min { step_min } else { a_t };

            x_t = x + *step_dir * a_t;

            self.final_transformation = build_transformation_matrix(&x_t);
            self.intermediate_transformations
                .push(self.final_transformation);

            *trans_cloud = self
                .backend
                .transform_cloud(self.input, &self.final_transformation);

            // Gradient only; the Hessian is refreshed after the loop.
            let trial = self.backend.compute_derivatives(
                self.input,
                trans_cloud,
                self.grid,
                &x_t,
                &self.gauss,
                false,
            );
            *score = trial.score;
            *score_gradient = trial.gradient;
            *hessian = trial.hessian;

            phi_t = -*score;
            d_phi_t = -score_gradient.dot(step_dir);
            psi_t = auxiliary_psi(a_t, phi_t, phi_0, d_phi_0, MU);
            d_psi_t = auxiliary_dpsi(d_phi_t, d_phi_0, MU);

            // Once the auxiliary conditions hold the interval closes and the
            // endpoints convert from psi to phi values.
            if open_interval && psi_t <= 0.0 && d_psi_t >= 0.0 {
                open_interval = false;

                f_l = f_l + phi_0 - MU * d_phi_0 * a_l;
                g_l += MU * d_phi_0;
                f_u = f_u + phi_0 - MU * d_phi_0 * a_u;
                g_u += MU * d_phi_0;
            }

            interval_converged = if open_interval {
                update_interval_mt(
                    &mut a_l, &mut f_l, &mut g_l, &mut a_u, &mut f_u, &mut g_u, a_t, psi_t, d_psi_t,
                )
            } else {
                update_interval_mt(
                    &mut a_l, &mut f_l, &mut g_l, &mut a_u, &mut f_u, &mut g_u, a_t, phi_t, d_phi_t,
                )
            };

            step_iterations += 1;
        }

        // Any refinement invalidated the kept Hessian; the gradient is
        // already fresh, so only the Hessian is recomputed at the accepted
        // step for the next outer iteration.
        if step_iterations > 0 {
            *hessian =
                self.backend
                    .compute_hessian(self.input, trans_cloud, self.grid, &x_t, &self.gauss);
        }

        a_t
    }
}

/// Translation seed for the optimization vector.
///
/// The reference kernel reads the guess matrix at `[i][4]`, which in its
/// row-major layout aliases the first column of rows 1-3; the recorded
/// reference outputs depend on that read, so it is the default here.
#[cfg(not(feature = "corrected-guess-seed"))]
fn seed_translation(m: &Matrix4<f32>) -> (f64, f64, f64) {
    (m[(1, 0)] as f64, m[(2, 0)] as f64, m[(3, 0)] as f64)
}

/// Translation seed taken from the guess matrix's translation column.
#[cfg(feature = "corrected-guess-seed")]
fn seed_translation(m: &Matrix4<f32>) -> (f64, f64, f64) {
    (m[(0, 3)] as f64, m[(1, 3)] as f64, m[(2, 3)] as f64)
}
