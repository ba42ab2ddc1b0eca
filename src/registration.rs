//! Registration facade: one call per test case.
//!
//! `NdtMatcher::register` builds the voxel grid over the target map, runs
//! the optimization from the initial guess, and returns the result record
//! the benchmark comparator consumes. No state survives between test cases.

use nalgebra::{Matrix4, Matrix6, Vector6};

use crate::cloud::{self, PointCloud};
use crate::derivatives::{self, GaussianFit, ScanDerivatives};
use crate::optimization::RegistrationRun;
use crate::voxel_grid::VoxelGrid;

/// Fixed registration hyperparameters.
///
/// These are benchmark constants, set at construction and never read from
/// the input stream.
#[derive(Debug, Clone)]
pub struct NdtParams {
    /// Probability mass assigned to the outlier distribution.
    pub outlier_ratio: f64,
    /// Voxel side length, also the radius-search radius.
    pub resolution: f32,
    /// Upper bound on the line-search step length.
    pub step_size: f64,
    /// Convergence threshold on the accepted step length; also the grid
    /// bound expansion and, halved, the line-search lower bound.
    pub transformation_epsilon: f64,
    /// Outer iteration cap.
    pub max_iterations: i32,
}

impl Default for NdtParams {
    fn default() -> Self {
        Self {
            outlier_ratio: 0.55,
            resolution: 1.0,
            step_size: 0.1,
            transformation_epsilon: 0.1,
            max_iterations: 30,
        }
    }
}

/// Output of one registration.
#[derive(Debug, Clone)]
pub struct CallbackResult {
    pub final_transformation: Matrix4<f32>,
    pub converged: bool,
    /// Mean negative log-likelihood per source point.
    pub fitness_score: f64,
    /// Every pose evaluated during the run, line-search trials included, in
    /// visitation order.
    pub intermediate_transformations: Vec<Matrix4<f32>>,
}

/// Computation substrate for the three bulk phases of a registration.
///
/// One implementation may parallelize internally however it likes, as long
/// as results are deterministic for a given input.
pub trait NdtBackend {
    /// Build the Gaussian voxel grid over the target cloud.
    fn build_grid(&self, target: &PointCloud, params: &NdtParams) -> VoxelGrid;

    /// Transform a cloud by an affine rigid transform.
    fn transform_cloud(&self, input: &PointCloud, transform: &Matrix4<f32>) -> PointCloud;

    /// Score, gradient, and optionally Hessian of the objective at pose `p`.
    fn compute_derivatives(
        &self,
        source: &PointCloud,
        trans_cloud: &PointCloud,
        grid: &VoxelGrid,
        p: &Vector6<f64>,
        gauss: &GaussianFit,
        compute_hessian: bool,
    ) -> ScanDerivatives;

    /// Hessian-only evaluation at pose `p`.
    fn compute_hessian(
        &self,
        source: &PointCloud,
        trans_cloud: &PointCloud,
        grid: &VoxelGrid,
        p: &Vector6<f64>,
        gauss: &GaussianFit,
    ) -> Matrix6<f64>;
}

/// Default backend: sequential derivative accumulation, data-parallel grid
/// finalization and cloud transformation.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuBackend;

impl NdtBackend for CpuBackend {
    fn build_grid(&self, target: &PointCloud, params: &NdtParams) -> VoxelGrid {
        VoxelGrid::build(target, params.resolution, params.transformation_epsilon)
    }

    fn transform_cloud(&self, input: &PointCloud, transform: &Matrix4<f32>) -> PointCloud {
        cloud::transform_cloud(input, transform)
    }

    fn compute_derivatives(
        &self,
        source: &PointCloud,
        trans_cloud: &PointCloud,
        grid: &VoxelGrid,
        p: &Vector6<f64>,
        gauss: &GaussianFit,
        compute_hessian: bool,
    ) -> ScanDerivatives {
        derivatives::compute_derivatives(source, trans_cloud, grid, p, gauss, compute_hessian)
    }

    fn compute_hessian(
        &self,
        source: &PointCloud,
        trans_cloud: &PointCloud,
        grid: &VoxelGrid,
        p: &Vector6<f64>,
        gauss: &GaussianFit,
    ) -> Matrix6<f64> {
        derivatives::compute_hessian(source, trans_cloud, grid, p, gauss)
    }
}

/// Scan-to-map registration facade.
#[derive(Debug, Clone, Default)]
pub struct NdtMatcher<B: NdtBackend = CpuBackend> {
    backend: B,
    params: NdtParams,
}

impl NdtMatcher<CpuBackend> {
    pub fn new() -> Self {
        Self {
            backend: CpuBackend,
            params: NdtParams::default(),
        }
    }
}

impl<B: NdtBackend> NdtMatcher<B> {
    /// Build a matcher over a custom backend.
    pub fn with_backend(backend: B) -> Self {
        Self {
            backend,
            params: NdtParams::default(),
        }
    }

    pub fn params(&self) -> &NdtParams {
        &self.params
    }

    /// Align `source` onto `target` starting from `init_guess`.
    pub fn register(
        &self,
        source: &PointCloud,
        target: &PointCloud,
        init_guess: &Matrix4<f32>,
    ) -> CallbackResult {
        let grid = self.backend.build_grid(target, &self.params);
        RegistrationRun::new(&self.backend, &self.params, &grid, source).align(init_guess)
    }
}
