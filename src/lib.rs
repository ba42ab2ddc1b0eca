//! Normal Distributions Transform scan-to-map registration.
//!
//! This crate implements the registration kernel of a LiDAR benchmark: each
//! test case pairs a filtered scan, an accumulated map, and an initial pose
//! guess, and the matcher computes the rigid transform aligning the scan
//! onto the map via NDT with More-Thuente step-length selection
//! (Magnusson 2009; More & Thuente 1994). Results are meant to be compared
//! record-for-record against a reference output stream, so the numerics
//! follow the benchmark's reference kernel closely, including several of
//! its documented idiosyncrasies.
//!
//! # Pipeline
//!
//! 1. Build a Gaussian voxel grid over the target map.
//! 2. Seed the pose vector from the initial guess.
//! 3. Iterate: evaluate score/gradient/Hessian through a radius search over
//!    the transformed scan, solve the 6x6 Newton system, select a step
//!    length, update the pose.
//! 4. Emit the final transformation, the convergence flag, the fitness
//!    score, and every intermediate pose visited.
//!
//! # Usage
//!
//! ```ignore
//! use ndt_bench::{NdtMatcher, Point};
//! use nalgebra::Matrix4;
//!
//! let matcher = NdtMatcher::new();
//! let result = matcher.register(&scan, &map, &Matrix4::identity());
//! println!("converged: {}, fitness: {}", result.converged, result.fitness_score);
//! ```

pub mod cloud;
pub mod derivatives;
pub mod io;
pub mod math;
pub mod optimization;
pub mod registration;
pub mod voxel_grid;

#[cfg(test)]
pub(crate) mod test_utils;

pub use cloud::{Point, PointCloud};
pub use derivatives::{GaussianFit, ScanDerivatives};
pub use io::{ResultRecord, StreamError, TestCase, TestCaseReader, MAX_EPS};
pub use registration::{CallbackResult, CpuBackend, NdtBackend, NdtMatcher, NdtParams};
pub use voxel_grid::{VoxelCell, VoxelGrid};
