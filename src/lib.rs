//! Block-structured adaptive mesh refinement for time-dependent hyperbolic
//! conservation laws, with message-passing parallelism.
//!
//! The mesh is a hierarchy of logically-rectangular patch levels, level 0
//! coarsest, each finer level nesting inside the one below. Three subsystems
//! carry the load:
//!
//! * the [`overlap_connector`] algorithms build neighbor graphs between
//!   distributed box sets, including the scalable "bridge" construction
//!   that joins two levels through a common center level;
//! * the [`refine_schedule`] plans and executes ghost fills from same-level
//!   neighbors, time-interpolated coarser levels, and user boundary
//!   routines;
//! * the [`hyperbolic`] integrator drives the per-level time advance: ghost
//!   fill, flux computation, conservative difference, flux synchronization
//!   across coarse-fine boundaries, and CFL timestep computation.
//!
//! Parallelism between processes goes through the [`message`] layer's
//! `Communicator` trait; per-patch kernels may additionally run on the
//! rayon pool within a process.

pub mod box_level;
pub mod box_tree;
pub mod coarsen_algorithm;
pub mod coarsen_schedule;
pub mod connector;
pub mod data_ops;
pub mod fill_pattern;
pub mod fluxsum;
pub mod geometry;
pub mod hierarchy;
pub mod hyperbolic;
pub mod index_space;
pub mod int_vector;
pub mod message;
pub mod overlap_connector;
pub mod patch;
pub mod patch_data;
pub mod patch_level;
pub mod refine_algorithm;
pub mod refine_schedule;
pub mod restart;
pub mod transaction;
pub mod transfer;
pub mod variable;
