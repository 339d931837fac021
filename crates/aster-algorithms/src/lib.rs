#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]

//! Estimation and geometry algorithms for small-body shape reconstruction:
//! point-cloud registration, pose-graph bundle adjustment, batch attitude
//! and initial-orbit determination, and Bezier shape statistics, for use
//! either independently or through the aster-suites crate.

#[doc = "Batch attitude estimation from rigid transforms, with rigid-body dynamics and an adaptive integrator."]
pub mod attitude;

#[doc = "Bezier triangular patches, the smooth shape model and its uncertainty propagation."]
pub mod bezier;

#[doc = "Multi-cloud pose refinement with sparse normal equations and loop-closure discovery."]
pub mod bundle_adjustment;

#[doc = "SPFH/FPFH local feature histograms used as correspondence hints."]
pub mod features;

#[doc = "Geometry primitives: bounding boxes, rays and facet intersection."]
pub mod geometry;

#[doc = "An Iterative Closest Point algorithm over oriented point clouds."]
pub mod icp;

#[doc = "Initial orbit determination by particle-swarm search over Keplerian elements."]
pub mod iod;

#[doc = "Spatial indices: a point KD-Tree and an element KD-Tree for ray traversal."]
pub mod kd_tree;

#[doc = "Oriented point clouds and their file formats."]
pub mod point_clouds;

#[doc = "The triangular shape model and its mass properties."]
pub mod shape;

#[doc = "A module containing common and interfacing structs and types."]
pub mod types;

#[cfg(test)]
pub(crate) mod testing;
