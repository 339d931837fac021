#![deny(missing_docs)]

//! Shape-reconstruction suites driving the aster-algorithms crate over a
//! run of range-imaging flashes.

/// The shape builder pipeline: flash intake, registration, bundle
/// adjustment, attitude and orbit estimation, Bezier lifting.
pub mod shape_builder;
