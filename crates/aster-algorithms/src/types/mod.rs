// SPDX-License-Identifier: MIT
/*
 * Copyright (c) [2023 - Present] Emily Matheys <emilymatt96@gmail.com>
 *
 * Permission is hereby granted, free of charge, to any person obtaining a copy
 * of this software and associated documentation files (the "Software"), to deal
 * in the Software without restriction, including without limitation the rights
 * to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
 * copies of the Software, and to permit persons to whom the Software is
 * furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in all
 * copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
 * AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
 * OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
 * SOFTWARE.
 */

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use nalgebra::{Matrix3, Vector3};

#[doc = "Modified Rodrigues Parameter attitude kinematics."]
pub mod mrp;

mod is_nan;
pub use is_nan::IsNan;

/// A rigid transform between two point-cloud frames.
///
/// Semantics: a point expressed in the *source* cloud frame is mapped into the
/// *destination* cloud frame via `p_dest = rotation * p_src + translation`.
/// After bundle adjustment all stored transforms are absolute with respect to
/// the cloud at index 0.
#[derive(Clone, Debug, PartialEq)]
pub struct RigidTransform {
    /// Acquisition time of the source cloud.
    pub t_start: f64,
    /// Acquisition time of the destination cloud.
    pub t_end: f64,
    /// Index of the source cloud in the registered sequence.
    pub index_start: usize,
    /// Index of the destination cloud in the registered sequence.
    pub index_end: usize,
    /// Rotation component, an orthonormal direction cosine matrix.
    pub rotation: Matrix3<f64>,
    /// Translation component.
    pub translation: Vector3<f64>,
}

impl RigidTransform {
    /// Returns the identity transform anchoring a cloud to itself.
    ///
    /// # Arguments
    /// * `time`: Acquisition time used for both endpoints.
    /// * `index`: Cloud index used for both endpoints.
    pub fn identity(time: f64, index: usize) -> Self {
        Self {
            t_start: time,
            t_end: time,
            index_start: index,
            index_end: index,
            rotation: Matrix3::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Applies this transform to a point expressed in the source frame.
    #[inline]
    pub fn apply(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * point + self.translation
    }

    /// Returns the inverse transform, mapping destination-frame points back
    /// into the source frame.
    pub fn inverse(&self) -> Self {
        Self {
            t_start: self.t_end,
            t_end: self.t_start,
            index_start: self.index_end,
            index_end: self.index_start,
            rotation: self.rotation.transpose(),
            translation: -(self.rotation.transpose() * self.translation),
        }
    }

    /// Composes `self` after `earlier`, producing the transform from
    /// `earlier`'s source frame into `self`'s destination frame.
    pub fn compose(&self, earlier: &Self) -> Self {
        Self {
            t_start: earlier.t_start,
            t_end: self.t_end,
            index_start: earlier.index_start,
            index_end: self.index_end,
            rotation: self.rotation * earlier.rotation,
            translation: self.rotation * earlier.translation + self.translation,
        }
    }
}

/// A cooperative cancellation handle.
///
/// Long-running operations check the token between iterations and between
/// pairs inside an iteration; on cancellation they return their last
/// consistent state together with a `Cancelled` error where applicable.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Returns a fresh, non-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation; all clones of this token observe the request.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Returns whether cancellation was requested.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rigid_transform_roundtrip() {
        let rotation = mrp::mrp_to_dcm(&Vector3::new(0.1, -0.2, 0.05));
        let transform = RigidTransform {
            t_start: 0.0,
            t_end: 1.0,
            index_start: 0,
            index_end: 1,
            rotation,
            translation: Vector3::new(1.0, -2.0, 0.5),
        };

        let p = Vector3::new(0.3, 0.7, -1.1);
        let roundtrip = transform.inverse().apply(&transform.apply(&p));
        assert!((roundtrip - p).norm() < 1e-12);
    }

    #[test]
    fn test_rigid_transform_compose() {
        let a = RigidTransform {
            t_start: 0.0,
            t_end: 1.0,
            index_start: 0,
            index_end: 1,
            rotation: mrp::mrp_to_dcm(&Vector3::new(0.0, 0.0, 0.1)),
            translation: Vector3::new(1.0, 0.0, 0.0),
        };
        let b = RigidTransform {
            t_start: 1.0,
            t_end: 2.0,
            index_start: 1,
            index_end: 2,
            rotation: mrp::mrp_to_dcm(&Vector3::new(0.05, 0.0, 0.0)),
            translation: Vector3::new(0.0, 1.0, 0.0),
        };

        let composed = b.compose(&a);
        let p = Vector3::new(0.2, -0.4, 0.9);
        let direct = b.apply(&a.apply(&p));
        assert!((composed.apply(&p) - direct).norm() < 1e-12);
        assert_eq!(composed.index_start, 0);
        assert_eq!(composed.index_end, 2);
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
