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

use nalgebra::Vector3;

/// This trait is used to check if a value holds any NaN component.
/// A focal-plane hit is considered valid iff any of its coordinates is
/// non-NaN; the complementary test here flags fully usable values.
pub trait IsNan: Copy {
    /// Returns true if any component of self is NaN.
    fn is_nan(self) -> bool;
}

impl IsNan for f64 {
    #[inline]
    fn is_nan(self) -> bool {
        self.is_nan()
    }
}

impl IsNan for f32 {
    #[inline]
    fn is_nan(self) -> bool {
        self.is_nan()
    }
}

impl IsNan for Vector3<f64> {
    #[inline]
    fn is_nan(self) -> bool {
        self.iter().any(|component| component.is_nan())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_nan_scalar() {
        assert!(!<f64 as IsNan>::is_nan(0.0));
        assert!(!<f64 as IsNan>::is_nan(f64::INFINITY));
        assert!(<f64 as IsNan>::is_nan(f64::NAN));

        assert!(!<f32 as IsNan>::is_nan(1.0));
        assert!(<f32 as IsNan>::is_nan(f32::NAN));
    }

    #[test]
    fn test_is_nan_vector() {
        assert!(!Vector3::new(0.0, 1.0, -2.0).is_nan());
        assert!(Vector3::new(0.0, f64::NAN, -2.0).is_nan());
    }
}
