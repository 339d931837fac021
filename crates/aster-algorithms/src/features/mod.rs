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

//! Simplified and Fast Point Feature Histograms.
//!
//! For a query point q with neighborhood N(q), the SPFH concatenates three
//! 3-bin histograms of the Darboux angles (α, φ, θ) accumulated over the
//! neighbors; the FPFH re-weights each neighbor's SPFH by its inverse
//! distance. Descriptor distance is the plain L2 norm between histograms.

use std::f64::consts::PI;

use crate::point_clouds::PointCloud;

/// Bins per Darboux angle.
pub const BINS_PER_ANGLE: usize = 3;
/// Total histogram length of a descriptor.
pub const HISTOGRAM_LENGTH: usize = 3 * BINS_PER_ANGLE;

/// A local rotation-invariant feature histogram.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Descriptor {
    histogram: [f64; HISTOGRAM_LENGTH],
}

impl Descriptor {
    /// Returns the raw histogram values.
    pub fn histogram(&self) -> &[f64; HISTOGRAM_LENGTH] {
        &self.histogram
    }

    /// L2 distance between two histograms.
    pub fn distance(&self, other: &Self) -> f64 {
        self.histogram
            .iter()
            .zip(other.histogram.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt()
    }

    fn accumulate_scaled(&mut self, other: &Self, scale: f64) {
        self.histogram
            .iter_mut()
            .zip(other.histogram.iter())
            .for_each(|(into, from)| *into += from * scale);
    }

    fn scale(&mut self, scale: f64) {
        self.histogram.iter_mut().for_each(|value| *value *= scale);
    }
}

#[inline]
fn bin_for(value: f64, min: f64, max: f64) -> usize {
    let normalized = ((value - min) / (max - min)).clamp(0.0, 1.0);
    ((normalized * BINS_PER_ANGLE as f64) as usize).min(BINS_PER_ANGLE - 1)
}

/// Computes the SPFH of the query point over the given neighborhood.
///
/// # Arguments
/// * `cloud`: The cloud holding both the query and its neighbors.
/// * `query`: Index of the query point.
/// * `neighbors`: Indices of the neighborhood (the query itself is skipped).
///
/// # Returns
/// The concatenated (α, φ, θ) histogram, normalized by the neighbor count.
pub fn spfh(cloud: &PointCloud, query: usize, neighbors: &[usize]) -> Descriptor {
    let query_point = &cloud[query];
    let u = query_point.normal;

    let mut descriptor = Descriptor::default();
    let mut counted = 0usize;

    for neighbor in neighbors.iter().filter(|neighbor| **neighbor != query) {
        let neighbor_point = &cloud[*neighbor];
        let offset = neighbor_point.position - query_point.position;
        let distance = offset.norm();
        if distance == 0.0 {
            continue;
        }

        let cross = offset.cross(&u);
        let cross_norm = cross.norm();
        if cross_norm == 0.0 {
            continue;
        }
        let v = cross / cross_norm;
        let w = u.cross(&v);

        let alpha = v.dot(&neighbor_point.normal);
        let phi = u.dot(&(offset / distance));
        let theta = w
            .dot(&neighbor_point.normal)
            .atan2(u.dot(&neighbor_point.normal));

        descriptor.histogram[bin_for(alpha, -1.0, 1.0)] += 1.0;
        descriptor.histogram[BINS_PER_ANGLE + bin_for(phi, -1.0, 1.0)] += 1.0;
        descriptor.histogram[2 * BINS_PER_ANGLE + bin_for(theta, -PI, PI)] += 1.0;
        counted += 1;
    }

    if counted > 0 {
        descriptor.scale(1.0 / counted as f64);
    }

    descriptor
}

/// Computes FPFH descriptors for every point of the cloud, using the
/// k-nearest neighborhood, and stores them on the points together with the
/// cloud's mean histogram.
///
/// FPFH(q) = SPFH(q) + (1/|N|) Σ_i SPFH(p_i) / ‖q − p_i‖.
///
/// # Arguments
/// * `cloud`: The cloud to annotate; its KD-tree is rebuilt if stale.
/// * `neighborhood_size`: Number of neighbors per point (k).
#[cfg_attr(
    feature = "tracing",
    tracing::instrument("Compute FPFH Descriptors", skip_all, level = "info")
)]
pub fn compute_fpfh(cloud: &mut PointCloud, neighborhood_size: usize) {
    if !cloud.has_fresh_tree() {
        cloud.build_kdtree();
    }

    let neighborhoods = (0..cloud.size())
        .map(|idx| {
            cloud
                .k_nearest(&cloud[idx].position, neighborhood_size + 1)
                .into_iter()
                .map(|(_, neighbor)| neighbor)
                .filter(|neighbor| *neighbor != idx)
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();

    let spfhs = (0..cloud.size())
        .map(|idx| spfh(cloud, idx, &neighborhoods[idx]))
        .collect::<Vec<_>>();

    let mut mean = Descriptor::default();
    for idx in 0..cloud.size() {
        let mut fpfh = spfhs[idx].clone();
        let neighbors = &neighborhoods[idx];
        if !neighbors.is_empty() {
            let weight = 1.0 / neighbors.len() as f64;
            for neighbor in neighbors {
                let distance = (cloud[*neighbor].position - cloud[idx].position).norm();
                if distance > 0.0 {
                    fpfh.accumulate_scaled(&spfhs[*neighbor], weight / distance);
                }
            }
        }

        mean.accumulate_scaled(&fpfh, 1.0);
        if let Some(point) = cloud.get_mut(idx) {
            point.descriptor = Some(fpfh);
            point.valid_feature = true;
        }
    }

    if cloud.size() > 0 {
        mean.scale(1.0 / cloud.size() as f64);
    }
    cloud.set_mean_descriptor(mean);
}

/// Marks as invalid every feature whose distance to the cloud's descriptor
/// centroid falls below `beta` times the mean of those distances.
///
/// Points too close to the centroid carry no discriminating power and would
/// otherwise generate spurious correspondence hints.
///
/// # Returns
/// The number of features disabled.
pub fn disable_common_features(cloud: &mut PointCloud, beta: f64) -> usize {
    let Some(mean) = cloud.mean_descriptor().cloned() else {
        return 0;
    };

    let distances = cloud
        .iter()
        .map(|point| {
            point
                .descriptor
                .as_ref()
                .map(|descriptor| descriptor.distance(&mean))
                .unwrap_or(0.0)
        })
        .collect::<Vec<_>>();

    if distances.is_empty() {
        return 0;
    }
    let threshold = beta * distances.iter().sum::<f64>() / distances.len() as f64;

    let mut disabled = 0usize;
    for (point, distance) in cloud.iter_mut().zip(distances) {
        if distance < threshold {
            point.valid_feature = false;
            disabled += 1;
        }
    }

    log::debug!("Disabled {disabled} common features below threshold {threshold}");
    disabled
}
