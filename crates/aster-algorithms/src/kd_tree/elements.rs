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

use std::collections::HashSet;

use nalgebra::Vector3;

use crate::geometry::{Aabb, Ray};

/// Default maximum subdivision depth.
pub const DEFAULT_MAX_DEPTH: usize = 1000;

struct ElementNode {
    aabb: Aabb,
    depth: usize,
    elements: Vec<usize>,
    left: Option<Box<ElementNode>>,
    right: Option<Box<ElementNode>>,
}

/// A KD-Tree over surface elements (facets or patches), used to accelerate
/// ray casting.
///
/// Elements are referenced by their index in the owning shape model; an
/// element may be assigned to both children when it straddles the split
/// plane. Subdivision stops when at least 50% of the elements are shared
/// across the two children, when only one element remains, or at
/// `max_depth`.
pub struct KdTreeElements {
    root: Option<Box<ElementNode>>,
    max_depth: usize,
}

impl KdTreeElements {
    /// Builds the tree over `element_count` elements.
    ///
    /// # Arguments
    /// * `element_count`: Number of elements indexed by the tree.
    /// * `vertices_of`: Returns the defining vertices of an element; used for
    ///   both the precise bounding boxes and the side assignment.
    /// * `center_of`: Returns the representative center of an element; the
    ///   split value on the chosen axis is the mean of these centers.
    pub fn build<V, C>(element_count: usize, vertices_of: V, center_of: C) -> Self
    where
        V: Fn(usize) -> Vec<Vector3<f64>>,
        C: Fn(usize) -> Vector3<f64>,
    {
        Self::build_with_depth(element_count, vertices_of, center_of, DEFAULT_MAX_DEPTH)
    }

    /// Same as [`KdTreeElements::build`] with an explicit depth cap.
    pub fn build_with_depth<V, C>(
        element_count: usize,
        vertices_of: V,
        center_of: C,
        max_depth: usize,
    ) -> Self
    where
        V: Fn(usize) -> Vec<Vector3<f64>>,
        C: Fn(usize) -> Vector3<f64>,
    {
        let all_elements = (0..element_count).collect::<Vec<_>>();
        let root = (element_count > 0)
            .then(|| Self::build_recursive(all_elements, &vertices_of, &center_of, 0, max_depth));

        Self { root, max_depth }
    }

    fn build_recursive<V, C>(
        elements: Vec<usize>,
        vertices_of: &V,
        center_of: &C,
        depth: usize,
        max_depth: usize,
    ) -> Box<ElementNode>
    where
        V: Fn(usize) -> Vec<Vector3<f64>>,
        C: Fn(usize) -> Vector3<f64>,
    {
        let mut aabb = Aabb::empty();
        for element in &elements {
            for vertex in vertices_of(*element) {
                aabb.grow(&vertex);
            }
        }

        if elements.len() == 1 {
            return Box::new(ElementNode {
                aabb,
                depth,
                elements,
                left: None,
                right: None,
            });
        }

        let split_point = elements
            .iter()
            .fold(Vector3::zeros(), |acc, element| acc + center_of(*element))
            / elements.len() as f64;
        let axis = aabb.longest_axis();
        let split_value = split_point[axis];

        // Vertex-side assignment; an element straddling the plane lands in
        // both children
        let mut left_elements = Vec::new();
        let mut right_elements = Vec::new();
        for element in &elements {
            let mut added_left = false;
            let mut added_right = false;
            for vertex in vertices_of(*element) {
                if split_value >= vertex[axis] && !added_left {
                    left_elements.push(*element);
                    added_left = true;
                } else if split_value <= vertex[axis] && !added_right {
                    right_elements.push(*element);
                    added_right = true;
                }
            }
        }

        if left_elements.is_empty() {
            left_elements.clone_from(&right_elements);
        }
        if right_elements.is_empty() {
            right_elements.clone_from(&left_elements);
        }

        let left_set = left_elements.iter().collect::<HashSet<_>>();
        let matches = right_elements
            .iter()
            .filter(|element| left_set.contains(element))
            .count() as f64;

        let shared_left = matches / left_elements.len() as f64;
        let shared_right = matches / right_elements.len() as f64;

        if shared_left < 0.5 && shared_right < 0.5 && depth < max_depth {
            Box::new(ElementNode {
                aabb,
                depth,
                elements: Vec::new(),
                left: Some(Self::build_recursive(
                    left_elements,
                    vertices_of,
                    center_of,
                    depth + 1,
                    max_depth,
                )),
                right: Some(Self::build_recursive(
                    right_elements,
                    vertices_of,
                    center_of,
                    depth + 1,
                    max_depth,
                )),
            })
        } else {
            log::trace!(
                "Element tree leaf at depth {depth} holding {} elements",
                elements.len()
            );
            Box::new(ElementNode {
                aabb,
                depth,
                elements,
                left: None,
                right: None,
            })
        }
    }

    /// Returns the bounding box of the whole element set, if non-empty.
    pub fn bounding_box(&self) -> Option<Aabb> {
        self.root.as_deref().map(|root| root.aabb)
    }

    /// Returns the configured depth cap.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Traverses the tree with the provided ray.
    ///
    /// At every node the ray is tested against the node's bounding box with
    /// the slab midpoint rule; leaves invoke the element test, which is
    /// expected to shrink the ray's stored range when it finds a closer hit.
    ///
    /// # Arguments
    /// * `ray`: The query ray, mutated in place as hits are found.
    /// * `test_element`: Intersects the ray with one element; returns whether
    ///   a hit occurred.
    ///
    /// # Returns
    /// `true` if any element was hit during the traversal.
    pub fn traverse<F>(&self, ray: &mut Ray, test_element: &mut F) -> bool
    where
        F: FnMut(usize, &mut Ray) -> bool,
    {
        self.root
            .as_deref()
            .map(|root| Self::traverse_recursive(root, ray, test_element))
            .unwrap_or(false)
    }

    fn traverse_recursive<F>(node: &ElementNode, ray: &mut Ray, test_element: &mut F) -> bool
    where
        F: FnMut(usize, &mut Ray) -> bool,
    {
        if !node.aabb.intersects_ray(ray) {
            return false;
        }

        if let (Some(left), Some(right)) = (node.left.as_deref(), node.right.as_deref()) {
            let hit_left = Self::traverse_recursive(left, ray, test_element);
            let hit_right = Self::traverse_recursive(right, ray, test_element);
            return hit_left || hit_right;
        }

        node.elements.iter().fold(false, |any_hit, element| {
            test_element(*element, ray) || any_hit
        })
    }
}
