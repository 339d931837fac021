//! Index/coefficient tables for the polynomial mass properties of a
//! triangular Bezier surface.
//!
//! Every mass property of a closed degree-n Bezier surface is a polynomial
//! in the control-point coordinates: the divergence theorem turns the volume
//! into a sum over control-point triples, the center-of-mass numerator into
//! quadruples, and the second moments into quintuples, each weighted by an
//! exact integral of Bernstein products over the barycentric simplex. The
//! tables are assembled once per degree by tensor expansion over the lattice
//! index tuples and reused by every patch.

use super::{lattice_size, BezierPatch};

/// A polynomial in (u, v, w) stored as monomials `c·u^p·v^q·w^r`.
type Poly = Vec<(f64, [u32; 3])>;

fn factorial(n: u32) -> f64 {
    (1..=n).map(f64::from).product()
}

/// The trinomial coefficient n!/(i! j! k!).
fn trinomial(n: u32, i: u32, j: u32, k: u32) -> f64 {
    factorial(n) / (factorial(i) * factorial(j) * factorial(k))
}

/// The Bernstein polynomial B^n_{ijk} as a single monomial.
fn bernstein(n: u32, i: u32, j: u32, k: u32) -> Poly {
    vec![(trinomial(n, i, j, k), [i, j, k])]
}

/// ∂/∂u with w = 1 − u − v substituted (∂w/∂u = −1).
fn partial_u(poly: &Poly) -> Poly {
    let mut result = Vec::new();
    for (coef, [p, q, r]) in poly {
        if *p > 0 {
            result.push((coef * f64::from(*p), [p - 1, *q, *r]));
        }
        if *r > 0 {
            result.push((-coef * f64::from(*r), [*p, *q, r - 1]));
        }
    }
    result
}

/// ∂/∂v with w = 1 − u − v substituted (∂w/∂v = −1).
fn partial_v(poly: &Poly) -> Poly {
    let mut result = Vec::new();
    for (coef, [p, q, r]) in poly {
        if *q > 0 {
            result.push((coef * f64::from(*q), [*p, q - 1, *r]));
        }
        if *r > 0 {
            result.push((-coef * f64::from(*r), [*p, *q, r - 1]));
        }
    }
    result
}

fn multiply(a: &Poly, b: &Poly) -> Poly {
    let mut result = Vec::with_capacity(a.len() * b.len());
    for (coef_a, [pa, qa, ra]) in a {
        for (coef_b, [pb, qb, rb]) in b {
            result.push((coef_a * coef_b, [pa + pb, qa + qb, ra + rb]));
        }
    }
    result
}

/// Exact integral over the barycentric simplex:
/// ∫∫ u^p v^q w^r du dv = p! q! r! / (p + q + r + 2)!.
fn integrate_over_simplex(poly: &Poly) -> f64 {
    poly.iter()
        .map(|(coef, [p, q, r])| {
            coef * factorial(*p) * factorial(*q) * factorial(*r)
                / factorial(p + q + r + 2)
        })
        .sum()
}

/// Pre-integrated index/coefficient tables of one shape degree.
#[derive(Clone, Debug)]
pub struct MassPropertyTables {
    /// Shape degree the tables were expanded for.
    pub degree: usize,
    /// Volume triples: `(coef, [a, b, c])` with
    /// coef = ∫ B_a·∂uB_b·∂vB_c over local lattice indices.
    pub volume: Vec<(f64, [usize; 3])>,
    /// Center-of-mass quadruples: coef = ∫ B_a·B_b·∂uB_c·∂vB_d.
    pub cm_gamma: Vec<(f64, [usize; 4])>,
    /// Inertia quintuples: coef = ∫ B_a·B_b·B_c·∂uB_d·∂vB_e.
    pub inertia: Vec<(f64, [usize; 5])>,
}

impl MassPropertyTables {
    /// Expands the tables for the given degree.
    pub fn build(degree: usize) -> Self {
        let lattice = build_base_index_vector(degree);
        let n = degree as u32;

        let bases: Vec<Poly> = lattice
            .iter()
            .map(|[i, j, k]| bernstein(n, *i as u32, *j as u32, *k as u32))
            .collect();
        let du: Vec<Poly> = bases.iter().map(partial_u).collect();
        let dv: Vec<Poly> = bases.iter().map(partial_v).collect();

        let size = lattice.len();
        let mut volume = Vec::new();
        for a in 0..size {
            for b in 0..size {
                let ab = multiply(&bases[a], &du[b]);
                for c in 0..size {
                    let coef = integrate_over_simplex(&multiply(&ab, &dv[c]));
                    if coef.abs() > 1e-15 {
                        volume.push((coef, [a, b, c]));
                    }
                }
            }
        }

        let mut cm_gamma = Vec::new();
        for a in 0..size {
            for b in 0..size {
                let ab = multiply(&bases[a], &bases[b]);
                for c in 0..size {
                    let abc = multiply(&ab, &du[c]);
                    for d in 0..size {
                        let coef = integrate_over_simplex(&multiply(&abc, &dv[d]));
                        if coef.abs() > 1e-15 {
                            cm_gamma.push((coef, [a, b, c, d]));
                        }
                    }
                }
            }
        }

        let mut inertia = Vec::new();
        for a in 0..size {
            for b in 0..size {
                let ab = multiply(&bases[a], &bases[b]);
                for c in 0..size {
                    let abc = multiply(&ab, &bases[c]);
                    for d in 0..size {
                        let abcd = multiply(&abc, &du[d]);
                        for e in 0..size {
                            let coef = integrate_over_simplex(&multiply(&abcd, &dv[e]));
                            if coef.abs() > 1e-15 {
                                inertia.push((coef, [a, b, c, d, e]));
                            }
                        }
                    }
                }
            }
        }

        log::debug!(
            "Mass-property tables for degree {degree}: {} volume, {} cm, {} inertia tuples",
            volume.len(),
            cm_gamma.len(),
            inertia.len()
        );

        Self {
            degree,
            volume,
            cm_gamma,
            inertia,
        }
    }
}

/// The lattice index triples (i, j, k), i + j + k = n, in the canonical
/// local ordering used by [`BezierPatch`].
pub fn build_base_index_vector(degree: usize) -> Vec<[usize; 3]> {
    let mut lattice = Vec::with_capacity(lattice_size(degree));
    for i in (0..=degree).rev() {
        for j in (0..=degree - i).rev() {
            lattice.push([i, j, degree - i - j]);
        }
    }
    lattice
}

/// All ordered tuples of `depth` lattice indices, the tensor expansion the
/// statistics accumulation walks.
pub fn build_index_vectors(degree: usize, depth: usize) -> Vec<Vec<usize>> {
    let size = lattice_size(degree);
    let mut tuples: Vec<Vec<usize>> = vec![Vec::new()];
    for _ in 0..depth {
        tuples = tuples
            .into_iter()
            .flat_map(|tuple| {
                (0..size).map(move |index| {
                    let mut extended = tuple.clone();
                    extended.push(index);
                    extended
                })
            })
            .collect();
    }
    tuples
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn test_simplex_integrals() {
        // ∫∫ 1 du dv over the simplex is 1/2
        assert_relative_eq!(
            integrate_over_simplex(&vec![(1.0, [0, 0, 0])]),
            0.5,
            epsilon = 1e-15
        );
        // ∫∫ u du dv = 1/6
        assert_relative_eq!(
            integrate_over_simplex(&vec![(1.0, [1, 0, 0])]),
            1.0 / 6.0,
            epsilon = 1e-15
        );
        // ∫∫ u v w du dv = 1/120
        assert_relative_eq!(
            integrate_over_simplex(&vec![(1.0, [1, 1, 1])]),
            1.0 / 120.0,
            epsilon = 1e-15
        );
    }

    #[test]
    fn test_bernstein_partition_of_unity_integral() {
        // Σ_a ∫ B_a = area of the simplex
        for degree in 1..=3 {
            let total: f64 = build_base_index_vector(degree)
                .iter()
                .map(|[i, j, k]| {
                    integrate_over_simplex(&bernstein(
                        degree as u32,
                        *i as u32,
                        *j as u32,
                        *k as u32,
                    ))
                })
                .sum();
            assert_relative_eq!(total, 0.5, epsilon = 1e-14);
        }
    }

    #[test]
    fn test_partials_of_linear_bernstein() {
        // Degree 1: B_100 = u, B_010 = v, B_001 = w
        let b_u = bernstein(1, 1, 0, 0);
        let b_w = bernstein(1, 0, 0, 1);

        let du = partial_u(&b_u);
        assert_eq!(du.len(), 1);
        assert_relative_eq!(du[0].0, 1.0, epsilon = 1e-15);

        let dw_du = partial_u(&b_w);
        assert_eq!(dw_du.len(), 1);
        assert_relative_eq!(dw_du[0].0, -1.0, epsilon = 1e-15);
    }

    #[test]
    fn test_lattice_ordering_and_size() {
        let lattice = build_base_index_vector(2);
        assert_eq!(lattice.len(), 6);
        assert_eq!(lattice[0], [2, 0, 0]);
        assert_eq!(lattice[5], [0, 0, 2]);
        assert!(lattice.iter().all(|[i, j, k]| i + j + k == 2));
    }

    #[test]
    fn test_index_vectors_tensor_expansion() {
        let tuples = build_index_vectors(1, 2);
        assert_eq!(tuples.len(), 9);
        assert!(tuples.iter().all(|tuple| tuple.len() == 2));
    }

    #[test]
    fn test_tables_nonempty() {
        let tables = MassPropertyTables::build(2);
        assert!(!tables.volume.is_empty());
        assert!(!tables.cm_gamma.is_empty());
        assert!(!tables.inertia.is_empty());
    }
}
