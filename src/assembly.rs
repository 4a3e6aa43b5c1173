//! Element level integration: Jacobians, strain operators, local stiffness
//! matrices and areas.
//!
//! Every function here is pure per element. The batched variants evaluate all
//! elements on the rayon pool and keep the results in element order.

use indicatif::{ParallelProgressIterator, ProgressBar};
use log::{debug, info};
use nalgebra::{DMatrix, Matrix2, Matrix2xX, Matrix3, Matrix3xX};
use rayon::prelude::*;

use crate::{
    datatypes::{Point2, DOF},
    element::ElementKind,
    error::{LaminaError, Result},
    model::Model,
};

/// Computes the Jacobian of the reference-to-physical map
///
/// # Arguments
/// * `kind` - The element formulation
/// * `coords` - Physical node coordinates of the element, in element order
/// * `xi` - The natural coordinates to evaluate at
///
/// # Returns
/// The 2x2 Jacobian `B(xi) * X` and the natural derivative matrix `B(xi)`
pub fn jacobian(
    kind: ElementKind,
    coords: &[Point2],
    xi: [f64; 2],
) -> (Matrix2<f64>, Matrix2xX<f64>) {
    let dn = kind.shape_derivatives(xi);
    let mut j = Matrix2::zeros();
    for (a, x) in coords.iter().enumerate() {
        j += dn.column(a) * x.transpose();
    }
    (j, dn)
}

/// Calculates the strain-displacement matrix of the element at a point
///
/// Rows are `[exx, eyy, gxy]`; columns follow the local DOF order
/// `[u0, v0, u1, v1, ...]`.
///
/// # Arguments
/// * `kind` - The element formulation
/// * `coords` - Physical node coordinates of the element
/// * `xi` - The natural coordinates to evaluate at
/// * `element` - Index of the element, reported on failure
///
/// # Returns
/// The 3x(2n) strain operator and the Jacobian determinant, or
/// `DegenerateElement` if the determinant is not positive
pub fn strain_displacement_matrix(
    kind: ElementKind,
    coords: &[Point2],
    xi: [f64; 2],
    element: usize,
) -> Result<(Matrix3xX<f64>, f64)> {
    let (j, dn) = jacobian(kind, coords, xi);
    let det = j.determinant();

    // also rejects NaN
    if !(det > 0.0) {
        return Err(LaminaError::DegenerateElement { element, det });
    }
    let j_inv = j
        .try_inverse()
        .ok_or(LaminaError::DegenerateElement { element, det })?;

    let b = j_inv * dn;
    let n = kind.node_count();
    let mut d = Matrix3xX::zeros(DOF * n);
    for a in 0..n {
        let (bx, by) = (b[(0, a)], b[(1, a)]);
        d[(0, DOF * a)] = bx;
        d[(1, DOF * a + 1)] = by;
        d[(2, DOF * a)] = by;
        d[(2, DOF * a + 1)] = bx;
    }

    Ok((d, det))
}

/// Computes the stiffness matrix for a given element by quadrature
///
/// # Arguments
/// * `kind` - The element formulation
/// * `coords` - Physical node coordinates of the element
/// * `constitutive` - The 3x3 stress-strain matrix
/// * `thickness` - Out of plane thickness of the element
/// * `element` - Index of the element, reported on failure
///
/// # Returns
/// A symmetric (2n)x(2n) stiffness matrix
pub fn local_stiffness(
    kind: ElementKind,
    coords: &[Point2],
    constitutive: &Matrix3<f64>,
    thickness: f64,
    element: usize,
) -> Result<DMatrix<f64>> {
    let mut k = DMatrix::zeros(kind.dof_count(), kind.dof_count());

    for q in kind.quadrature() {
        let (d, det) = strain_displacement_matrix(kind, coords, q.xi, element)?;
        k += (d.transpose() * constitutive * &d) * (q.weight * thickness * det);
    }

    Ok(k)
}

/// Calculates the area of the element by integrating the Jacobian determinant
pub fn element_area(kind: ElementKind, coords: &[Point2]) -> f64 {
    kind.quadrature()
        .iter()
        .map(|q| q.weight * jacobian(kind, coords, q.xi).0.determinant())
        .sum()
}

/// Global DOF indices targeted by an element's local matrix
///
/// Node `n` maps to DOFs `2n` and `2n + 1`, in element node order.
pub fn global_dof_indices(element: &[usize]) -> Vec<usize> {
    element
        .iter()
        .flat_map(|&n| (0..DOF).map(move |i| DOF * n + i))
        .collect()
}

/// Gathers the physical coordinates of an element's nodes
pub fn gather_coords(nodes: &[Point2], element: &[usize]) -> Vec<Point2> {
    element.iter().map(|&n| nodes[n]).collect()
}

/// Evaluates the local stiffness of every element in parallel.
///
/// Fails fast on the first degenerate element; results are in element order.
pub(crate) fn batch_stiffness<F>(
    kind: ElementKind,
    nodes: &[Point2],
    connectivity: &[usize],
    constitutive: &Matrix3<f64>,
    thickness: F,
) -> Result<Vec<DMatrix<f64>>>
where
    F: Fn(usize) -> f64 + Sync,
{
    let elements: Vec<&[usize]> = connectivity.chunks_exact(kind.node_count()).collect();

    debug!("building {} {} stiffness matrices", elements.len(), kind.name());
    let bar = ProgressBar::new(elements.len() as u64);
    let matrices = elements
        .par_iter()
        .enumerate()
        .progress_with(bar.clone())
        .map(|(e, element)| {
            local_stiffness(
                kind,
                &gather_coords(nodes, element),
                constitutive,
                thickness(e),
                e,
            )
        })
        .collect::<Result<Vec<_>>>();
    bar.finish_and_clear();

    let matrices = matrices?;
    info!("built {} element stiffness matrices", matrices.len());
    Ok(matrices)
}

/// Local stiffness matrices of all elements of a model, scaled by thickness
pub fn element_stiffness_matrices(model: &Model) -> Result<Vec<DMatrix<f64>>> {
    let thickness = model.thickness();
    batch_stiffness(
        model.kind(),
        model.nodes(),
        model.connectivity(),
        model.constitutive(),
        |e| thickness[e],
    )
}

/// Areas of all elements of a model
pub fn areas(model: &Model) -> Vec<f64> {
    let kind = model.kind();
    (0..model.n_elements())
        .into_par_iter()
        .map(|e| element_area(kind, &model.element_coords(e)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::plane_stress_matrix;
    use approx::assert_relative_eq;
    use nalgebra::{DVector, SymmetricEigen};

    fn unit_square() -> Vec<Point2> {
        vec![
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(0.0, 1.0),
        ]
    }

    fn unit_triangle() -> Vec<Point2> {
        vec![Point2::new(0.0, 0.0), Point2::new(1.0, 0.0), Point2::new(0.0, 1.0)]
    }

    fn distorted_quad() -> Vec<Point2> {
        vec![
            Point2::new(0.1, -0.2),
            Point2::new(2.0, 0.3),
            Point2::new(1.7, 1.4),
            Point2::new(-0.3, 0.9),
        ]
    }

    fn c() -> Matrix3<f64> {
        plane_stress_matrix(100.0, 0.3).unwrap()
    }

    fn count_zero_eigenvalues(k: &DMatrix<f64>) -> usize {
        let eigen = SymmetricEigen::new(k.clone());
        let scale = eigen.eigenvalues.amax();
        assert!(
            eigen.eigenvalues.iter().all(|l| *l > -1e-10 * scale),
            "negative eigenvalue in {:?}",
            eigen.eigenvalues
        );
        eigen.eigenvalues.iter().filter(|l| l.abs() < 1e-10 * scale).count()
    }

    #[test]
    fn unit_square_first_row() {
        let k = local_stiffness(ElementKind::Quadrilateral, &unit_square(), &c(), 1.0, 0).unwrap();
        let expected = [
            57.692308, 24.038462, -38.461538, 4.807692, -28.846154, -24.038462, 9.615385, -4.807692,
        ];
        for (j, value) in expected.iter().enumerate() {
            assert_relative_eq!(k[(0, j)], *value, epsilon = 1e-5);
        }
    }

    #[test]
    fn unit_triangle_first_row() {
        let k = local_stiffness(ElementKind::Triangle, &unit_triangle(), &c(), 1.0, 0).unwrap();
        let expected = [86.538462, 48.076923, -67.307692, -19.230769, -19.230769, -28.846154];
        for (j, value) in expected.iter().enumerate() {
            assert_relative_eq!(k[(0, j)], *value, epsilon = 1e-5);
        }
    }

    #[test]
    fn stiffness_is_symmetric_with_three_rigid_modes() {
        for (kind, coords) in [
            (ElementKind::Triangle, unit_triangle()),
            (ElementKind::Quadrilateral, unit_square()),
            (ElementKind::Quadrilateral, distorted_quad()),
        ] {
            let k = local_stiffness(kind, &coords, &c(), 0.5, 0).unwrap();
            assert_relative_eq!(k, k.transpose(), epsilon = 1e-10);
            assert_eq!(count_zero_eigenvalues(&k), 3, "{kind:?}");
        }
    }

    #[test]
    fn rigid_body_motion_produces_no_force() {
        let coords = distorted_quad();
        let k = local_stiffness(ElementKind::Quadrilateral, &coords, &c(), 1.0, 0).unwrap();
        // small rotation about the origin plus a translation
        let u = DVector::from_iterator(8, coords.iter().flat_map(|p| [-p.y + 0.3, p.x - 0.1]));
        assert!((&k * u).amax() < 1e-10);
    }

    #[test]
    fn stiffness_scales_with_thickness() {
        let k1 = local_stiffness(ElementKind::Triangle, &unit_triangle(), &c(), 1.0, 0).unwrap();
        let k3 = local_stiffness(ElementKind::Triangle, &unit_triangle(), &c(), 3.0, 0).unwrap();
        assert_relative_eq!(k1 * 3.0, k3, epsilon = 1e-10);
    }

    #[test]
    fn reversed_ordering_is_degenerate() {
        let mut coords = unit_square();
        coords.reverse();
        let result = local_stiffness(ElementKind::Quadrilateral, &coords, &c(), 1.0, 4);
        match result {
            Err(LaminaError::DegenerateElement { element, det }) => {
                assert_eq!(element, 4);
                assert!(det < 0.0);
            }
            other => panic!("expected degenerate element, got {other:?}"),
        }

        let collapsed = vec![Point2::new(0.0, 0.0), Point2::new(1.0, 0.0), Point2::new(2.0, 0.0)];
        assert!(matches!(
            local_stiffness(ElementKind::Triangle, &collapsed, &c(), 1.0, 0),
            Err(LaminaError::DegenerateElement { element: 0, .. })
        ));
    }

    #[test]
    fn areas_of_reference_shapes() {
        assert_relative_eq!(element_area(ElementKind::Quadrilateral, &unit_square()), 1.0);
        assert_relative_eq!(element_area(ElementKind::Triangle, &unit_triangle()), 0.5);
        // shoelace area of the distorted quad
        let p = distorted_quad();
        let shoelace: f64 = (0..4)
            .map(|i| {
                let (a, b) = (p[i], p[(i + 1) % 4]);
                a.x * b.y - b.x * a.y
            })
            .sum::<f64>()
            / 2.0;
        assert_relative_eq!(
            element_area(ElementKind::Quadrilateral, &p),
            shoelace,
            epsilon = 1e-12
        );
    }

    #[test]
    fn jacobian_of_scaled_square() {
        let coords: Vec<Point2> = unit_square().iter().map(|p| p * 2.0).collect();
        let (j, _) = jacobian(ElementKind::Quadrilateral, &coords, [0.2, 0.7]);
        assert_relative_eq!(j, Matrix2::identity(), epsilon = 1e-14);
    }

    #[test]
    fn dof_indices_interleave_axes() {
        assert_eq!(global_dof_indices(&[3, 0, 5]), vec![6, 7, 0, 1, 10, 11]);
    }
}
