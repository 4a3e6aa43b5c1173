use approx::assert_relative_eq;
use lamina::{
    datatypes::{flatten, unflatten},
    material::plane_stress_matrix,
    post_processor::{element_strains, element_stresses},
    Constraint, Model, Point2, Vec2,
};
use nalgebra::Vector3;

const A: f64 = 1e-3;
const B: f64 = -5e-4;
const G: f64 = 2e-4;

/// Linear field with constant strain `[A, B, G]`
fn exact(p: &Point2) -> Vec2 {
    Vec2::new(A * p.x, B * p.y + G * p.x)
}

/// Four distorted quads around an interior quad
fn patch() -> Model {
    let nodes = vec![
        Point2::new(0.0, 0.0),
        Point2::new(0.24, 0.0),
        Point2::new(0.24, 0.12),
        Point2::new(0.0, 0.12),
        Point2::new(0.04, 0.02),
        Point2::new(0.18, 0.03),
        Point2::new(0.16, 0.08),
        Point2::new(0.08, 0.08),
    ];
    let elements = vec![
        vec![0, 1, 5, 4],
        vec![1, 2, 6, 5],
        vec![2, 3, 7, 6],
        vec![3, 0, 4, 7],
        vec![4, 5, 6, 7],
    ];
    let mut model = Model::unloaded(nodes, elements, 1.0, 100.0, 0.3).unwrap();
    model.fix(0, Constraint::FIXED).unwrap();
    model.fix(3, Constraint { x: true, y: false }).unwrap();

    let u_exact: Vec<Vec2> = model.nodes().iter().map(exact).collect();
    let loads = model.stiffness() * flatten(&u_exact);
    model.set_forces(unflatten(&loads)).unwrap();
    model
}

#[test]
fn reproduces_linear_displacement_field() {
    let model = patch();
    let solution = model.solve().unwrap();

    for (p, u) in model.nodes().iter().zip(&solution.displacements) {
        let expected = exact(p);
        assert_relative_eq!(u.x, expected.x, epsilon = 1e-12);
        assert_relative_eq!(u.y, expected.y, epsilon = 1e-12);
    }
}

#[test]
fn interior_nodes_carry_no_force() {
    let model = patch();
    let solution = model.solve().unwrap();

    for force in &solution.forces[4..] {
        assert_relative_eq!(force.norm(), 0.0, epsilon = 1e-12);
    }
}

#[test]
fn strain_and_stress_are_uniform() {
    let model = patch();
    let solution = model.solve().unwrap();

    let expected_strain = Vector3::new(A, B, G);
    let expected_stress = plane_stress_matrix(100.0, 0.3).unwrap() * expected_strain;

    let strains = element_strains(&model, &solution.displacements).unwrap();
    let stresses = element_stresses(&model, &solution.displacements).unwrap();
    assert_eq!(strains.len(), 5);

    for (strain, stress) in strains.iter().zip(&stresses) {
        assert_relative_eq!(*strain, expected_strain, epsilon = 1e-12);
        assert_relative_eq!(*stress, expected_stress, epsilon = 1e-10);
    }
}
