use indicatif::ProgressBar;
use log::{debug, info};
use nalgebra::{DMatrix, DVector};

use crate::{
    datatypes::{unflatten, Solution},
    error::{LaminaError, Result},
    model::Model,
};

pub const DEFAULT_PIVOT_TOLERANCE: f64 = 1e-12;

/// Numerical settings for the global solve
#[derive(Debug, Clone, PartialEq)]
pub struct SolverOptions {
    /// An LU pivot smaller than this fraction of the largest pivot marks the
    /// reduced system as singular
    pub pivot_tolerance: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        SolverOptions {
            pivot_tolerance: DEFAULT_PIVOT_TOLERANCE,
        }
    }
}

/// Compiles element stiffness matrices into a total stiffness matrix
///
/// Each element contributes `thickness * k0` scattered through its global DOF
/// map. Entries shared by several elements are summed: the scatter always
/// accumulates with `+=` and never overwrites.
///
/// # Arguments
/// * `model` - The model to assemble
///
/// # Returns
/// A dense `n_dofs x n_dofs` matrix
pub fn assemble(model: &Model) -> DMatrix<f64> {
    let n_dofs = model.n_dofs();
    let mut total_stiffness_matrix: DMatrix<f64> = DMatrix::zeros(n_dofs, n_dofs);

    let bar = ProgressBar::new(model.n_elements() as u64);
    for (e, thickness) in model.thickness().iter().enumerate() {
        let k0 = model.unit_stiffness(e);
        let dofs = model.element_dofs(e);

        for (local_row, global_row) in dofs.iter().enumerate() {
            for (local_col, global_col) in dofs.iter().enumerate() {
                total_stiffness_matrix[(*global_row, *global_col)] +=
                    thickness * k0[(local_row, local_col)];
            }
        }
        bar.inc(1);
    }
    bar.finish_and_clear();

    debug!("assembled {n_dofs}x{n_dofs} total stiffness matrix");
    total_stiffness_matrix
}

/// Extracts the rows and columns of the free DOFs
fn reduce(
    stiffness: &DMatrix<f64>,
    forces: &DVector<f64>,
    free: &[usize],
) -> (DMatrix<f64>, DVector<f64>) {
    let n = free.len();
    let reduced_stiffness = DMatrix::from_fn(n, n, |i, j| stiffness[(free[i], free[j])]);
    let reduced_forces = DVector::from_fn(n, |i, _| forces[free[i]]);
    (reduced_stiffness, reduced_forces)
}

/// Solves `K u = f` on the free DOFs by LU decomposition
///
/// # Arguments
/// * `stiffness` - The reduced stiffness matrix
/// * `forces` - The reduced force vector
/// * `free` - Global DOF index of each reduced row, used for diagnostics
/// * `options` - Solver settings
///
/// # Returns
/// The reduced displacement vector, or `SingularSystem` naming the global DOF
/// whose pivot collapsed
fn solve_reduced(
    stiffness: DMatrix<f64>,
    forces: &DVector<f64>,
    free: &[usize],
    options: &SolverOptions,
) -> Result<DVector<f64>> {
    let lu = stiffness.lu();

    let pivots = lu.u().diagonal().map(f64::abs);
    let largest = pivots.max();
    let (smallest_at, smallest) = pivots.argmin();
    debug!("lu pivots range from {smallest:.3e} to {largest:.3e}");

    if !largest.is_finite()
        || !smallest.is_finite()
        || smallest <= options.pivot_tolerance * largest
    {
        return Err(LaminaError::SingularSystem {
            dof: free[smallest_at],
            free_dofs: free.len(),
        });
    }

    lu.solve(forces).ok_or(LaminaError::SingularSystem {
        dof: free[smallest_at],
        free_dofs: free.len(),
    })
}

/// Solves for nodal displacements and the consistent nodal forces
///
/// Constrained DOFs are held at zero displacement. The returned forces are
/// `K u` over all DOFs, so they equal the applied loads at free DOFs and the
/// reactions at constrained ones. The model is not modified.
///
/// # Arguments
/// * `model` - The model to solve
/// * `options` - Solver settings
///
/// # Returns
/// One displacement and one force vector per node
pub fn solve(model: &Model, options: &SolverOptions) -> Result<Solution> {
    let total_stiffness_matrix = assemble(model);
    let free = model.free_dofs();
    info!(
        "solving for {} free of {} dofs...",
        free.len(),
        model.n_dofs()
    );

    let mut displacements = DVector::zeros(model.n_dofs());

    if !free.is_empty() {
        let start = std::time::Instant::now();

        let (reduced_stiffness, reduced_forces) =
            reduce(&total_stiffness_matrix, &model.force_vector(), &free);
        let reduced_displacements =
            solve_reduced(reduced_stiffness, &reduced_forces, &free, options)?;

        for (u, dof) in reduced_displacements.iter().zip(&free) {
            displacements[*dof] = *u;
        }

        let elapsed = start.elapsed().as_secs_f32();
        info!("solved system in {:.3} seconds", elapsed);
    }

    let forces = &total_stiffness_matrix * &displacements;

    Ok(Solution {
        displacements: unflatten(&displacements),
        forces: unflatten(&forces),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::{gather_coords, local_stiffness},
        datatypes::{Constraint, Point2, Vec2},
    };
    use approx::assert_relative_eq;

    /// Two unit squares sharing the edge x = 1
    fn two_quads() -> Model {
        let nodes = vec![
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(2.0, 0.0),
            Point2::new(0.0, 1.0),
            Point2::new(1.0, 1.0),
            Point2::new(2.0, 1.0),
        ];
        let elements = vec![vec![0, 1, 4, 3], vec![1, 2, 5, 4]];
        let mut model = Model::new(
            nodes,
            elements,
            vec![Vec2::zeros(); 6],
            vec![Constraint::FREE; 6],
            vec![1.0, 2.0],
            100.0,
            0.3,
        )
        .unwrap();
        model.fix(0, Constraint::FIXED).unwrap();
        model.fix(3, Constraint::FIXED).unwrap();
        model.add_force(5, Vec2::new(0.0, -1.0)).unwrap();
        model.add_force(2, Vec2::new(0.5, 0.0)).unwrap();
        model
    }

    #[test]
    fn shared_entries_are_summed() {
        let model = two_quads();
        let k = assemble(&model);

        let local: Vec<DMatrix<f64>> = (0..2)
            .map(|e| {
                let coords = gather_coords(model.nodes(), model.element(e));
                let thickness = model.thickness()[e];
                local_stiffness(model.kind(), &coords, model.constitutive(), thickness, e).unwrap()
            })
            .collect();

        let mut expected = DMatrix::zeros(12, 12);
        for (e, ke) in local.iter().enumerate() {
            let dofs = model.element_dofs(e);
            for i in 0..8 {
                for j in 0..8 {
                    expected[(dofs[i], dofs[j])] += ke[(i, j)];
                }
            }
        }
        assert_relative_eq!(k, expected, epsilon = 1e-10);

        // node 1 x-dof (2) is shared: element 0 local dof 2, element 1 local dof 0
        assert_relative_eq!(k[(2, 2)], local[0][(2, 2)] + local[1][(0, 0)], epsilon = 1e-10);
        // nodes 0 and 2 share no element
        assert_eq!(k[(0, 4)], 0.0);
        assert_relative_eq!(k, k.transpose(), epsilon = 1e-10);
    }

    #[test]
    fn solve_balances_applied_load() {
        let model = two_quads();
        let solution = model.solve().unwrap();
        let applied = model.force_vector();
        let consistent = solution.force_vector();

        for dof in model.free_dofs() {
            assert_relative_eq!(consistent[dof], applied[dof], epsilon = 1e-10);
        }

        // reactions at the fixed nodes balance the applied load
        let reaction = solution.forces[0] + solution.forces[3];
        assert_relative_eq!(reaction.x, -0.5, epsilon = 1e-10);
        assert_relative_eq!(reaction.y, 1.0, epsilon = 1e-10);

        assert_eq!(solution.displacements[0], Vec2::zeros());
        assert_eq!(solution.displacements[3], Vec2::zeros());
        assert!(solution.displacements[5].y < 0.0);
    }

    #[test]
    fn solve_is_idempotent() {
        let model = two_quads();
        let first = model.solve().unwrap();
        let second = model.solve().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn unconstrained_model_is_singular() {
        let mut model = two_quads();
        model.set_constraints(vec![Constraint::FREE; 6]).unwrap();
        let result = model.solve();
        match result {
            Err(LaminaError::SingularSystem { free_dofs, dof }) => {
                assert_eq!(free_dofs, 12);
                assert!(dof < 12);
            }
            other => panic!("expected singular system, got {other:?}"),
        }

        // the model is untouched and can be fixed and retried
        model.fix(0, Constraint::FIXED).unwrap();
        model.fix(3, Constraint { x: true, y: false }).unwrap();
        assert!(model.solve().is_ok());
    }

    #[test]
    fn fully_constrained_model_has_no_motion() {
        let mut model = two_quads();
        model.set_constraints(vec![Constraint::FIXED; 6]).unwrap();
        let solution = model.solve().unwrap();
        assert!(solution.displacements.iter().all(|u| *u == Vec2::zeros()));
        assert!(solution.forces.iter().all(|f| *f == Vec2::zeros()));
    }

    #[test]
    fn tolerance_is_configurable() {
        let model = two_quads();
        let strict = SolverOptions { pivot_tolerance: 1.0 };
        assert!(matches!(
            model.solve_with(&strict),
            Err(LaminaError::SingularSystem { .. })
        ));
        assert!(model.solve_with(&SolverOptions::default()).is_ok());
    }
}
