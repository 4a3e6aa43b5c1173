//! The analysis model: geometry, loading, supports and cached element data.
//!
//! Geometry (nodes and connectivity) is fixed at construction. Thickness,
//! forces and constraints may be replaced per problem instance; the cached
//! unit-thickness stiffness matrices stay valid because they only depend on
//! geometry and material.

use log::info;
use nalgebra::{DMatrix, DVector, Matrix3};

use crate::{
    assembly::{self, batch_stiffness, gather_coords, global_dof_indices},
    datatypes::{flatten, Constraint, Point2, Solution, Vec2, DOF},
    element::ElementKind,
    error::{LaminaError, Result},
    material::plane_stress_matrix,
    post_processor,
    solver::{self, SolverOptions},
};

#[derive(Debug, Clone)]
pub struct Model {
    nodes: Vec<Point2>,
    /// Flat connectivity with stride `kind.node_count()`
    connectivity: Vec<usize>,
    kind: ElementKind,
    forces: Vec<Vec2>,
    constraints: Vec<Constraint>,
    thickness: Vec<f64>,
    youngs_modulus: f64,
    poisson_ratio: f64,
    constitutive: Matrix3<f64>,
    /// Flat global DOF map with stride `kind.dof_count()`
    gidx: Vec<usize>,
    /// Element stiffness per unit thickness
    k0: Vec<DMatrix<f64>>,
}

impl Model {
    /// Builds a model and precomputes its DOF maps and element stiffness
    ///
    /// # Arguments
    /// * `nodes` - Node coordinates
    /// * `elements` - Node indices per element; all of length 3 or all of length 4
    /// * `forces` - External force per node
    /// * `constraints` - Fixed DOF flags per node
    /// * `thickness` - Out of plane thickness per element
    /// * `youngs_modulus` - The modulus of elasticity of the model
    /// * `poisson_ratio` - The poisson ratio for the model
    ///
    /// # Returns
    /// The model, or the first of `InvalidMaterial`, `InconsistentMesh` and
    /// `DegenerateElement` that the input triggers
    pub fn new(
        nodes: Vec<Point2>,
        elements: Vec<Vec<usize>>,
        forces: Vec<Vec2>,
        constraints: Vec<Constraint>,
        thickness: Vec<f64>,
        youngs_modulus: f64,
        poisson_ratio: f64,
    ) -> Result<Model> {
        let constitutive = plane_stress_matrix(youngs_modulus, poisson_ratio)?;

        let first = elements.first().ok_or_else(|| {
            LaminaError::InconsistentMesh("model must contain at least one element".to_owned())
        })?;
        let kind = ElementKind::from_node_count(first.len())?;

        if let Some(i) = nodes.iter().position(|p| !(p.x.is_finite() && p.y.is_finite())) {
            return Err(LaminaError::InconsistentMesh(format!(
                "node {i} has non-finite coordinates"
            )));
        }

        let mut connectivity = Vec::with_capacity(elements.len() * kind.node_count());
        for (e, element) in elements.iter().enumerate() {
            if element.len() != kind.node_count() {
                return Err(LaminaError::InconsistentMesh(format!(
                    "element {e} has {} nodes but the model uses {}-node {} elements",
                    element.len(),
                    kind.node_count(),
                    kind.name()
                )));
            }
            if let Some(n) = element.iter().find(|&&n| n >= nodes.len()) {
                return Err(LaminaError::InconsistentMesh(format!(
                    "element {e} references node {n} but the mesh has {} nodes",
                    nodes.len()
                )));
            }
            connectivity.extend_from_slice(element);
        }

        check_node_aligned("forces", forces.len(), nodes.len())?;
        check_node_aligned("constraints", constraints.len(), nodes.len())?;
        check_thickness(&thickness, elements.len())?;

        let gidx = global_dof_indices(&connectivity);
        let k0 = batch_stiffness(kind, &nodes, &connectivity, &constitutive, |_| 1.0)?;

        info!(
            "model: {} nodes, {} {} elements, {} dofs",
            nodes.len(),
            elements.len(),
            kind.name(),
            DOF * nodes.len()
        );

        Ok(Model {
            nodes,
            connectivity,
            kind,
            forces,
            constraints,
            thickness,
            youngs_modulus,
            poisson_ratio,
            constitutive,
            gidx,
            k0,
        })
    }

    /// Builds an unloaded, unsupported model with uniform thickness
    pub fn unloaded(
        nodes: Vec<Point2>,
        elements: Vec<Vec<usize>>,
        thickness: f64,
        youngs_modulus: f64,
        poisson_ratio: f64,
    ) -> Result<Model> {
        let n_nodes = nodes.len();
        let n_elements = elements.len();
        Model::new(
            nodes,
            elements,
            vec![Vec2::zeros(); n_nodes],
            vec![Constraint::FREE; n_nodes],
            vec![thickness; n_elements],
            youngs_modulus,
            poisson_ratio,
        )
    }

    pub fn nodes(&self) -> &[Point2] {
        &self.nodes
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn n_elements(&self) -> usize {
        self.thickness.len()
    }

    pub fn n_dofs(&self) -> usize {
        DOF * self.nodes.len()
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn connectivity(&self) -> &[usize] {
        &self.connectivity
    }

    /// Node indices of element `e`
    pub fn element(&self, e: usize) -> &[usize] {
        let n = self.kind.node_count();
        &self.connectivity[e * n..(e + 1) * n]
    }

    pub fn elements(&self) -> impl Iterator<Item = &[usize]> + '_ {
        self.connectivity.chunks_exact(self.kind.node_count())
    }

    /// Global DOF indices of element `e`
    pub fn element_dofs(&self, e: usize) -> &[usize] {
        let n = self.kind.dof_count();
        &self.gidx[e * n..(e + 1) * n]
    }

    pub fn element_coords(&self, e: usize) -> Vec<Point2> {
        gather_coords(&self.nodes, self.element(e))
    }

    /// Cached stiffness of element `e` per unit thickness
    pub fn unit_stiffness(&self, e: usize) -> &DMatrix<f64> {
        &self.k0[e]
    }

    pub fn forces(&self) -> &[Vec2] {
        &self.forces
    }

    pub fn force_vector(&self) -> DVector<f64> {
        flatten(&self.forces)
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn thickness(&self) -> &[f64] {
        &self.thickness
    }

    pub fn youngs_modulus(&self) -> f64 {
        self.youngs_modulus
    }

    pub fn poisson_ratio(&self) -> f64 {
        self.poisson_ratio
    }

    pub fn constitutive(&self) -> &Matrix3<f64> {
        &self.constitutive
    }

    /// Global indices of all DOFs that are not fixed, in ascending order
    pub fn free_dofs(&self) -> Vec<usize> {
        self.constraints
            .iter()
            .enumerate()
            .flat_map(|(n, c)| (0..DOF).filter(move |&i| !c.is_fixed(i)).map(move |i| DOF * n + i))
            .collect()
    }

    pub fn set_thickness(&mut self, thickness: Vec<f64>) -> Result<()> {
        check_thickness(&thickness, self.n_elements())?;
        self.thickness = thickness;
        Ok(())
    }

    pub fn set_forces(&mut self, forces: Vec<Vec2>) -> Result<()> {
        check_node_aligned("forces", forces.len(), self.n_nodes())?;
        self.forces = forces;
        Ok(())
    }

    /// Adds a load to the force already acting on `node`
    pub fn add_force(&mut self, node: usize, force: Vec2) -> Result<()> {
        let n_nodes = self.n_nodes();
        let slot = self.forces.get_mut(node).ok_or_else(|| {
            LaminaError::InconsistentMesh(format!("node {node} out of range ({n_nodes} nodes)"))
        })?;
        *slot += force;
        Ok(())
    }

    pub fn set_constraints(&mut self, constraints: Vec<Constraint>) -> Result<()> {
        check_node_aligned("constraints", constraints.len(), self.n_nodes())?;
        self.constraints = constraints;
        Ok(())
    }

    /// Fixes additional DOFs on `node`; already fixed DOFs stay fixed
    pub fn fix(&mut self, node: usize, constraint: Constraint) -> Result<()> {
        let n_nodes = self.n_nodes();
        let slot = self.constraints.get_mut(node).ok_or_else(|| {
            LaminaError::InconsistentMesh(format!("node {node} out of range ({n_nodes} nodes)"))
        })?;
        *slot = slot.union(constraint);
        Ok(())
    }

    /// Local stiffness matrices at the current thickness, by full quadrature
    pub fn k(&self) -> Result<Vec<DMatrix<f64>>> {
        assembly::element_stiffness_matrices(self)
    }

    pub fn areas(&self) -> Vec<f64> {
        assembly::areas(self)
    }

    /// Mean of the node coordinates of every element
    pub fn element_centers(&self) -> Vec<Point2> {
        self.elements()
            .map(|element| {
                element.iter().fold(Point2::zeros(), |acc, n| acc + self.nodes[*n])
                    / element.len() as f64
            })
            .collect()
    }

    /// Pairwise euclidean distances between element centers
    ///
    /// Built on demand: the matrix is `n_elements x n_elements`.
    ///
    /// # Returns
    /// A symmetric matrix with a zero diagonal
    pub fn element_center_distances(&self) -> DMatrix<f64> {
        let centers = self.element_centers();
        DMatrix::from_fn(centers.len(), centers.len(), |i, j| {
            (centers[i] - centers[j]).norm()
        })
    }

    /// Global stiffness matrix
    pub fn stiffness(&self) -> DMatrix<f64> {
        solver::assemble(self)
    }

    pub fn solve(&self) -> Result<Solution> {
        solver::solve(self, &SolverOptions::default())
    }

    pub fn solve_with(&self, options: &SolverOptions) -> Result<Solution> {
        solver::solve(self, options)
    }

    pub fn element_strain_energies(&self, displacements: &[Vec2]) -> Result<Vec<f64>> {
        post_processor::element_strain_energies(self, displacements)
    }
}

fn check_node_aligned(what: &str, len: usize, n_nodes: usize) -> Result<()> {
    if len != n_nodes {
        return Err(LaminaError::InconsistentMesh(format!(
            "{what} has {len} entries but the mesh has {n_nodes} nodes"
        )));
    }
    Ok(())
}

fn check_thickness(thickness: &[f64], n_elements: usize) -> Result<()> {
    if thickness.len() != n_elements {
        return Err(LaminaError::InconsistentMesh(format!(
            "thickness has {} entries but the mesh has {n_elements} elements",
            thickness.len()
        )));
    }
    if let Some(e) = thickness.iter().position(|t| !(t.is_finite() && *t > 0.0)) {
        return Err(LaminaError::InconsistentMesh(format!(
            "element {e} has non-positive thickness {}",
            thickness[e]
        )));
    }
    Ok(())
}
