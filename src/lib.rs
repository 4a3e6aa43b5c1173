//! Linear static analysis of planar continua with 3-node triangles and
//! 4-node quadrilaterals.
//!
//! A [`Model`] owns the mesh, loads, supports and material. Construction
//! validates the input and caches per-element stiffness; [`Model::solve`]
//! assembles the global stiffness, eliminates fixed DOFs and returns nodal
//! displacements and consistent nodal forces.

pub mod assembly;
pub mod datatypes;
pub mod element;
pub mod error;
pub mod input;
pub mod material;
pub mod mesher;
pub mod model;
pub mod plot;
pub mod post_processor;
pub mod solver;

pub use datatypes::{Constraint, Field, Point2, Solution, Vec2};
pub use element::ElementKind;
pub use error::{LaminaError, Result};
pub use model::Model;
pub use solver::SolverOptions;
