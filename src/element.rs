//! Element formulations for the two supported planar element types.
//!
//! Both formulations are stateless: they expose shape functions, their
//! derivatives in natural coordinates, and a fixed quadrature rule. The
//! active kind is chosen once per model from the connectivity length.

use nalgebra::Matrix2xX;

use crate::error::{LaminaError, Result};

/// 1/sqrt(3), the abscissa of the two point Gauss-Legendre rule
const GAUSS_2: f64 = 0.577_350_269_189_625_8;

/// A quadrature sample in natural coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadraturePoint {
    pub weight: f64,
    pub xi: [f64; 2],
}

static TRIANGLE_RULE: [QuadraturePoint; 1] = [QuadraturePoint {
    weight: 0.5,
    xi: [1.0 / 3.0, 1.0 / 3.0],
}];

// xi_1 varies fastest
static QUAD_RULE: [QuadraturePoint; 4] = [
    QuadraturePoint {
        weight: 1.0,
        xi: [-GAUSS_2, -GAUSS_2],
    },
    QuadraturePoint {
        weight: 1.0,
        xi: [GAUSS_2, -GAUSS_2],
    },
    QuadraturePoint {
        weight: 1.0,
        xi: [-GAUSS_2, GAUSS_2],
    },
    QuadraturePoint {
        weight: 1.0,
        xi: [GAUSS_2, GAUSS_2],
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    /// Linear 3-node triangle on the reference triangle (0,0), (1,0), (0,1)
    Triangle,
    /// Bilinear 4-node quadrilateral on the reference square [-1, 1]^2
    Quadrilateral,
}

impl ElementKind {
    /// Selects the formulation from the number of nodes per element
    ///
    /// # Arguments
    /// * `node_count` - Number of node indices in each element
    ///
    /// # Returns
    /// The matching element kind, or `InconsistentMesh` for unsupported counts
    pub fn from_node_count(node_count: usize) -> Result<ElementKind> {
        match node_count {
            3 => Ok(ElementKind::Triangle),
            4 => Ok(ElementKind::Quadrilateral),
            n => Err(LaminaError::InconsistentMesh(format!(
                "elements with {n} nodes are not supported (expected 3 or 4)"
            ))),
        }
    }

    pub fn node_count(self) -> usize {
        match self {
            ElementKind::Triangle => 3,
            ElementKind::Quadrilateral => 4,
        }
    }

    /// Local degrees of freedom per element
    pub fn dof_count(self) -> usize {
        2 * self.node_count()
    }

    /// Shape function values at a point in natural coordinates
    pub fn shape_functions(self, xi: [f64; 2]) -> Vec<f64> {
        let [a, b] = xi;
        match self {
            ElementKind::Triangle => vec![1.0 - a - b, a, b],
            ElementKind::Quadrilateral => vec![
                0.25 * (1.0 - a) * (1.0 - b),
                0.25 * (1.0 + a) * (1.0 - b),
                0.25 * (1.0 + a) * (1.0 + b),
                0.25 * (1.0 - a) * (1.0 + b),
            ],
        }
    }

    /// Shape function derivatives with respect to natural coordinates.
    ///
    /// Row 0 holds d/dxi_1 and row 1 holds d/dxi_2, one column per node.
    pub fn shape_derivatives(self, xi: [f64; 2]) -> Matrix2xX<f64> {
        let [a, b] = xi;
        match self {
            ElementKind::Triangle => Matrix2xX::from_row_slice(&[
                -1.0, 1.0, 0.0, //
                -1.0, 0.0, 1.0,
            ]),
            ElementKind::Quadrilateral => {
                Matrix2xX::from_row_slice(&[
                    -(1.0 - b), 1.0 - b, 1.0 + b, -(1.0 + b), //
                    -(1.0 - a), -(1.0 + a), 1.0 + a, 1.0 - a,
                ]) * 0.25
            }
        }
    }

    /// Integration rule that is exact for the stiffness integrand
    pub fn quadrature(self) -> &'static [QuadraturePoint] {
        match self {
            ElementKind::Triangle => &TRIANGLE_RULE,
            ElementKind::Quadrilateral => &QUAD_RULE,
        }
    }

    /// Centroid of the reference element
    pub fn reference_centroid(self) -> [f64; 2] {
        match self {
            ElementKind::Triangle => [1.0 / 3.0, 1.0 / 3.0],
            ElementKind::Quadrilateral => [0.0, 0.0],
        }
    }

    /// VTK cell type tag
    pub fn vtk_cell_type(self) -> u8 {
        match self {
            ElementKind::Triangle => 5,
            ElementKind::Quadrilateral => 9,
        }
    }

    /// Gmsh element type number
    pub fn gmsh_element_type(self) -> usize {
        match self {
            ElementKind::Triangle => 2,
            ElementKind::Quadrilateral => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ElementKind::Triangle => "triangle",
            ElementKind::Quadrilateral => "quad",
        }
    }
}
