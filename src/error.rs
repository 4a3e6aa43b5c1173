use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, LaminaError>;

#[derive(Debug, Error)]
pub enum LaminaError {
    /// Young's modulus or Poisson's ratio outside the physical range
    #[error("invalid material: {0}")]
    InvalidMaterial(String),

    /// Malformed connectivity or misaligned per-node / per-element arrays
    #[error("inconsistent mesh: {0}")]
    InconsistentMesh(String),

    /// Non-positive Jacobian determinant at an integration point
    #[error(
        "degenerate element {element}: jacobian determinant {det:.6e} is not positive \
         (check element node ordering)"
    )]
    DegenerateElement { element: usize, det: f64 },

    /// The reduced stiffness matrix could not be factorized
    #[error(
        "singular system: stiffness pivot for dof {dof} vanished among {free_dofs} free dofs \
         (model is likely missing constraints)"
    )]
    SingularSystem { dof: usize, free_dofs: usize },

    #[error("input error: {0}")]
    Input(String),

    #[error("export error: {0}")]
    Export(String),

    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LaminaError {
    /// Process exit status reported by the command line driver
    pub fn exit_code(&self) -> i32 {
        match self {
            LaminaError::Input(_) => 2,
            LaminaError::InvalidMaterial(_) => 3,
            LaminaError::InconsistentMesh(_) => 4,
            LaminaError::DegenerateElement { .. } => 5,
            LaminaError::SingularSystem { .. } => 6,
            LaminaError::Export(_) | LaminaError::Xml(_) => 7,
            LaminaError::Io(_) => 8,
        }
    }
}
