use nalgebra::{DVector, Vector2};

/// A point in the analysis plane
pub type Point2 = Vector2<f64>;

/// A planar vector quantity (displacement, force)
pub type Vec2 = Vector2<f64>;

/// Degrees of freedom per node
pub const DOF: usize = 2;

/// Fixed displacement flags for a single node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Constraint {
    pub x: bool,
    pub y: bool,
}

impl Constraint {
    pub const FREE: Constraint = Constraint { x: false, y: false };
    pub const FIXED: Constraint = Constraint { x: true, y: true };

    /// Whether the given local axis (0 = x, 1 = y) is fixed
    pub fn is_fixed(&self, axis: usize) -> bool {
        match axis {
            0 => self.x,
            _ => self.y,
        }
    }

    pub fn union(self, other: Constraint) -> Constraint {
        Constraint {
            x: self.x || other.x,
            y: self.y || other.y,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelMetadata {
    pub youngs_modulus: f64,
    pub poisson_ratio: f64,
    pub part_thickness: f64,
}

/// Nodal displacement and consistent force fields from a solve
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub displacements: Vec<Vec2>,
    pub forces: Vec<Vec2>,
}

impl Solution {
    /// Displacements flattened into global DOF order
    pub fn displacement_vector(&self) -> DVector<f64> {
        flatten(&self.displacements)
    }

    /// Forces flattened into global DOF order
    pub fn force_vector(&self) -> DVector<f64> {
        flatten(&self.forces)
    }

    /// Largest displacement magnitude and the node it occurs at
    pub fn max_displacement(&self) -> Option<(usize, f64)> {
        self.displacements
            .iter()
            .map(|u| u.norm())
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }
}

/// Flattens one vector per node into `[x0, y0, x1, y1, ...]`
pub fn flatten(values: &[Vec2]) -> DVector<f64> {
    DVector::from_iterator(values.len() * DOF, values.iter().flat_map(|v| [v.x, v.y]))
}

/// Reshapes a global DOF vector into one vector per node
pub fn unflatten(values: &DVector<f64>) -> Vec<Vec2> {
    values
        .as_slice()
        .chunks_exact(DOF)
        .map(|c| Vec2::new(c[0], c[1]))
        .collect()
}

/// Named per-node or per-element data attached to an export
#[derive(Debug, Clone, Copy)]
pub enum Field<'a> {
    Scalar(&'a [f64]),
    Vector(&'a [Vec2]),
}

impl<'a> Field<'a> {
    pub fn len(&self) -> usize {
        match self {
            Field::Scalar(v) => v.len(),
            Field::Vector(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryRegion {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl BoundaryRegion {
    pub fn unbounded() -> BoundaryRegion {
        BoundaryRegion {
            x_min: f64::MIN,
            x_max: f64::MAX,
            y_min: f64::MIN,
            y_max: f64::MAX,
        }
    }

    /// Open-interval containment test
    pub fn contains(&self, point: &Point2) -> bool {
        point.x > self.x_min && point.x < self.x_max && point.y > self.y_min && point.y < self.y_max
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundaryTarget {
    pub fix_x: bool,
    pub fix_y: bool,
    pub fx: Option<f64>,
    pub fy: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryRule {
    pub name: String,
    pub region: BoundaryRegion,
    pub target: BoundaryTarget,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_and_unflatten_keep_dof_order() {
        let values = vec![Vec2::new(1.0, 2.0), Vec2::new(3.0, 4.0)];
        let flat = flatten(&values);
        assert_eq!(flat.as_slice(), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(unflatten(&flat), values);
    }

    #[test]
    fn region_is_open_interval() {
        let region = BoundaryRegion {
            x_min: 0.0,
            x_max: 1.0,
            ..BoundaryRegion::unbounded()
        };
        assert!(region.contains(&Point2::new(0.5, 10.0)));
        assert!(!region.contains(&Point2::new(0.0, 0.0)));
        assert!(!region.contains(&Point2::new(1.0, 0.0)));
    }

    #[test]
    fn max_displacement_picks_largest_norm() {
        let solution = Solution {
            displacements: vec![Vec2::new(0.0, 0.0), Vec2::new(3.0, -4.0), Vec2::new(1.0, 1.0)],
            forces: vec![Vec2::zeros(); 3],
        };
        assert_eq!(solution.max_displacement(), Some((1, 5.0)));
    }
}
