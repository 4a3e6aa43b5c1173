//! Case files: material metadata, geometry source and boundary rules.

use std::path::{Path, PathBuf};

use json::JsonValue;
use log::{info, warn};

use crate::{
    datatypes::{BoundaryRegion, BoundaryRule, BoundaryTarget, Constraint, ModelMetadata, Vec2},
    element::ElementKind,
    error::{LaminaError, Result},
    mesher::{self, CantileverSpec},
    model::Model,
};

/// Where the mesh of a case comes from
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Cantilever {
        length: f64,
        height: f64,
        size: f64,
        kind: ElementKind,
    },
    MeshFile(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Case {
    pub metadata: ModelMetadata,
    pub geometry: Geometry,
    pub rules: Vec<BoundaryRule>,
}

/// Parses the input json into a JsonValue object
///
/// # Arguments
/// * `input_file` - The path to the input file
///
/// # Returns
/// A JsonValue object with the required top level sections
fn load_input_file(input_file: &Path) -> Result<JsonValue> {
    let file_string = std::fs::read_to_string(input_file).map_err(|err| {
        LaminaError::Input(format!(
            "unable to open input file {}: {err}",
            input_file.display()
        ))
    })?;

    let input_file_json = json::parse(&file_string)
        .map_err(|err| LaminaError::Input(format!("error in input file json: {err}")))?;

    for key in ["metadata", "geometry"] {
        if !input_file_json.has_key(key) {
            return Err(LaminaError::Input(format!("input json missing {key} field")));
        }
    }

    Ok(input_file_json)
}

fn required_f64(section: &JsonValue, key: &str, section_name: &str) -> Result<f64> {
    section[key].as_f64().ok_or_else(|| {
        LaminaError::Input(format!(
            "input json missing numeric {key} field in {section_name} section"
        ))
    })
}

/// Parses Model Metadata from the input json
fn parse_input_metadata(input_json: &JsonValue) -> Result<ModelMetadata> {
    let metadata = &input_json["metadata"];

    let part_thickness = if metadata.has_key("part_thickness") {
        required_f64(metadata, "part_thickness", "metadata")?
    } else {
        1.0
    };

    Ok(ModelMetadata {
        youngs_modulus: required_f64(metadata, "material_elasticity", "metadata")?,
        poisson_ratio: required_f64(metadata, "poisson_ratio", "metadata")?,
        part_thickness,
    })
}

/// Parses the geometry section; relative mesh paths resolve against `base_dir`
fn parse_geometry(input_json: &JsonValue, base_dir: &Path) -> Result<Geometry> {
    let geometry = &input_json["geometry"];

    if let Some(mesh_file) = geometry["mesh_file"].as_str() {
        return Ok(Geometry::MeshFile(base_dir.join(mesh_file)));
    }

    if geometry.has_key("cantilever") {
        let cantilever = &geometry["cantilever"];
        let kind = match cantilever["element"].as_str().unwrap_or("quad") {
            "quad" | "quadrilateral" => ElementKind::Quadrilateral,
            "triangle" | "tria" => ElementKind::Triangle,
            other => {
                return Err(LaminaError::Input(format!(
                    "unknown cantilever element type '{other}'"
                )))
            }
        };
        return Ok(Geometry::Cantilever {
            length: required_f64(cantilever, "length", "cantilever")?,
            height: required_f64(cantilever, "height", "cantilever")?,
            size: required_f64(cantilever, "size", "cantilever")?,
            kind,
        });
    }

    Err(LaminaError::Input(
        "geometry section needs either mesh_file or cantilever".to_owned(),
    ))
}

fn region_bound(region: &JsonValue, key: &str, name: &str, default: f64) -> Result<f64> {
    if !region.has_key(key) {
        return Ok(default);
    }
    region[key]
        .as_f64()
        .ok_or_else(|| LaminaError::Input(format!("bad value for {key} in {name}")))
}

/// Reads a `ux`/`uy` target; only a zero displacement can be prescribed
fn fixed_target(targets: &JsonValue, key: &str, name: &str) -> Result<bool> {
    if !targets.has_key(key) {
        return Ok(false);
    }
    match targets[key].as_f64() {
        Some(value) if value == 0.0 => Ok(true),
        Some(value) => Err(LaminaError::Input(format!(
            "boundary '{name}' prescribes {key} = {value}; only zero displacements are supported"
        ))),
        None => Err(LaminaError::Input(format!("bad value for {key} in {name}"))),
    }
}

fn force_target(targets: &JsonValue, key: &str, name: &str) -> Result<Option<f64>> {
    if !targets.has_key(key) {
        return Ok(None);
    }
    targets[key]
        .as_f64()
        .map(Some)
        .ok_or_else(|| LaminaError::Input(format!("bad value for {key} in {name}")))
}

/// Loads boundary rules from the input json
fn parse_boundary_rules(input_json: &JsonValue) -> Result<Vec<BoundaryRule>> {
    let mut rules: Vec<BoundaryRule> = Vec::new();

    for (name, rule_json) in input_json["boundary_conditions"].entries() {
        if !rule_json.has_key("targets") {
            return Err(LaminaError::Input(format!(
                "boundary rule {name} is missing targets field"
            )));
        }

        let region_json = &rule_json["region"];
        let unbounded = BoundaryRegion::unbounded();
        let region = BoundaryRegion {
            x_min: region_bound(region_json, "x_target_min", name, unbounded.x_min)?,
            x_max: region_bound(region_json, "x_target_max", name, unbounded.x_max)?,
            y_min: region_bound(region_json, "y_target_min", name, unbounded.y_min)?,
            y_max: region_bound(region_json, "y_target_max", name, unbounded.y_max)?,
        };

        let targets = &rule_json["targets"];
        let target = BoundaryTarget {
            fix_x: fixed_target(targets, "ux", name)?,
            fix_y: fixed_target(targets, "uy", name)?,
            fx: force_target(targets, "fx", name)?,
            fy: force_target(targets, "fy", name)?,
        };

        // Validate input
        if region.x_min > region.x_max {
            return Err(LaminaError::Input(format!(
                "boundary '{name}' has x_target_min greater than x_target_max"
            )));
        }
        if region.y_min > region.y_max {
            return Err(LaminaError::Input(format!(
                "boundary '{name}' has y_target_min greater than y_target_max"
            )));
        }
        if target.fix_x && target.fx.is_some() {
            return Err(LaminaError::Input(format!(
                "boundary '{name}' is over-constrained in x-axis"
            )));
        }
        if target.fix_y && target.fy.is_some() {
            return Err(LaminaError::Input(format!(
                "boundary '{name}' is over-constrained in y-axis"
            )));
        }
        if target == BoundaryTarget::default() {
            return Err(LaminaError::Input(format!(
                "boundary '{name}' has no ux, uy, fx or fy target"
            )));
        }

        rules.push(BoundaryRule {
            name: name.to_string(),
            region,
            target,
        })
    }

    Ok(rules)
}

/// Loads a case file
///
/// # Arguments
/// * `input_file` - The path to the case json
///
/// # Returns
/// The parsed case, with mesh paths resolved relative to the case file
pub fn load_case(input_file: &Path) -> Result<Case> {
    let input_json = load_input_file(input_file)?;
    let base_dir = input_file.parent().unwrap_or_else(|| Path::new("."));

    let case = Case {
        metadata: parse_input_metadata(&input_json)?,
        geometry: parse_geometry(&input_json, base_dir)?,
        rules: parse_boundary_rules(&input_json)?,
    };
    info!("loaded {} boundary rules from input file", case.rules.len());
    Ok(case)
}

/// Applies boundary rules to the nodes of a model
///
/// Fixed axes are added to any existing constraints and forces are added to
/// any existing load.
///
/// # Arguments
/// * `rules` - The boundary rules to apply
/// * `model` - The model to modify
pub fn apply_boundary_conditions(rules: &[BoundaryRule], model: &mut Model) -> Result<()> {
    let nodes = model.nodes().to_vec();

    for rule in rules {
        let mut matched: usize = 0;
        for (i, node) in nodes.iter().enumerate() {
            if !rule.region.contains(node) {
                continue;
            }
            matched += 1;
            model.fix(
                i,
                Constraint {
                    x: rule.target.fix_x,
                    y: rule.target.fix_y,
                },
            )?;
            let force = Vec2::new(rule.target.fx.unwrap_or(0.0), rule.target.fy.unwrap_or(0.0));
            model.add_force(i, force)?;
        }

        if matched == 0 {
            warn!("boundary rule '{}' matched no nodes", rule.name);
        }
    }

    Ok(())
}

/// Builds the model described by a case, boundary rules included
pub fn build_model(case: &Case) -> Result<Model> {
    let metadata = &case.metadata;
    let mut model = match &case.geometry {
        Geometry::Cantilever {
            length,
            height,
            size,
            kind,
        } => mesher::cantilever(&CantileverSpec {
            length: *length,
            height: *height,
            size: *size,
            thickness: metadata.part_thickness,
            youngs_modulus: metadata.youngs_modulus,
            poisson_ratio: metadata.poisson_ratio,
            kind: *kind,
        })?,
        Geometry::MeshFile(path) => {
            let mut model =
                mesher::import_mesh(path, metadata.youngs_modulus, metadata.poisson_ratio)?;
            model.set_thickness(vec![metadata.part_thickness; model.n_elements()])?;
            model
        }
    };

    apply_boundary_conditions(&case.rules, &mut model)?;
    Ok(model)
}
