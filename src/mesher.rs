use std::{collections::HashMap, path::Path};

use log::{info, warn};

use crate::{
    datatypes::{Constraint, Point2, Vec2},
    element::ElementKind,
    error::{LaminaError, Result},
    model::Model,
};

/// Rectangular cantilever description
#[derive(Debug, Clone, PartialEq)]
pub struct CantileverSpec {
    pub length: f64,
    pub height: f64,
    pub size: f64,
    pub thickness: f64,
    pub youngs_modulus: f64,
    pub poisson_ratio: f64,
    pub kind: ElementKind,
}

impl Default for CantileverSpec {
    fn default() -> Self {
        CantileverSpec {
            length: 4.0,
            height: 1.0,
            size: 1.0,
            thickness: 1.0,
            youngs_modulus: 100.0,
            poisson_ratio: 0.3,
            kind: ElementKind::Quadrilateral,
        }
    }
}

/// Index of the node that carries the tip load of a cantilever grid
pub fn cantilever_tip_node(nx: usize, ny: usize) -> usize {
    ((ny + 1) / 2 + 1) * (nx + 1) - 1
}

/// Builds a structured cantilever fixed along x = 0 with a unit downward
/// load on the free end
///
/// Nodes are laid out row by row, `i + j * (nx + 1)`. Each grid cell becomes
/// one quadrilateral or two triangles, all counter-clockwise.
///
/// # Arguments
/// * `spec` - Dimensions, element size, material and element kind
///
/// # Returns
/// The ready-to-solve model
pub fn cantilever(spec: &CantileverSpec) -> Result<Model> {
    if !(spec.size > 0.0 && spec.length >= spec.size && spec.height >= spec.size) {
        return Err(LaminaError::Input(format!(
            "cantilever {}x{} cannot be meshed with element size {}",
            spec.length, spec.height, spec.size
        )));
    }
    let nx = (spec.length / spec.size) as usize;
    let ny = (spec.height / spec.size) as usize;

    let mut nodes = Vec::with_capacity((nx + 1) * (ny + 1));
    for j in 0..=ny {
        for i in 0..=nx {
            nodes.push(Point2::new(
                spec.length * i as f64 / nx as f64,
                spec.height * j as f64 / ny as f64,
            ));
        }
    }

    let mut elements = Vec::new();
    for j in 0..ny {
        for i in 0..nx {
            let n0 = i + j * (nx + 1);
            match spec.kind {
                ElementKind::Quadrilateral => {
                    elements.push(vec![n0, n0 + 1, n0 + nx + 2, n0 + nx + 1]);
                }
                ElementKind::Triangle => {
                    elements.push(vec![n0, n0 + 1, n0 + nx + 2]);
                    elements.push(vec![n0 + nx + 2, n0 + nx + 1, n0]);
                }
            }
        }
    }

    let mut forces = vec![Vec2::zeros(); nodes.len()];
    forces[cantilever_tip_node(nx, ny)].y = -1.0;

    let mut constraints = vec![Constraint::FREE; nodes.len()];
    for j in 0..=ny {
        constraints[j * (nx + 1)] = Constraint::FIXED;
    }

    let thickness = vec![spec.thickness; elements.len()];

    info!(
        "meshed {}x{} cantilever with {} {} elements",
        spec.length,
        spec.height,
        elements.len(),
        spec.kind.name()
    );

    Model::new(
        nodes,
        elements,
        forces,
        constraints,
        thickness,
        spec.youngs_modulus,
        spec.poisson_ratio,
    )
}

enum MeshParseState {
    Format,
    Nodes,
    Elements,
    Limbo,
}

fn parse_numbers<T: std::str::FromStr>(line: &str, what: &str) -> Result<Vec<T>> {
    line.split_whitespace()
        .map(|token| {
            token
                .parse()
                .map_err(|_| LaminaError::Input(format!("unexpected value '{token}' in {what}")))
        })
        .collect()
}

fn next_line<'a>(lines: &mut impl Iterator<Item = &'a str>, what: &str) -> Result<&'a str> {
    lines
        .next()
        .ok_or_else(|| LaminaError::Input(format!("mesh file ended inside {what}")))
}

/// Parses an ASCII Gmsh 4.1 mesh into node coordinates and planar elements
///
/// Only 3-node triangles (type 2) and 4-node quadrilaterals (type 3) are
/// kept; other element blocks are skipped.
///
/// # Arguments
/// * `contents` - The text of the .msh file
///
/// # Returns
/// A tuple with the parsed nodes and the parsed elements, in that order
pub fn parse_gmsh(contents: &str) -> Result<(Vec<Point2>, Vec<Vec<usize>>)> {
    let mut parser_state = MeshParseState::Limbo;
    let mut parsed_section_metadata = false;
    let mut lines = contents.lines().map(str::trim).filter(|l| !l.is_empty());

    let mut nodes: Vec<Point2> = Vec::new();
    let mut node_indexes: HashMap<usize, usize> = HashMap::new();
    let mut tagged_elements: Vec<Vec<usize>> = Vec::new();
    let mut skipped: usize = 0;

    while let Some(line) = lines.next() {
        if line.starts_with("$End") {
            parser_state = MeshParseState::Limbo;
            continue;
        }

        match parser_state {
            MeshParseState::Limbo => {
                parsed_section_metadata = false;

                if line.starts_with("$MeshFormat") {
                    parser_state = MeshParseState::Format;
                } else if line.starts_with("$Nodes") {
                    parser_state = MeshParseState::Nodes;
                } else if line.starts_with("$Elements") {
                    parser_state = MeshParseState::Elements;
                }
            }
            MeshParseState::Format => {
                // 4.0 lays out node blocks differently, only 4.1 is read
                let version = line.split_whitespace().next().unwrap_or_default();
                if version != "4.1" {
                    return Err(LaminaError::Input(format!(
                        "unsupported gmsh format version {version} (expected 4.1 ascii)"
                    )));
                }
                if line.split_whitespace().nth(1) != Some("0") {
                    return Err(LaminaError::Input(
                        "binary gmsh files are not supported".to_owned(),
                    ));
                }
            }
            MeshParseState::Nodes => {
                if !parsed_section_metadata {
                    parsed_section_metadata = true;
                    continue;
                }

                let block: Vec<usize> = parse_numbers(line, "node block header")?;
                let num_nodes_local = *block.get(3).ok_or_else(|| {
                    LaminaError::Input(format!("malformed node block header '{line}'"))
                })?;

                let mut node_tags: Vec<usize> = Vec::with_capacity(num_nodes_local);
                for _ in 0..num_nodes_local {
                    let tag: Vec<usize> =
                        parse_numbers(next_line(&mut lines, "$Nodes")?, "node tag")?;
                    node_tags.push(*tag.first().ok_or_else(|| {
                        LaminaError::Input("empty node tag line".to_owned())
                    })?);
                }

                for tag in node_tags {
                    let node_coords: Vec<f64> =
                        parse_numbers(next_line(&mut lines, "$Nodes")?, "node coordinates")?;
                    if node_coords.len() < 2 {
                        return Err(LaminaError::Input(format!(
                            "node {tag} has fewer than 2 coordinates"
                        )));
                    }
                    node_indexes.insert(tag, nodes.len());
                    nodes.push(Point2::new(node_coords[0], node_coords[1]));
                }
            }
            MeshParseState::Elements => {
                if !parsed_section_metadata {
                    parsed_section_metadata = true;
                    continue;
                }

                let block: Vec<usize> = parse_numbers(line, "element block header")?;
                if block.len() < 4 {
                    return Err(LaminaError::Input(format!(
                        "malformed element block header '{line}'"
                    )));
                }
                let element_type = block[2];
                let num_elements = block[3];
                let kind = [ElementKind::Triangle, ElementKind::Quadrilateral]
                    .into_iter()
                    .find(|k| k.gmsh_element_type() == element_type);

                for _ in 0..num_elements {
                    let element_data: Vec<usize> =
                        parse_numbers(next_line(&mut lines, "$Elements")?, "element data")?;

                    let Some(kind) = kind else {
                        skipped += 1;
                        continue;
                    };
                    if element_data.len() != kind.node_count() + 1 {
                        return Err(LaminaError::Input(format!(
                            "{} element {:?} has the wrong number of nodes",
                            kind.name(),
                            element_data.first()
                        )));
                    }
                    tagged_elements.push(element_data[1..].to_vec());
                }
            }
        }
    }

    let elements = tagged_elements
        .into_iter()
        .map(|tags| {
            tags.iter()
                .map(|tag| {
                    node_indexes.get(tag).copied().ok_or_else(|| {
                        LaminaError::Input(format!("element references unknown node tag {tag}"))
                    })
                })
                .collect::<Result<Vec<usize>>>()
        })
        .collect::<Result<Vec<_>>>()?;

    if skipped > 0 {
        warn!("skipped {skipped} non-planar or unsupported gmsh elements");
    }

    Ok((nodes, elements))
}

fn vtu_array<'a, 'input>(
    parent: roxmltree::Node<'a, 'input>,
    name: Option<&str>,
) -> Result<roxmltree::Node<'a, 'input>> {
    let array = parent
        .descendants()
        .filter(|n| n.tag_name().name() == "DataArray")
        .find(|n| name.is_none() || n.attribute("Name") == name)
        .ok_or_else(|| {
            LaminaError::Input(format!(
                "vtu file is missing DataArray {}",
                name.unwrap_or("<points>")
            ))
        })?;
    match array.attribute("format") {
        Some("ascii") | None => Ok(array),
        Some(format) => Err(LaminaError::Input(format!(
            "vtu DataArray format '{format}' is not supported (expected ascii)"
        ))),
    }
}

fn vtu_numbers<T: std::str::FromStr>(array: roxmltree::Node) -> Result<Vec<T>> {
    parse_numbers(array.text().unwrap_or_default(), "vtu DataArray")
}

/// Parses a VTK XML unstructured grid with ASCII data arrays
///
/// Only triangle (5) and quad (9) cells are kept; other cells are skipped.
///
/// # Arguments
/// * `contents` - The text of the .vtu file
///
/// # Returns
/// A tuple with the parsed nodes and the parsed elements, in that order
pub fn parse_vtu(contents: &str) -> Result<(Vec<Point2>, Vec<Vec<usize>>)> {
    let doc = roxmltree::Document::parse(contents)
        .map_err(|err| LaminaError::Input(format!("malformed vtu xml: {err}")))?;

    let find = |tag: &str| {
        doc.descendants()
            .find(|n| n.tag_name().name() == tag)
            .ok_or_else(|| LaminaError::Input(format!("vtu file has no {tag} element")))
    };
    let points = find("Points")?;
    let cells = find("Cells")?;

    let points_array = vtu_array(points, None)?;
    let components: usize = points_array
        .attribute("NumberOfComponents")
        .unwrap_or("3")
        .parse()
        .map_err(|_| LaminaError::Input("bad NumberOfComponents on vtu points".to_owned()))?;
    if components < 2 {
        return Err(LaminaError::Input("vtu points need at least 2 components".to_owned()));
    }
    let coordinates: Vec<f64> = vtu_numbers(points_array)?;
    if coordinates.len() % components != 0 {
        return Err(LaminaError::Input(format!(
            "vtu points hold {} values, not a multiple of {components} components",
            coordinates.len()
        )));
    }
    let nodes: Vec<Point2> = coordinates
        .chunks_exact(components)
        .map(|c| Point2::new(c[0], c[1]))
        .collect();

    if let Some(declared) = find("Piece")?.attribute("NumberOfPoints") {
        let declared: usize = declared
            .parse()
            .map_err(|_| LaminaError::Input(format!("bad NumberOfPoints '{declared}'")))?;
        if declared != nodes.len() {
            return Err(LaminaError::Input(format!(
                "vtu piece declares {declared} points but holds {}",
                nodes.len()
            )));
        }
    }

    let connectivity: Vec<usize> = vtu_numbers(vtu_array(cells, Some("connectivity"))?)?;
    let offsets: Vec<usize> = vtu_numbers(vtu_array(cells, Some("offsets"))?)?;
    let types: Vec<u8> = vtu_numbers(vtu_array(cells, Some("types"))?)?;

    if offsets.len() != types.len() {
        return Err(LaminaError::Input(format!(
            "vtu has {} offsets but {} cell types",
            offsets.len(),
            types.len()
        )));
    }

    let mut elements = Vec::new();
    let mut skipped: usize = 0;
    let mut start = 0;
    for (end, cell_type) in offsets.iter().zip(&types) {
        let cell = connectivity.get(start..*end).ok_or_else(|| {
            LaminaError::Input(format!("vtu cell offsets {start}..{end} exceed connectivity"))
        })?;
        start = *end;

        match [ElementKind::Triangle, ElementKind::Quadrilateral]
            .into_iter()
            .find(|k| k.vtk_cell_type() == *cell_type)
        {
            Some(kind) if cell.len() == kind.node_count() => elements.push(cell.to_vec()),
            _ => skipped += 1,
        }
    }

    if skipped > 0 {
        warn!("skipped {skipped} unsupported vtu cells");
    }

    Ok((nodes, elements))
}

/// Reads a mesh file into an unloaded, unsupported model of unit thickness
///
/// # Arguments
/// * `path` - A Gmsh `.msh` (4.1 ascii) or VTK `.vtu` file
/// * `youngs_modulus` - The modulus of elasticity of the model
/// * `poisson_ratio` - The poisson ratio for the model
///
/// # Returns
/// The model built from the triangle and quad cells of the file
pub fn import_mesh(path: &Path, youngs_modulus: f64, poisson_ratio: f64) -> Result<Model> {
    let contents = std::fs::read_to_string(path).map_err(|err| {
        LaminaError::Input(format!("unable to open mesh file {}: {err}", path.display()))
    })?;

    let (nodes, elements) = match path.extension().and_then(|e| e.to_str()) {
        Some("msh") => parse_gmsh(&contents)?,
        Some("vtu") => parse_vtu(&contents)?,
        _ => {
            return Err(LaminaError::Input(format!(
                "unrecognized mesh filetype {}",
                path.display()
            )))
        }
    };

    info!(
        "loaded {} nodes and {} elements from {}",
        nodes.len(),
        elements.len(),
        path.display()
    );

    Model::unloaded(nodes, elements, 1.0, youngs_modulus, poisson_ratio)
}
