use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use log::info;
use nalgebra::{DVector, Vector3};
use quick_xml::{
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
    Writer,
};
use rayon::prelude::*;

use crate::{
    assembly::strain_displacement_matrix,
    datatypes::{Field, Solution, Vec2, DOF},
    error::{LaminaError, Result},
    model::Model,
};

/// Gathers the local displacement vector of element `e`
fn element_displacements(model: &Model, displacements: &[Vec2], e: usize) -> DVector<f64> {
    DVector::from_iterator(
        model.kind().dof_count(),
        model
            .element_dofs(e)
            .iter()
            .map(|dof| displacements[dof / DOF][dof % DOF]),
    )
}

fn check_displacements(model: &Model, displacements: &[Vec2]) -> Result<()> {
    if displacements.len() != model.n_nodes() {
        return Err(LaminaError::InconsistentMesh(format!(
            "displacement field has {} entries but the mesh has {} nodes",
            displacements.len(),
            model.n_nodes()
        )));
    }
    Ok(())
}

/// Calculates the strain energy of every element
///
/// Uses the cached unit-thickness stiffness, so the result is energy per unit
/// thickness: `0.5 * u_e^T k0_e u_e`.
///
/// # Arguments
/// * `model` - The solved model
/// * `displacements` - One displacement vector per node
///
/// # Returns
/// One energy per element
pub fn element_strain_energies(model: &Model, displacements: &[Vec2]) -> Result<Vec<f64>> {
    check_displacements(model, displacements)?;

    Ok((0..model.n_elements())
        .into_par_iter()
        .map(|e| {
            let u = element_displacements(model, displacements, e);
            0.5 * u.dot(&(model.unit_stiffness(e) * &u))
        })
        .collect())
}

/// Calculates the strain `[exx, eyy, gxy]` at the centroid of every element
pub fn element_strains(model: &Model, displacements: &[Vec2]) -> Result<Vec<Vector3<f64>>> {
    check_displacements(model, displacements)?;
    let centroid = model.kind().reference_centroid();

    (0..model.n_elements())
        .into_par_iter()
        .map(|e| {
            let (d, _) =
                strain_displacement_matrix(model.kind(), &model.element_coords(e), centroid, e)?;
            Ok(d * element_displacements(model, displacements, e))
        })
        .collect()
}

/// Calculates the stress `[sxx, syy, txy]` at the centroid of every element
pub fn element_stresses(model: &Model, displacements: &[Vec2]) -> Result<Vec<Vector3<f64>>> {
    let constitutive = model.constitutive();
    Ok(element_strains(model, displacements)?
        .into_iter()
        .map(|strain| constitutive * strain)
        .collect())
}

/// Von Mises equivalent of an in-plane stress state
pub fn von_mises(stress: &Vector3<f64>) -> f64 {
    let (sx, sy, txy) = (stress[0], stress[1], stress[2]);
    f64::sqrt(sx * sx - sx * sy + sy * sy + 3.0 * txy * txy)
}

/// Writes simulation results to two CSV files
///
/// # Arguments
/// * `model` - The solved model
/// * `solution` - Displacements and forces from the solve
/// * `nodes_output` - The path of the output nodes csv
/// * `elements_output` - The path of the output elements csv
pub fn csv_output(
    model: &Model,
    solution: &Solution,
    nodes_output: &Path,
    elements_output: &Path,
) -> Result<()> {
    let areas = model.areas();
    let energies = element_strain_energies(model, &solution.displacements)?;
    let stresses = element_stresses(model, &solution.displacements)?;

    let mut nodes_file = BufWriter::new(File::create(nodes_output)?);
    writeln!(nodes_file, "x,y,ux,uy,fx,fy")?;
    for ((node, u), f) in model
        .nodes()
        .iter()
        .zip(&solution.displacements)
        .zip(&solution.forces)
    {
        writeln!(
            nodes_file,
            "{x},{y},{ux},{uy},{fx},{fy}",
            x = node.x,
            y = node.y,
            ux = u.x,
            uy = u.y,
            fx = f.x,
            fy = f.y,
        )?;
    }
    nodes_file.flush()?;

    let mut elements_file = BufWriter::new(File::create(elements_output)?);
    let node_columns: Vec<String> = (0..model.kind().node_count())
        .map(|i| format!("n{i}"))
        .collect();
    writeln!(
        elements_file,
        "{},area,strain_energy,von_mises",
        node_columns.join(",")
    )?;
    for (e, element) in model.elements().enumerate() {
        let indices: Vec<String> = element.iter().map(|n| n.to_string()).collect();
        writeln!(
            elements_file,
            "{},{},{},{}",
            indices.join(","),
            areas[e],
            energies[e],
            von_mises(&stresses[e])
        )?;
    }
    elements_file.flush()?;

    info!(
        "wrote output to {} and {}",
        nodes_output.display(),
        elements_output.display()
    );

    Ok(())
}

fn write_data_array<W: Write>(
    writer: &mut Writer<W>,
    name: Option<&str>,
    data_type: &str,
    components: usize,
    body: &str,
) -> Result<()> {
    let mut start = BytesStart::new("DataArray");
    start.push_attribute(("type", data_type));
    if let Some(name) = name {
        start.push_attribute(("Name", name));
    }
    if components > 1 {
        start.push_attribute(("NumberOfComponents", components.to_string().as_str()));
    }
    start.push_attribute(("format", "ascii"));
    writer.write_event(Event::Start(start))?;
    writer.write_event(Event::Text(BytesText::new(body)))?;
    writer.write_event(Event::End(BytesEnd::new("DataArray")))?;
    Ok(())
}

fn write_fields<W: Write>(
    writer: &mut Writer<W>,
    section: &str,
    fields: &[(&str, Field)],
    expected_len: usize,
) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(section)))?;
    for (name, field) in fields {
        if field.len() != expected_len {
            return Err(LaminaError::Export(format!(
                "{section} field '{name}' has {} values, expected {expected_len}",
                field.len()
            )));
        }
        match field {
            Field::Scalar(values) => {
                let body: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write_data_array(writer, Some(*name), "Float64", 1, &body.join(" "))?;
            }
            Field::Vector(values) => {
                let body: Vec<String> = values
                    .iter()
                    .map(|v| format!("{} {} 0", v.x, v.y))
                    .collect();
                write_data_array(writer, Some(*name), "Float64", 3, &body.join(" "))?;
            }
        }
    }
    writer.write_event(Event::End(BytesEnd::new(section)))?;
    Ok(())
}

/// Serializes the model geometry and attached fields as a VTK XML unstructured grid
///
/// # Arguments
/// * `model` - The model whose nodes and elements are written
/// * `node_fields` - Named per-node data
/// * `element_fields` - Named per-element data
///
/// # Returns
/// The document as a string
pub fn vtu_string(
    model: &Model,
    node_fields: &[(&str, Field)],
    element_fields: &[(&str, Field)],
) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", None, None)))?;

    let mut root = BytesStart::new("VTKFile");
    root.push_attribute(("type", "UnstructuredGrid"));
    root.push_attribute(("version", "0.1"));
    root.push_attribute(("byte_order", "LittleEndian"));
    writer.write_event(Event::Start(root))?;
    writer.write_event(Event::Start(BytesStart::new("UnstructuredGrid")))?;

    let mut piece = BytesStart::new("Piece");
    piece.push_attribute(("NumberOfPoints", model.n_nodes().to_string().as_str()));
    piece.push_attribute(("NumberOfCells", model.n_elements().to_string().as_str()));
    writer.write_event(Event::Start(piece))?;

    write_fields(&mut writer, "PointData", node_fields, model.n_nodes())?;
    write_fields(&mut writer, "CellData", element_fields, model.n_elements())?;

    writer.write_event(Event::Start(BytesStart::new("Points")))?;
    let points: Vec<String> = model.nodes().iter().map(|p| format!("{} {} 0", p.x, p.y)).collect();
    write_data_array(&mut writer, None, "Float64", 3, &points.join(" "))?;
    writer.write_event(Event::End(BytesEnd::new("Points")))?;

    let n = model.kind().node_count();
    let connectivity: Vec<String> = model.connectivity().iter().map(|i| i.to_string()).collect();
    let offsets: Vec<String> = (1..=model.n_elements()).map(|e| (e * n).to_string()).collect();
    let types = vec![model.kind().vtk_cell_type().to_string(); model.n_elements()];

    writer.write_event(Event::Start(BytesStart::new("Cells")))?;
    write_data_array(&mut writer, Some("connectivity"), "Int64", 1, &connectivity.join(" "))?;
    write_data_array(&mut writer, Some("offsets"), "Int64", 1, &offsets.join(" "))?;
    write_data_array(&mut writer, Some("types"), "UInt8", 1, &types.join(" "))?;
    writer.write_event(Event::End(BytesEnd::new("Cells")))?;

    writer.write_event(Event::End(BytesEnd::new("Piece")))?;
    writer.write_event(Event::End(BytesEnd::new("UnstructuredGrid")))?;
    writer.write_event(Event::End(BytesEnd::new("VTKFile")))?;

    String::from_utf8(writer.into_inner())
        .map_err(|err| LaminaError::Export(format!("generated document is not utf-8: {err}")))
}

/// Writes the model and fields to a `.vtu` file
pub fn export_vtu(
    model: &Model,
    path: &Path,
    node_fields: &[(&str, Field)],
    element_fields: &[(&str, Field)],
) -> Result<()> {
    let document = vtu_string(model, node_fields, element_fields)?;
    std::fs::write(path, document)?;
    info!("wrote {} cells to {}", model.n_elements(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::{Constraint, Point2};
    use approx::assert_relative_eq;

    fn loaded_square() -> Model {
        let nodes = vec![
            Point2::new(0.0, 0.0),
            Point2::new(2.0, 0.0),
            Point2::new(2.0, 1.0),
            Point2::new(0.0, 1.0),
        ];
        let elements = vec![vec![0, 1, 2], vec![2, 3, 0]];
        let mut model = Model::unloaded(nodes, elements, 0.5, 200.0, 0.25).unwrap();
        model.fix(0, Constraint::FIXED).unwrap();
        model.fix(3, Constraint { x: true, y: false }).unwrap();
        model.add_force(1, Vec2::new(1.0, 0.0)).unwrap();
        model.add_force(2, Vec2::new(1.0, -0.5)).unwrap();
        model
    }

    #[test]
    fn strain_energy_matches_external_work() {
        let model = loaded_square();
        let solution = model.solve().unwrap();
        let energies = model.element_strain_energies(&solution.displacements).unwrap();
        let total: f64 = energies.iter().sum::<f64>() * 0.5; // thickness
        let work = 0.5 * solution.displacement_vector().dot(&model.force_vector());
        assert_relative_eq!(total, work, epsilon = 1e-12);
        assert!(energies.iter().all(|w| *w >= 0.0));
    }

    #[test]
    fn uniform_stretch_gives_uniform_strain() {
        let model = loaded_square();
        let displacements: Vec<Vec2> = model
            .nodes()
            .iter()
            .map(|p| Vec2::new(1e-3 * p.x, -2e-4 * p.y + 5e-4 * p.x))
            .collect();
        let strains = element_strains(&model, &displacements).unwrap();
        for strain in &strains {
            assert_relative_eq!(strain[0], 1e-3, epsilon = 1e-15);
            assert_relative_eq!(strain[1], -2e-4, epsilon = 1e-15);
            assert_relative_eq!(strain[2], 5e-4, epsilon = 1e-15);
        }
        let stresses = element_stresses(&model, &displacements).unwrap();
        let expected = model.constitutive() * strains[0];
        assert_relative_eq!(stresses[1], expected, epsilon = 1e-12);
    }

    #[test]
    fn von_mises_reference_states() {
        assert_relative_eq!(von_mises(&Vector3::new(100.0, 0.0, 0.0)), 100.0);
        assert_relative_eq!(von_mises(&Vector3::new(50.0, 50.0, 0.0)), 50.0);
        assert_relative_eq!(von_mises(&Vector3::new(0.0, 0.0, 10.0)), 10.0 * 3.0_f64.sqrt());
    }

    #[test]
    fn rejects_misaligned_displacements() {
        let model = loaded_square();
        assert!(matches!(
            element_strain_energies(&model, &[Vec2::zeros(); 2]),
            Err(LaminaError::InconsistentMesh(_))
        ));
    }

    #[test]
    fn vtu_contains_cells_and_fields() {
        let model = loaded_square();
        let solution = model.solve().unwrap();
        let energies = model.element_strain_energies(&solution.displacements).unwrap();
        let document = vtu_string(
            &model,
            &[("displacement", Field::Vector(&solution.displacements))],
            &[("strain_energy", Field::Scalar(&energies))],
        )
        .unwrap();

        assert!(document.contains("NumberOfPoints=\"4\""));
        assert!(document.contains("NumberOfCells=\"2\""));
        assert!(document.contains("Name=\"displacement\""));
        assert!(document.contains("Name=\"strain_energy\""));
        assert!(document.contains("5 5"));
    }

    #[test]
    fn vtu_rejects_misaligned_field() {
        let model = loaded_square();
        let result = vtu_string(&model, &[("bad", Field::Scalar(&[1.0]))], &[]);
        assert!(matches!(result, Err(LaminaError::Export(_))));
    }

    #[test]
    fn csv_output_writes_one_row_per_entity() {
        let model = loaded_square();
        let solution = model.solve().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let nodes_path = dir.path().join("nodes.csv");
        let elements_path = dir.path().join("elements.csv");
        csv_output(&model, &solution, &nodes_path, &elements_path).unwrap();

        let nodes = std::fs::read_to_string(nodes_path).unwrap();
        let elements = std::fs::read_to_string(elements_path).unwrap();
        assert_eq!(nodes.lines().count(), 5);
        assert_eq!(elements.lines().count(), 3);
        assert!(elements.starts_with("n0,n1,n2,area,strain_energy,von_mises"));
    }
}
