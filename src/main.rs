use std::path::PathBuf;

use clap::Parser;
use log::{error, info};

use lamina::{
    input, plot,
    plot::PlotOptions,
    post_processor::{self, von_mises},
    Field, LaminaError, SolverOptions,
};

/// Linear static plane analysis of triangle and quad meshes
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Case file (json) with metadata, geometry and boundary conditions
    case: PathBuf,

    /// Write the mesh and results as a VTK unstructured grid
    #[arg(long)]
    vtu: Option<PathBuf>,

    /// Write nodes.csv and elements.csv into this directory
    #[arg(long)]
    csv_dir: Option<PathBuf>,

    /// Render the deformed mesh as an SVG
    #[arg(long)]
    svg: Option<PathBuf>,

    /// Displacement magnification for the SVG plot
    #[arg(long, default_value_t = 1.0)]
    scale: f64,

    /// Relative LU pivot size below which the system counts as singular
    #[arg(long, default_value_t = lamina::solver::DEFAULT_PIVOT_TOLERANCE)]
    pivot_tolerance: f64,
}

fn run(cli: &Cli) -> Result<(), LaminaError> {
    let case = input::load_case(&cli.case)?;
    let model = input::build_model(&case)?;

    let options = SolverOptions {
        pivot_tolerance: cli.pivot_tolerance,
    };
    let solution = model.solve_with(&options)?;

    let energies = model.element_strain_energies(&solution.displacements)?;
    let stresses = post_processor::element_stresses(&model, &solution.displacements)?;
    let equivalent: Vec<f64> = stresses.iter().map(von_mises).collect();

    if let Some((node, magnitude)) = solution.max_displacement() {
        info!("max displacement {magnitude:.6e} at node {node}");
    }
    let total_energy: f64 = energies
        .iter()
        .zip(model.thickness())
        .map(|(w, t)| w * t)
        .sum();
    info!("total strain energy {total_energy:.6e}");

    if let Some(path) = &cli.vtu {
        post_processor::export_vtu(
            &model,
            path,
            &[
                ("displacement", Field::Vector(&solution.displacements)),
                ("force", Field::Vector(&solution.forces)),
            ],
            &[
                ("area", Field::Scalar(&model.areas())),
                ("strain_energy", Field::Scalar(&energies)),
                ("von_mises", Field::Scalar(&equivalent)),
            ],
        )?;
    }

    if let Some(dir) = &cli.csv_dir {
        std::fs::create_dir_all(dir)?;
        post_processor::csv_output(
            &model,
            &solution,
            &dir.join("nodes.csv"),
            &dir.join("elements.csv"),
        )?;
    }

    if let Some(path) = &cli.svg {
        let plot_options = PlotOptions {
            displacements: Some(solution.displacements.as_slice()),
            scale: cli.scale,
            element_property: Some(equivalent.as_slice()),
            ..PlotOptions::default()
        };
        plot::write_svg(&model, &plot_options, path)?;
    }

    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if let Err(err) = run(&cli) {
        error!("{err}");
        std::process::exit(err.exit_code());
    }
}
