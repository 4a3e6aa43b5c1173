//! SVG rendering of a model and its solved fields.

use std::path::Path;

use log::info;
use quick_xml::{
    events::{BytesEnd, BytesStart, BytesText, Event},
    Writer,
};

use crate::{
    datatypes::{Point2, Vec2},
    error::{LaminaError, Result},
    model::Model,
};

const CANVAS: f64 = 800.0;
const MARGIN: f64 = 40.0;

/// What to draw on top of the mesh
#[derive(Debug, Clone)]
pub struct PlotOptions<'a> {
    /// Nodal displacements to deform the geometry by
    pub displacements: Option<&'a [Vec2]>,
    /// Displacement magnification
    pub scale: f64,
    /// Per node scalar; elements are shaded by the nodal average
    pub node_property: Option<&'a [f64]>,
    /// Per element scalar; elements are shaded directly
    pub element_property: Option<&'a [f64]>,
    pub node_labels: bool,
}

impl Default for PlotOptions<'_> {
    fn default() -> Self {
        PlotOptions {
            displacements: None,
            scale: 1.0,
            node_property: None,
            element_property: None,
            node_labels: false,
        }
    }
}

/// Maps model coordinates onto the canvas, flipping y
struct Viewport {
    min: Point2,
    zoom: f64,
    height: f64,
}

impl Viewport {
    fn fit(points: &[Point2]) -> Viewport {
        let mut min = Point2::new(f64::MAX, f64::MAX);
        let mut max = Point2::new(f64::MIN, f64::MIN);
        for p in points {
            min = min.inf(p);
            max = max.sup(p);
        }
        let extent = (max - min).max().max(f64::EPSILON);
        let zoom = (CANVAS - 2.0 * MARGIN) / extent;
        Viewport {
            min,
            zoom,
            height: (max.y - min.y) * zoom + 2.0 * MARGIN,
        }
    }

    fn map(&self, p: &Point2) -> (f64, f64) {
        (
            MARGIN + (p.x - self.min.x) * self.zoom,
            self.height - MARGIN - (p.y - self.min.y) * self.zoom,
        )
    }
}

/// Grayscale fill for a value within `[low, high]`; darker is larger
fn gray(value: f64, low: f64, high: f64) -> String {
    let t = if high > low { (value - low) / (high - low) } else { 0.0 };
    let level = (255.0 * (1.0 - t.clamp(0.0, 1.0))).round() as u8;
    format!("#{level:02x}{level:02x}{level:02x}")
}

fn range(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::MAX, f64::MIN), |(lo, hi), v| (lo.min(*v), hi.max(*v)))
}

fn check_len(what: &str, len: usize, expected: usize) -> Result<()> {
    if len != expected {
        return Err(LaminaError::InconsistentMesh(format!(
            "{what} has {len} entries, expected {expected}"
        )));
    }
    Ok(())
}

fn empty<W: std::io::Write>(
    writer: &mut Writer<W>,
    tag: &str,
    attributes: &[(&str, String)],
) -> Result<()> {
    let mut element = BytesStart::new(tag);
    for (key, value) in attributes {
        element.push_attribute((*key, value.as_str()));
    }
    writer.write_event(Event::Empty(element))?;
    Ok(())
}

/// Renders the (deformed) mesh with loads and supports as an SVG document
///
/// # Arguments
/// * `model` - The model to draw
/// * `options` - Displacement field and optional properties to shade by
///
/// # Returns
/// The SVG document
pub fn render_svg(model: &Model, options: &PlotOptions) -> Result<String> {
    if let Some(u) = options.displacements {
        check_len("displacement field", u.len(), model.n_nodes())?;
    }
    if let Some(p) = options.node_property {
        check_len("node property", p.len(), model.n_nodes())?;
    }
    if let Some(p) = options.element_property {
        check_len("element property", p.len(), model.n_elements())?;
    }

    let positions: Vec<Point2> = match options.displacements {
        Some(u) => model
            .nodes()
            .iter()
            .zip(u)
            .map(|(p, u)| p + u * options.scale)
            .collect(),
        None => model.nodes().to_vec(),
    };
    let view = Viewport::fit(&positions);

    // element shading, if any
    let shading: Option<Vec<f64>> = match (options.element_property, options.node_property) {
        (Some(values), _) => Some(values.to_vec()),
        (None, Some(values)) => Some(
            model
                .elements()
                .map(|e| e.iter().map(|n| values[*n]).sum::<f64>() / e.len() as f64)
                .collect(),
        ),
        (None, None) => None,
    };
    let (low, high) = shading.as_deref().map(range).unwrap_or((0.0, 0.0));

    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    let mut svg = BytesStart::new("svg");
    svg.push_attribute(("xmlns", "http://www.w3.org/2000/svg"));
    svg.push_attribute(("width", format!("{CANVAS}").as_str()));
    svg.push_attribute(("height", format!("{:.1}", view.height).as_str()));
    writer.write_event(Event::Start(svg))?;

    // elements
    for (e, element) in model.elements().enumerate() {
        let points: Vec<String> = element
            .iter()
            .map(|n| {
                let (x, y) = view.map(&positions[*n]);
                format!("{x:.2},{y:.2}")
            })
            .collect();
        let fill = match &shading {
            Some(values) => gray(values[e], low, high),
            None => "none".to_owned(),
        };
        empty(
            &mut writer,
            "polygon",
            &[
                ("points", points.join(" ")),
                ("fill", fill),
                ("stroke", "black".to_owned()),
                ("stroke-width", "1".to_owned()),
            ],
        )?;
    }

    // nodes
    for (i, p) in positions.iter().enumerate() {
        let (x, y) = view.map(p);
        empty(
            &mut writer,
            "circle",
            &[
                ("cx", format!("{x:.2}")),
                ("cy", format!("{y:.2}")),
                ("r", "1.5".to_owned()),
                ("fill", "black".to_owned()),
            ],
        )?;
        if options.node_labels {
            let mut label = BytesStart::new("text");
            label.push_attribute(("x", format!("{:.2}", x + 3.0).as_str()));
            label.push_attribute(("y", format!("{:.2}", y - 3.0).as_str()));
            label.push_attribute(("font-size", "10"));
            writer.write_event(Event::Start(label))?;
            writer.write_event(Event::Text(BytesText::new(&i.to_string())))?;
            writer.write_event(Event::End(BytesEnd::new("text")))?;
        }
    }

    // forces
    let arrow = 0.05 * (CANVAS - 2.0 * MARGIN);
    for (p, force) in positions.iter().zip(model.forces()) {
        let magnitude = force.norm();
        if magnitude <= 0.0 {
            continue;
        }
        let (x, y) = view.map(p);
        let (dx, dy) = (arrow * force.x / magnitude, -arrow * force.y / magnitude);
        empty(
            &mut writer,
            "line",
            &[
                ("x1", format!("{x:.2}")),
                ("y1", format!("{y:.2}")),
                ("x2", format!("{:.2}", x + dx)),
                ("y2", format!("{:.2}", y + dy)),
                ("stroke", "gray".to_owned()),
                ("stroke-width", "3".to_owned()),
            ],
        )?;
        empty(
            &mut writer,
            "circle",
            &[
                ("cx", format!("{:.2}", x + dx)),
                ("cy", format!("{:.2}", y + dy)),
                ("r", "3".to_owned()),
                ("fill", "gray".to_owned()),
            ],
        )?;
    }

    // constraints: '>' markers left of x-fixed nodes, '^' markers below y-fixed nodes
    let marker = 6.0;
    for (p, constraint) in positions.iter().zip(model.constraints()) {
        let (x, y) = view.map(p);
        if constraint.x {
            let points = format!(
                "{:.2},{:.2} {:.2},{:.2} {:.2},{:.2}",
                x - marker,
                y - marker / 2.0,
                x,
                y,
                x - marker,
                y + marker / 2.0
            );
            empty(&mut writer, "polygon", &[("points", points), ("fill", "gray".to_owned())])?;
        }
        if constraint.y {
            let points = format!(
                "{:.2},{:.2} {:.2},{:.2} {:.2},{:.2}",
                x - marker / 2.0,
                y + marker,
                x,
                y,
                x + marker / 2.0,
                y + marker
            );
            empty(&mut writer, "polygon", &[("points", points), ("fill", "gray".to_owned())])?;
        }
    }

    writer.write_event(Event::End(BytesEnd::new("svg")))?;

    String::from_utf8(writer.into_inner())
        .map_err(|err| LaminaError::Export(format!("generated svg is not utf-8: {err}")))
}

/// Renders the model and writes it to an `.svg` file
pub fn write_svg(model: &Model, options: &PlotOptions, path: &Path) -> Result<()> {
    std::fs::write(path, render_svg(model, options)?)?;
    info!("wrote plot to {}", path.display());
    Ok(())
}
