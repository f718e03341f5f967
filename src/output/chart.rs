//! Learning-curve chart
//!
//! Renders accuracy and loss per epoch, training and validation, side by side
//! into one PNG.

use std::error::Error;
use std::path::Path;
use std::sync::OnceLock;

use plotters::prelude::*;
use plotters::style::register_font;
use tracing::info;

use super::ensure_parent;
use crate::error::{IdsError, Result};
use crate::ml::TrainingHistory;

/// Default chart path, relative to the working directory
pub const DEFAULT_CHART_PATH: &str = "accuracy_plot.png";

const WIDTH: u32 = 1200;
const HEIGHT: u32 = 480;

const FONT_FAMILY: &str = "sans-serif";
static FONT_BYTES: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");
static FONT_REGISTERED: OnceLock<bool> = OnceLock::new();

/// Make the embedded font available to plotters under [`FONT_FAMILY`]
fn register_chart_font(path: &Path) -> Result<()> {
    let registered = *FONT_REGISTERED
        .get_or_init(|| register_font(FONT_FAMILY, FontStyle::Normal, FONT_BYTES).is_ok());
    if registered {
        Ok(())
    } else {
        Err(IdsError::export(path, "embedded chart font could not be loaded"))
    }
}

type Series = Vec<(f32, f32)>;

fn series(history: &TrainingHistory, pick: impl Fn(&crate::ml::EpochMetrics) -> Option<f32>) -> Series {
    history
        .epochs
        .iter()
        .filter_map(|e| pick(e).map(|v| (e.epoch as f32, v)))
        .collect()
}

/// Render the chart; `title` prefixes both panel captions
pub fn render_learning_curves(path: &Path, history: &TrainingHistory, title: Option<&str>) -> Result<()> {
    if history.is_empty() {
        return Err(IdsError::export(path, "no epochs to plot"));
    }
    register_chart_font(path)?;
    ensure_parent(path)?;
    draw(path, history, title).map_err(|e| IdsError::export(path, e))?;
    info!("Wrote learning curves to {}", path.display());
    Ok(())
}

fn draw(path: &Path, history: &TrainingHistory, title: Option<&str>) -> std::result::Result<(), Box<dyn Error>> {
    let root = BitMapBackend::new(path, (WIDTH, HEIGHT)).into_drawing_area();
    root.fill(&WHITE)?;
    let (left, right) = root.split_horizontally(WIDTH / 2);

    let prefix = title.map(|t| format!("{}: ", t)).unwrap_or_default();
    let x_max = history.len() as f32 + 1.0;

    let accuracy = series(history, |e| Some(e.accuracy));
    let val_accuracy = series(history, |e| e.val_accuracy);
    draw_panel(
        &left,
        &format!("{}Training and Validation Accuracy", prefix),
        "Accuracy",
        x_max,
        1.05,
        [("Accuracy", accuracy), ("Validation Accuracy", val_accuracy)],
    )?;

    let loss = series(history, |e| Some(e.loss));
    let val_loss = series(history, |e| e.val_loss);
    let loss_max = loss
        .iter()
        .chain(val_loss.iter())
        .map(|&(_, v)| v)
        .filter(|v| v.is_finite())
        .fold(0.0f32, f32::max)
        .max(1e-3)
        * 1.1;
    draw_panel(
        &right,
        &format!("{}Training and Validation Loss", prefix),
        "Loss",
        x_max,
        loss_max,
        [("Loss", loss), ("Validation Loss", val_loss)],
    )?;

    root.present()?;
    Ok(())
}

fn draw_panel(
    area: &DrawingArea<BitMapBackend<'_>, plotters::coord::Shift>,
    caption: &str,
    y_desc: &str,
    x_max: f32,
    y_max: f32,
    lines: [(&str, Series); 2],
) -> std::result::Result<(), Box<dyn Error>> {
    let mut chart = ChartBuilder::on(area)
        .caption(caption, (FONT_FAMILY, 20))
        .margin(12)
        .x_label_area_size(36)
        .y_label_area_size(48)
        .build_cartesian_2d(0f32..x_max, 0f32..y_max)?;

    chart
        .configure_mesh()
        .x_desc("Epoch")
        .y_desc(y_desc)
        .label_style((FONT_FAMILY, 14))
        .draw()?;

    let colors = [BLUE, RED];
    for ((label, points), color) in lines.into_iter().zip(colors) {
        if points.is_empty() {
            continue;
        }
        chart
            .draw_series(LineSeries::new(points, color.stroke_width(2)))?
            .label(label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .label_font((FONT_FAMILY, 14))
        .draw()?;
    Ok(())
}
