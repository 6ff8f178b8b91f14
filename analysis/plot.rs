//! ROC figure rendering.
//!
//! One PNG per evaluation, one panel per classifier: thin per-fold curves,
//! the bold mean curve with its AUC annotation, a shaded band of one
//! standard deviation around the mean TPR, and the chance diagonal.

use std::path::Path;

use itertools::izip;
use plotters::prelude::*;
use thiserror::Error;

use crate::pipeline::ClassifierReport;

#[derive(Debug, Error)]
pub enum PlotError {
    #[error("figure rendering failed: {0}")]
    Draw(String),
}

fn draw_err<E: std::fmt::Display>(e: E) -> PlotError {
    PlotError::Draw(e.to_string())
}

const PANEL_WIDTH: u32 = 640;
const PANEL_HEIGHT: u32 = 480;

/// Render the ROC figure for all classifier reports into one PNG.
pub fn roc_figure(path: &Path, reports: &[ClassifierReport]) -> Result<(), PlotError> {
    let cols = reports.len().min(2).max(1);
    let rows = reports.len().div_ceil(cols).max(1);
    let size = (PANEL_WIDTH * cols as u32, PANEL_HEIGHT * rows as u32);

    let root = BitMapBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE).map_err(draw_err)?;

    let areas = root.split_evenly((rows, cols));
    for (area, report) in areas.iter().zip(reports.iter()) {
        draw_panel(area, report)?;
    }
    root.present().map_err(draw_err)?;
    log::info!("wrote ROC figure to '{}'", path.display());
    Ok(())
}

fn draw_panel(
    area: &DrawingArea<BitMapBackend<'_>, plotters::coord::Shift>,
    report: &ClassifierReport,
) -> Result<(), PlotError> {
    let caption = match &report.aggregate {
        Some(agg) => format!(
            "{} (AUC = {:.2} \u{00b1} {:.2})",
            report.kind.label(),
            agg.mean_curve_auc,
            agg.std_auc
        ),
        None => format!("{} (no valid folds)", report.kind.label()),
    };

    let mut chart = ChartBuilder::on(area)
        .caption(caption, ("sans-serif", 22))
        .margin(12)
        .x_label_area_size(36)
        .y_label_area_size(44)
        .build_cartesian_2d(0f64..1f64, 0f64..1.02f64)
        .map_err(draw_err)?;
    chart
        .configure_mesh()
        .x_desc("False positive rate")
        .y_desc("True positive rate")
        .disable_mesh()
        .draw()
        .map_err(draw_err)?;

    // Chance diagonal.
    chart
        .draw_series(LineSeries::new(
            [(0.0, 0.0), (1.0, 1.0)],
            RED.mix(0.6).stroke_width(1),
        ))
        .map_err(draw_err)?
        .label("chance")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 16, y)], RED.mix(0.6)));

    for curve in &report.fold_curves {
        chart
            .draw_series(LineSeries::new(
                curve.fpr.iter().zip(curve.tpr.iter()).map(|(&x, &y)| (x, y)),
                BLACK.mix(0.2).stroke_width(1),
            ))
            .map_err(draw_err)?;
    }

    if let Some(agg) = &report.aggregate {
        // One standard deviation around the mean TPR, clamped to [0, 1].
        let upper = izip!(&agg.grid, &agg.mean_tpr, &agg.std_tpr)
            .map(|(&x, &m, &s)| (x, (m + s).min(1.0)));
        let mut lower: Vec<(f64, f64)> = izip!(&agg.grid, &agg.mean_tpr, &agg.std_tpr)
            .map(|(&x, &m, &s)| (x, (m - s).max(0.0)))
            .collect();
        lower.reverse();
        let band: Vec<(f64, f64)> = upper.chain(lower).collect();
        chart
            .draw_series(std::iter::once(Polygon::new(band, BLUE.mix(0.15))))
            .map_err(draw_err)?;

        chart
            .draw_series(LineSeries::new(
                agg.grid
                    .iter()
                    .zip(agg.mean_tpr.iter())
                    .map(|(&x, &y)| (x, y)),
                BLUE.stroke_width(3),
            ))
            .map_err(draw_err)?
            .label(format!("mean ROC over {} folds", agg.n_folds))
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 16, y)], BLUE.stroke_width(3)));
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::LowerRight)
        .background_style(WHITE.mix(0.85))
        .border_style(BLACK.mix(0.4))
        .draw()
        .map_err(draw_err)?;
    Ok(())
}
