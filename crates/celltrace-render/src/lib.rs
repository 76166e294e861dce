//! Headless celltrace rendering: per-frame track overlays and the
//! area-over-time QA scatter. Output is SVG text; rasterizing onto the
//! original image stack is left to external tools.

use celltrace_protocol::{AreaPoint, FrameOverlay};
use serde::{Deserialize, Serialize};
use svg::Document;
use svg::node::element::{Circle, Image, Line, Polyline, Rectangle, Text};

const PLOT_W: f32 = 1200.0;
const PLOT_H: f32 = 800.0;
const PLOT_LEFT: f32 = 100.0;
const PLOT_RIGHT: f32 = PLOT_W - 40.0;
const PLOT_TOP: f32 = 70.0;
const PLOT_BOTTOM: f32 = PLOT_H - 80.0;
const TICKS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayCanvas {
    pub width: f32,
    pub height: f32,
    /// Image drawn underneath the trails, typically one page of the
    /// segmentation stack exported as PNG.
    pub background_href: Option<String>,
    pub stroke_width: f32,
    pub opacity: f32,
}

impl Default for OverlayCanvas {
    fn default() -> Self {
        Self {
            width: 2048.0,
            height: 2044.0,
            background_href: None,
            stroke_width: 2.0,
            opacity: 0.8,
        }
    }
}

fn polyline_points(points: &[celltrace_protocol::OverlayPoint]) -> String {
    points
        .iter()
        .map(|p| format!("{:.2},{:.2}", p.x, p.y))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn export_overlay_svg(overlay: &FrameOverlay, canvas: &OverlayCanvas) -> String {
    let mut doc = Document::new()
        .set("viewBox", (0, 0, canvas.width, canvas.height))
        .set("width", canvas.width)
        .set("height", canvas.height);

    doc = match &canvas.background_href {
        Some(href) => doc.add(
            Image::new()
                .set("href", href.as_str())
                .set("x", 0)
                .set("y", 0)
                .set("width", canvas.width)
                .set("height", canvas.height),
        ),
        None => doc.add(
            Rectangle::new()
                .set("x", 0)
                .set("y", 0)
                .set("width", canvas.width)
                .set("height", canvas.height)
                .set("fill", "#000000"),
        ),
    };

    for trail in &overlay.trails {
        if trail.points.len() < 2 {
            continue;
        }
        doc = doc.add(
            Polyline::new()
                .set("points", polyline_points(&trail.points))
                .set("fill", "none")
                .set("stroke", trail.color.as_str())
                .set("stroke-width", canvas.stroke_width)
                .set("stroke-linejoin", "round")
                .set("stroke-linecap", "round")
                .set("opacity", canvas.opacity)
                .set("data-cell-id", trail.cell_id),
        );
    }

    doc = doc.add(
        Text::new(format!("frame {}", overlay.frame))
            .set("x", 16)
            .set("y", 36)
            .set("font-family", "monospace")
            .set("font-size", 28)
            .set("fill", "#ffffff"),
    );

    doc.to_string()
}

fn value_range(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    values
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

fn scale(value: f64, (min, max): (f64, f64), lo: f32, hi: f32) -> f32 {
    let span = (max - min).max(1e-9);
    lo + ((value - min) / span) as f32 * (hi - lo)
}

/// Area over time, one dot per cell instance, colored per cell.
pub fn export_area_time_svg(points: &[AreaPoint]) -> String {
    let finite = || {
        points
            .iter()
            .filter(|p| p.time_hr.is_finite() && p.area_um.is_finite())
    };
    let x_range = value_range(finite().map(|p| p.time_hr)).unwrap_or((0.0, 1.0));
    let y_range = value_range(finite().map(|p| p.area_um))
        .map(|(_, hi)| (0.0, hi.max(1e-9)))
        .unwrap_or((0.0, 1.0));

    let mut doc = Document::new()
        .set("viewBox", (0, 0, PLOT_W, PLOT_H))
        .set("width", PLOT_W)
        .set("height", PLOT_H)
        .add(
            Rectangle::new()
                .set("x", 0)
                .set("y", 0)
                .set("width", PLOT_W)
                .set("height", PLOT_H)
                .set("fill", "#ffffff"),
        )
        .add(
            Text::new(format!("Area (um) vs Time (hr), {} instance(s)", points.len()))
                .set("x", PLOT_LEFT)
                .set("y", 40)
                .set("font-family", "Helvetica, Arial, sans-serif")
                .set("font-size", 20)
                .set("fill", "#202020"),
        )
        .add(
            Line::new()
                .set("x1", PLOT_LEFT)
                .set("y1", PLOT_BOTTOM)
                .set("x2", PLOT_RIGHT)
                .set("y2", PLOT_BOTTOM)
                .set("stroke", "#202020")
                .set("stroke-width", 1.2),
        )
        .add(
            Line::new()
                .set("x1", PLOT_LEFT)
                .set("y1", PLOT_TOP)
                .set("x2", PLOT_LEFT)
                .set("y2", PLOT_BOTTOM)
                .set("stroke", "#202020")
                .set("stroke-width", 1.2),
        );

    for i in 0..=TICKS {
        let f = i as f64 / TICKS as f64;
        let t = x_range.0 + f * (x_range.1 - x_range.0);
        let a = y_range.0 + f * (y_range.1 - y_range.0);
        let x = scale(t, x_range, PLOT_LEFT, PLOT_RIGHT);
        let y = scale(a, y_range, PLOT_BOTTOM, PLOT_TOP);
        doc = doc
            .add(
                Text::new(format!("{t:.2}"))
                    .set("x", x)
                    .set("y", PLOT_BOTTOM + 22.0)
                    .set("text-anchor", "middle")
                    .set("font-family", "monospace")
                    .set("font-size", 12)
                    .set("fill", "#374151"),
            )
            .add(
                Text::new(format!("{a:.2}"))
                    .set("x", PLOT_LEFT - 10.0)
                    .set("y", y + 4.0)
                    .set("text-anchor", "end")
                    .set("font-family", "monospace")
                    .set("font-size", 12)
                    .set("fill", "#374151"),
            );
    }

    for p in finite() {
        doc = doc.add(
            Circle::new()
                .set("cx", scale(p.time_hr, x_range, PLOT_LEFT, PLOT_RIGHT))
                .set("cy", scale(p.area_um, y_range, PLOT_BOTTOM, PLOT_TOP))
                .set("r", 4)
                .set("fill", p.color.as_str())
                .set("stroke", "#000000")
                .set("stroke-width", 0.75),
        );
    }

    doc.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use celltrace_protocol::{OverlayPoint, TrackTrail};

    fn trail(cell_id: u32, n: usize) -> TrackTrail {
        TrackTrail {
            cell_id,
            color: "#ff0000".to_string(),
            points: (0..n)
                .map(|i| OverlayPoint {
                    frame: i as i64 + 1,
                    x: 10.0 * i as f64,
                    y: 5.0,
                })
                .collect(),
        }
    }

    #[test]
    fn test_export_overlay_svg_draws_multi_point_trails_only() {
        let overlay = FrameOverlay {
            frame: 7,
            trails: vec![trail(1, 3), trail(2, 1)],
        };
        let svg = export_overlay_svg(&overlay, &OverlayCanvas::default());
        assert!(svg.contains("<svg"));
        assert!(svg.contains("frame 7"));
        assert_eq!(svg.matches("<polyline").count(), 1);
        assert!(svg.contains("0.00,5.00 10.00,5.00 20.00,5.00"));
    }

    #[test]
    fn test_export_overlay_svg_background_image() {
        let canvas = OverlayCanvas {
            background_href: Some("frame_0001.png".to_string()),
            ..OverlayCanvas::default()
        };
        let overlay = FrameOverlay {
            frame: 1,
            trails: vec![],
        };
        let svg = export_overlay_svg(&overlay, &canvas);
        assert!(svg.contains("frame_0001.png"));
        assert!(svg.contains("<image"));
    }

    #[test]
    fn test_export_area_time_svg_skips_nan() {
        let points = vec![
            AreaPoint {
                cell_id: 1,
                time_hr: 0.0,
                area_um: 1.5,
                color: "#00ff00".to_string(),
            },
            AreaPoint {
                cell_id: 1,
                time_hr: 0.25,
                area_um: f64::NAN,
                color: "#00ff00".to_string(),
            },
        ];
        let svg = export_area_time_svg(&points);
        assert!(svg.contains("2 instance(s)"));
        assert_eq!(svg.matches("<circle").count(), 1);
    }

    #[test]
    fn test_export_area_time_svg_empty() {
        let svg = export_area_time_svg(&[]);
        assert!(svg.contains("<svg"));
        assert_eq!(svg.matches("<circle").count(), 0);
    }
}
