//! Point sets for the tracking overlay: for each frame, the recent path of
//! every cell, each cell in its own stable color.

use crate::lineage_annotate::CellTable;
use crate::lineage_seed::CellId;
use crate::record_store::RecordStore;
use celltrace_protocol::{AreaPoint, FrameOverlay, OverlayPoint, TrackTrail};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

const GOLDEN_RATIO_CONJUGATE: f64 = 0.618_033_988_749_895;

/// Frames drawn around the current one: `trail` before, `lead` after, and at
/// most the last `max_points` of those.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayWindow {
    pub trail: i64,
    pub lead: i64,
    pub max_points: usize,
}

impl Default for OverlayWindow {
    fn default() -> Self {
        Self {
            trail: 4,
            lead: 0,
            max_points: 5,
        }
    }
}

fn hsl_to_hex(h: f64, s: f64, l: f64) -> String {
    let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let hp = h * 6.0;
    let x = c * (1.0 - (hp % 2.0 - 1.0).abs());
    let (r, g, b) = match hp as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = l - c / 2.0;
    let byte = |v: f64| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    format!("#{:02x}{:02x}{:02x}", byte(r), byte(g), byte(b))
}

/// Same cell id, same color, on every run.
pub fn track_color(cell_id: CellId) -> String {
    let hue = (cell_id as f64 * GOLDEN_RATIO_CONJUGATE).fract();
    hsl_to_hex(hue, 0.75, 0.55)
}

/// Every tracked position per cell, in track order.
pub fn track_trails(store: &RecordStore, cells: &CellTable) -> Vec<TrackTrail> {
    cells
        .rows
        .iter()
        .chunk_by(|row| row.cell_id)
        .into_iter()
        .map(|(cell_id, rows)| TrackTrail {
            cell_id,
            color: track_color(cell_id),
            points: rows
                .map(|row| {
                    let record = store.get(row.record);
                    OverlayPoint {
                        frame: record.frame,
                        x: record.measurements.center_x,
                        y: record.measurements.center_y,
                    }
                })
                .collect(),
        })
        .collect()
}

pub fn frame_overlay(trails: &[TrackTrail], frame: i64, window: &OverlayWindow) -> FrameOverlay {
    let from = frame - window.trail;
    let to = frame + window.lead;
    let trails = trails
        .iter()
        .filter_map(|trail| {
            let visible: Vec<OverlayPoint> = trail
                .points
                .iter()
                .filter(|p| p.frame >= from && p.frame <= to)
                .filter(|p| p.x.is_finite() && p.y.is_finite())
                .cloned()
                .collect();
            if visible.len() < 2 {
                return None;
            }
            let skip = visible.len().saturating_sub(window.max_points);
            Some(TrackTrail {
                cell_id: trail.cell_id,
                color: trail.color.clone(),
                points: visible.into_iter().skip(skip).collect(),
            })
        })
        .collect();
    FrameOverlay { frame, trails }
}

pub fn frame_range(store: &RecordStore) -> Option<(i64, i64)> {
    store
        .records()
        .iter()
        .map(|r| r.frame)
        .minmax()
        .into_option()
}

pub fn area_points(store: &RecordStore, cells: &CellTable) -> Vec<AreaPoint> {
    cells
        .rows
        .iter()
        .map(|row| AreaPoint {
            cell_id: row.cell_id,
            time_hr: row.time_hr,
            area_um: store.get(row.record).metrics.area_um,
            color: track_color(row.cell_id),
        })
        .collect()
}
