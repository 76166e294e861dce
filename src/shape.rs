use celltrace_protocol::Shape;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Raw pixel measurements of one segmented object.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurements {
    pub area_px: f64,
    pub major_axis: f64,
    pub minor_axis: f64,
    pub center_x: f64,
    pub center_y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShapeMetrics {
    pub area_um: f64,
    pub aspect_ratio: f64,
    pub shape: Shape,
}

impl Default for ShapeMetrics {
    fn default() -> Self {
        Self {
            area_um: f64::NAN,
            aspect_ratio: f64::NAN,
            shape: Shape::Disk,
        }
    }
}

impl ShapeMetrics {
    pub fn from_measurements(m: &Measurements, pixel_to_micron: f64) -> Self {
        let aspect_ratio = Self::aspect_ratio(m.major_axis, m.minor_axis);
        Self {
            area_um: m.area_px * pixel_to_micron * pixel_to_micron,
            aspect_ratio,
            shape: Shape::classify(aspect_ratio),
        }
    }

    /// A zero minor axis has no ratio; NaN marks it without failing the row.
    pub fn aspect_ratio(major: f64, minor: f64) -> f64 {
        if minor == 0.0 { f64::NAN } else { major / minor }
    }
}

pub trait Measured {
    fn measurements(&self) -> &Measurements;
    fn set_metrics(&mut self, metrics: ShapeMetrics);
}

/// Derives micron area, aspect ratio and shape class for every item.
pub fn normalize<T: Measured + Send>(items: &mut [T], pixel_to_micron: f64) {
    items.par_iter_mut().for_each(|item| {
        let metrics = ShapeMetrics::from_measurements(item.measurements(), pixel_to_micron);
        item.set_metrics(metrics);
    });
}
