//! Shared machine-readable celltrace contracts.
//!
//! These types are what the engine, the renderer and the command line agree
//! on: the tracker's link-type scheme, shape classes, the input column map
//! and the per-frame overlay payload.

use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: &str = "v1";

/// CellProfiler `TrackObjects_LinkType` codes.
///
/// The secondary daughter of a division carries the continuation code; it is
/// told apart from a plain continuation only by sharing frame and parent
/// object with a `DivisionPrimary` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkType {
    Start,
    Continuation,
    DivisionPrimary,
    Merge,
    Gap,
}

impl LinkType {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Start),
            1 => Some(Self::Continuation),
            2 => Some(Self::DivisionPrimary),
            3 => Some(Self::Merge),
            4 => Some(Self::Gap),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::Start => 0,
            Self::Continuation => 1,
            Self::DivisionPrimary => 2,
            Self::Merge => 3,
            Self::Gap => 4,
        }
    }

    /// Starts a track on its own (lineage origin or primary daughter).
    pub fn starts_track(self) -> bool {
        matches!(self, Self::Start | Self::DivisionPrimary)
    }

    /// Merges and gaps are reported, never resolved.
    pub fn is_unhandled(self) -> bool {
        matches!(self, Self::Merge | Self::Gap)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Continuation => "continuation",
            Self::DivisionPrimary => "division",
            Self::Merge => "merge",
            Self::Gap => "gap",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Shape {
    Rod,
    Disk,
}

impl Shape {
    /// Closed lower bound: an aspect ratio of exactly this value is a rod.
    pub const ROD_MIN_ASPECT_RATIO: f64 = 2.0;

    /// A NaN aspect ratio fails the comparison and classifies as disk.
    pub fn classify(aspect_ratio: f64) -> Self {
        if aspect_ratio >= Self::ROD_MIN_ASPECT_RATIO {
            Self::Rod
        } else {
            Self::Disk
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rod => "rod",
            Self::Disk => "disk",
        }
    }
}

/// Input column names. A configured name also matches CellProfiler's
/// suffixed variant, e.g. `TrackObjects_Label` matches `TrackObjects_Label_50`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMap {
    pub frame: String,
    pub object_id: String,
    pub link_type: String,
    pub parent_frame: String,
    pub parent_object_id: String,
    pub track_label: String,
    pub area: String,
    pub major_axis: String,
    pub minor_axis: String,
    pub center_x: String,
    pub center_y: String,
    pub foci_parent: String,
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            frame: "ImageNumber".to_string(),
            object_id: "ObjectNumber".to_string(),
            link_type: "TrackObjects_LinkType".to_string(),
            parent_frame: "TrackObjects_ParentImageNumber".to_string(),
            parent_object_id: "TrackObjects_ParentObjectNumber".to_string(),
            track_label: "TrackObjects_Label".to_string(),
            area: "AreaShape_Area".to_string(),
            major_axis: "AreaShape_MajorAxisLength".to_string(),
            minor_axis: "AreaShape_MinorAxisLength".to_string(),
            center_x: "Location_Center_X".to_string(),
            center_y: "Location_Center_Y".to_string(),
            foci_parent: "Parent_FilterCells".to_string(),
        }
    }
}

impl ColumnMap {
    pub const FIELDS: [&'static str; 12] = [
        "frame",
        "object_id",
        "link_type",
        "parent_frame",
        "parent_object_id",
        "track_label",
        "area",
        "major_axis",
        "minor_axis",
        "center_x",
        "center_y",
        "foci_parent",
    ];

    pub fn field_mut(&mut self, field: &str) -> Option<&mut String> {
        let slot = match field {
            "frame" => &mut self.frame,
            "object_id" => &mut self.object_id,
            "link_type" => &mut self.link_type,
            "parent_frame" => &mut self.parent_frame,
            "parent_object_id" => &mut self.parent_object_id,
            "track_label" => &mut self.track_label,
            "area" => &mut self.area,
            "major_axis" => &mut self.major_axis,
            "minor_axis" => &mut self.minor_axis,
            "center_x" => &mut self.center_x,
            "center_y" => &mut self.center_y,
            "foci_parent" => &mut self.foci_parent,
            _ => return None,
        };
        Some(slot)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayPoint {
    pub frame: i64,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackTrail {
    pub cell_id: u32,
    pub color: String,
    pub points: Vec<OverlayPoint>,
}

/// Everything drawn on top of one image of the stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameOverlay {
    pub frame: i64,
    pub trails: Vec<TrackTrail>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaPoint {
    pub cell_id: u32,
    pub time_hr: f64,
    pub area_um: f64,
    pub color: String,
}
