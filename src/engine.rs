use crate::error::{EngineError, ErrorCode};
use crate::export::{ColumnRename, ExportSpec, write_cells, write_foci};
use crate::foci::{FociTable, assign_foci, cell_keys};
use crate::lineage_annotate::{CellTable, annotate, annotate_snapshot, reconcile};
use crate::lineage_seed::{Track, seed, seed_snapshot};
use crate::overlay::{OverlayWindow, area_points, frame_overlay, frame_range, track_trails};
use crate::record_store::RecordStore;
use crate::track_walk::walk_all;
use celltrace_protocol::{ColumnMap, PROTOCOL_VERSION};
use celltrace_render::{OverlayCanvas, export_area_time_svg, export_overlay_svg};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

pub type OpId = String;
pub type RunId = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    SetParameter {
        name: String,
        value: Value,
    },
    /// Points one `ColumnMap` field at a different input header.
    SetColumn {
        field: String,
        column: String,
    },
    LoadCells {
        path: String,
    },
    LoadFoci {
        path: String,
    },
    Reconstruct,
    AssignFoci,
    ExportCells {
        path: String,
        columns: Option<Vec<String>>,
    },
    ExportFoci {
        path: String,
        columns: Option<Vec<String>>,
    },
    RenderOverlay {
        output_dir: String,
        /// Background image per frame; `{frame}` is replaced by the frame number.
        background: Option<String>,
        from_frame: Option<i64>,
        to_frame: Option<i64>,
    },
    RenderAreaPlot {
        path: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub run_id: RunId,
    pub ops: Vec<Operation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpResult {
    pub op_id: OpId,
    pub written_paths: Vec<String>,
    pub warnings: Vec<String>,
    pub messages: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    pub run_id: RunId,
    pub op: Operation,
    pub result: OpResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    pub protocol_version: String,
    pub supported_operations: Vec<String>,
    pub supported_parameters: Vec<String>,
    pub column_fields: Vec<String>,
    pub deterministic_operation_log: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisParameters {
    pub pixel_to_micron: f64,
    pub time_interval_minutes: f64,
    pub timelapse: bool,
    /// Refuse merge and gap links instead of reporting them.
    pub strict_link_types: bool,
    pub overlay: OverlayWindow,
    pub canvas: OverlayCanvas,
}

impl Default for AnalysisParameters {
    fn default() -> Self {
        Self {
            pixel_to_micron: 0.065,
            time_interval_minutes: 15.0,
            timelapse: true,
            strict_link_types: false,
            overlay: OverlayWindow::default(),
            canvas: OverlayCanvas::default(),
        }
    }
}

impl AnalysisParameters {
    pub const NAMES: [&'static str; 9] = [
        "pixel_to_micron",
        "time_interval_minutes",
        "timelapse",
        "strict_link_types",
        "overlay_trail",
        "overlay_lead",
        "overlay_max_points",
        "canvas_width",
        "canvas_height",
    ];

    pub fn frame_interval_hours(&self) -> f64 {
        self.time_interval_minutes / 60.0
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisState {
    pub parameters: AnalysisParameters,
    pub columns: ColumnMap,
    pub renames: Vec<ColumnRename>,
    pub cells: Option<RecordStore>,
    pub tracks: Vec<Track>,
    pub cell_table: Option<CellTable>,
    pub foci: Option<FociTable>,
}

impl Default for AnalysisState {
    fn default() -> Self {
        Self {
            parameters: AnalysisParameters::default(),
            columns: ColumnMap::default(),
            renames: ExportSpec::default().renames,
            cells: None,
            tracks: vec![],
            cell_table: None,
            foci: None,
        }
    }
}

impl AnalysisState {
    fn cells(&self) -> Result<(&RecordStore, &CellTable), EngineError> {
        match (&self.cells, &self.cell_table) {
            (Some(store), Some(table)) => Ok((store, table)),
            (None, _) => Err(missing("cell table", "LoadCells")),
            (Some(_), None) => Err(missing("reconstruction", "Reconstruct")),
        }
    }

    fn export_spec(&self, columns: Option<Vec<String>>) -> ExportSpec {
        ExportSpec {
            columns,
            renames: self.renames.clone(),
        }
    }
}

fn missing(what: &str, op: &str) -> EngineError {
    EngineError::new(
        ErrorCode::NotFound,
        format!("No {what} available; run {op} first"),
    )
}

fn malformed(name: &str, expected: &str, value: &Value) -> EngineError {
    EngineError::new(
        ErrorCode::MalformedNumericInput,
        format!("Parameter '{name}' expects {expected}, got {value}"),
    )
}

/// JSON numbers and numeric strings are both accepted; command lines
/// forward raw text.
fn number_param(name: &str, value: &Value) -> Result<f64, EngineError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|v| v.is_finite())
        .ok_or_else(|| malformed(name, "a number", value))
}

fn positive_param(name: &str, value: &Value) -> Result<f64, EngineError> {
    let v = number_param(name, value)?;
    if v <= 0.0 {
        return Err(EngineError::invalid_input(format!(
            "Parameter '{name}' must be > 0, got {v}"
        )));
    }
    Ok(v)
}

fn count_param(name: &str, value: &Value) -> Result<i64, EngineError> {
    let v = number_param(name, value)?;
    if v < 0.0 || v.fract() != 0.0 || v >= i64::MAX as f64 {
        return Err(malformed(name, "a non-negative integer", value));
    }
    Ok(v as i64)
}

fn bool_param(name: &str, value: &Value) -> Result<bool, EngineError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
        _ => Err(EngineError::invalid_input(format!(
            "Parameter '{name}' expects true or false, got {value}"
        ))),
    }
}

pub trait Engine {
    fn apply(&mut self, op: Operation) -> Result<OpResult, EngineError>;
    fn apply_workflow(&mut self, wf: Workflow) -> Result<Vec<OpResult>, EngineError>;
    fn snapshot(&self) -> &AnalysisState;
}

#[derive(Debug, Clone, Default)]
pub struct CelltraceEngine {
    state: AnalysisState,
    journal: Vec<OperationRecord>,
    op_counter: u64,
}

impl CelltraceEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &AnalysisState {
        &self.state
    }

    pub fn capabilities() -> Capabilities {
        Capabilities {
            protocol_version: PROTOCOL_VERSION.to_string(),
            supported_operations: vec![
                "SetParameter".to_string(),
                "SetColumn".to_string(),
                "LoadCells".to_string(),
                "LoadFoci".to_string(),
                "Reconstruct".to_string(),
                "AssignFoci".to_string(),
                "ExportCells".to_string(),
                "ExportFoci".to_string(),
                "RenderOverlay".to_string(),
                "RenderAreaPlot".to_string(),
            ],
            supported_parameters: AnalysisParameters::NAMES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            column_fields: ColumnMap::FIELDS.iter().map(|s| s.to_string()).collect(),
            deterministic_operation_log: true,
        }
    }

    pub fn operation_log(&self) -> &[OperationRecord] {
        &self.journal
    }

    fn next_op_id(&mut self) -> OpId {
        self.op_counter += 1;
        format!("op-{}", self.op_counter)
    }

    fn set_parameter(&mut self, name: &str, value: &Value) -> Result<String, EngineError> {
        let p = &mut self.state.parameters;
        let shown = match name {
            "pixel_to_micron" => {
                p.pixel_to_micron = positive_param(name, value)?;
                p.pixel_to_micron.to_string()
            }
            "time_interval_minutes" => {
                p.time_interval_minutes = positive_param(name, value)?;
                p.time_interval_minutes.to_string()
            }
            "timelapse" => {
                p.timelapse = bool_param(name, value)?;
                p.timelapse.to_string()
            }
            "strict_link_types" => {
                p.strict_link_types = bool_param(name, value)?;
                p.strict_link_types.to_string()
            }
            "overlay_trail" => {
                p.overlay.trail = count_param(name, value)?;
                p.overlay.trail.to_string()
            }
            "overlay_lead" => {
                p.overlay.lead = count_param(name, value)?;
                p.overlay.lead.to_string()
            }
            "overlay_max_points" => {
                p.overlay.max_points = count_param(name, value)? as usize;
                p.overlay.max_points.to_string()
            }
            "canvas_width" => {
                p.canvas.width = positive_param(name, value)? as f32;
                p.canvas.width.to_string()
            }
            "canvas_height" => {
                p.canvas.height = positive_param(name, value)? as f32;
                p.canvas.height.to_string()
            }
            _ => {
                return Err(EngineError::invalid_input(format!(
                    "Unknown parameter '{name}'"
                )));
            }
        };
        Ok(format!("Set parameter '{name}' to {shown}"))
    }

    fn reconstruct(&mut self, result: &mut OpResult) -> Result<(), EngineError> {
        // A failed run must not leave the previous reconstruction exportable.
        self.state.tracks.clear();
        self.state.cell_table = None;
        let params = self.state.parameters.clone();
        let store = self
            .state
            .cells
            .as_mut()
            .ok_or_else(|| missing("cell table", "LoadCells"))?;
        store.reset_claims();
        store.normalize(params.pixel_to_micron);

        let (tracks, table) = if params.timelapse {
            for (link_type, n) in store.unhandled_link_counts() {
                let text = format!(
                    "{n} record(s) with unsupported link type '{}'",
                    link_type.as_str()
                );
                if params.strict_link_types {
                    return Err(EngineError::new(ErrorCode::UnhandledLinkType, text));
                }
                log::warn!("{text}");
                result.warnings.push(text);
            }

            let report = seed(store);
            for (frame, object_id) in &report.unresolved_siblings {
                result.warnings.push(format!(
                    "Division at frame {frame} object {object_id} has no sister daughter"
                ));
            }
            let tracks = walk_all(store, report.seeds);
            reconcile(store, &tracks)?;
            let table = annotate(store, &tracks, params.frame_interval_hours());
            if table.unresolved_parents > 0 {
                result.warnings.push(format!(
                    "{} instance(s) reference an untracked predecessor",
                    table.unresolved_parents
                ));
            }
            (tracks, table)
        } else {
            let tracks = seed_snapshot(store);
            reconcile(store, &tracks)?;
            let table = annotate_snapshot(&tracks);
            (tracks, table)
        };

        log::info!(
            "reconstructed {} cell(s) over {} instance(s)",
            tracks.len(),
            table.len()
        );
        result.messages.push(format!(
            "Reconstructed {} cell(s) from {} record(s)",
            tracks.len(),
            table.len()
        ));
        self.state.tracks = tracks;
        self.state.cell_table = Some(table);
        Ok(())
    }

    fn render_overlay(
        &self,
        output_dir: &str,
        background: Option<&str>,
        from_frame: Option<i64>,
        to_frame: Option<i64>,
        result: &mut OpResult,
    ) -> Result<(), EngineError> {
        let (store, table) = self.state.cells()?;
        let Some((first, last)) = frame_range(store) else {
            result.warnings.push("No frames to render".to_string());
            return Ok(());
        };
        let from = from_frame.unwrap_or(first);
        let to = to_frame.unwrap_or(last);
        if from > to {
            return Err(EngineError::invalid_input(format!(
                "Overlay frame range {from}..{to} is empty"
            )));
        }
        std::fs::create_dir_all(output_dir).map_err(|e| {
            EngineError::new(
                ErrorCode::Io,
                format!("Could not create overlay directory '{output_dir}': {e}"),
            )
        })?;

        let params = &self.state.parameters;
        let trails = track_trails(store, table);
        for frame in from..=to {
            let overlay = frame_overlay(&trails, frame, &params.overlay);
            let canvas = OverlayCanvas {
                background_href: background.map(|b| b.replace("{frame}", &frame.to_string())),
                ..params.canvas.clone()
            };
            let path = Path::new(output_dir).join(format!("frame_{frame:04}.svg"));
            std::fs::write(&path, export_overlay_svg(&overlay, &canvas)).map_err(|e| {
                EngineError::new(
                    ErrorCode::Io,
                    format!("Could not write overlay '{}': {e}", path.display()),
                )
            })?;
            result
                .written_paths
                .push(path.to_string_lossy().to_string());
        }
        log::info!("rendered overlay frames {from}..={to} into {output_dir}");
        result.messages.push(format!(
            "Rendered {} overlay frame(s) into '{output_dir}'",
            to - from + 1
        ));
        Ok(())
    }

    fn apply_internal(&mut self, op: Operation) -> Result<OpResult, EngineError> {
        let op_id = self.next_op_id();
        let mut result = OpResult {
            op_id,
            written_paths: vec![],
            warnings: vec![],
            messages: vec![],
        };

        match op {
            Operation::SetParameter { name, value } => {
                let message = self.set_parameter(&name, &value)?;
                result.messages.push(message);
            }
            Operation::SetColumn { field, column } => {
                let slot = self.state.columns.field_mut(&field).ok_or_else(|| {
                    EngineError::invalid_input(format!(
                        "Unknown column field '{field}'; expected one of {}",
                        ColumnMap::FIELDS.join(", ")
                    ))
                })?;
                *slot = column.clone();
                result
                    .messages
                    .push(format!("Column field '{field}' reads '{column}'"));
            }
            Operation::LoadCells { path } => {
                let store = RecordStore::from_path(
                    &path,
                    &self.state.columns,
                    self.state.parameters.timelapse,
                )?;
                log::info!("loaded {} cell record(s) from {path}", store.len());
                result
                    .messages
                    .push(format!("Loaded {} cell record(s) from '{path}'", store.len()));
                self.state.cells = Some(store);
                self.state.tracks.clear();
                self.state.cell_table = None;
            }
            Operation::LoadFoci { path } => {
                let mut foci = FociTable::from_path(&path, &self.state.columns)?;
                foci.normalize(self.state.parameters.pixel_to_micron);
                log::info!("loaded {} focus record(s) from {path}", foci.len());
                result
                    .messages
                    .push(format!("Loaded {} focus record(s) from '{path}'", foci.len()));
                self.state.foci = Some(foci);
            }
            Operation::Reconstruct => self.reconstruct(&mut result)?,
            Operation::AssignFoci => {
                let keys = {
                    let (store, table) = self.state.cells()?;
                    cell_keys(store, table)
                };
                let px = self.state.parameters.pixel_to_micron;
                let foci = self
                    .state
                    .foci
                    .as_mut()
                    .ok_or_else(|| missing("foci table", "LoadFoci"))?;
                foci.normalize(px);
                let assigned = assign_foci(&keys, foci)?;
                if assigned < foci.len() {
                    result.warnings.push(format!(
                        "{} focus record(s) have no enclosing cell",
                        foci.len() - assigned
                    ));
                }
                result
                    .messages
                    .push(format!("Assigned {assigned} of {} foci", foci.len()));
            }
            Operation::ExportCells { path, columns } => {
                let (store, table) = self.state.cells()?;
                let n = write_cells(&path, store, table, &self.state.export_spec(columns))?;
                result.written_paths.push(path.clone());
                result
                    .messages
                    .push(format!("Wrote {n} cell row(s) to '{path}'"));
            }
            Operation::ExportFoci { path, columns } => {
                let foci = self
                    .state
                    .foci
                    .as_ref()
                    .ok_or_else(|| missing("foci table", "LoadFoci"))?;
                let n = write_foci(&path, foci, &self.state.export_spec(columns))?;
                result.written_paths.push(path.clone());
                result
                    .messages
                    .push(format!("Wrote {n} focus row(s) to '{path}'"));
            }
            Operation::RenderOverlay {
                output_dir,
                background,
                from_frame,
                to_frame,
            } => self.render_overlay(
                &output_dir,
                background.as_deref(),
                from_frame,
                to_frame,
                &mut result,
            )?,
            Operation::RenderAreaPlot { path } => {
                let (store, table) = self.state.cells()?;
                let svg = export_area_time_svg(&area_points(store, table));
                std::fs::write(&path, svg).map_err(|e| {
                    EngineError::new(
                        ErrorCode::Io,
                        format!("Could not write area plot '{path}': {e}"),
                    )
                })?;
                result.written_paths.push(path.clone());
                result
                    .messages
                    .push(format!("Wrote area plot to '{path}'"));
            }
        }

        Ok(result)
    }
}

impl Engine for CelltraceEngine {
    fn apply(&mut self, op: Operation) -> Result<OpResult, EngineError> {
        let run_id = "interactive".to_string();
        let result = self.apply_internal(op.clone())?;
        self.journal.push(OperationRecord {
            run_id,
            op,
            result: result.clone(),
        });
        Ok(result)
    }

    fn apply_workflow(&mut self, wf: Workflow) -> Result<Vec<OpResult>, EngineError> {
        let mut results = Vec::new();
        for op in &wf.ops {
            let result = self.apply_internal(op.clone())?;
            self.journal.push(OperationRecord {
                run_id: wf.run_id.clone(),
                op: op.clone(),
                result: result.clone(),
            });
            results.push(result);
        }
        Ok(results)
    }

    fn snapshot(&self) -> &AnalysisState {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::RawTable;
    use serde_json::json;

    const CELLS: &str = "\
ImageNumber,ObjectNumber,TrackObjects_LinkType_50,TrackObjects_ParentImageNumber_50,TrackObjects_ParentObjectNumber_50,TrackObjects_Label_50,AreaShape_Area,AreaShape_MajorAxisLength,AreaShape_MinorAxisLength,Location_Center_X,Location_Center_Y
1,1,0,0,0,1,100,4,2,10,10
2,1,1,1,1,1,120,4,2,11,10
3,1,2,2,1,2,60,2,2,12,10
3,2,1,2,1,1,60,2,2,12,14
4,1,1,3,1,2,70,2,2,13,10
4,2,1,3,2,1,70,2,2,13,14
";

    const FOCI: &str = "\
ImageNumber,ObjectNumber,Parent_FilterCells,AreaShape_Area,AreaShape_MajorAxisLength,AreaShape_MinorAxisLength,Location_Center_X,Location_Center_Y
3,1,2,4,2,2,12,14
4,1,1,4,2,2,13,10
4,2,0,4,2,2,1,1
";

    fn write(dir: &Path, name: &str, text: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, text).unwrap();
        path.to_string_lossy().to_string()
    }

    fn loaded(dir: &Path) -> CelltraceEngine {
        let mut engine = CelltraceEngine::new();
        engine
            .apply(Operation::LoadCells {
                path: write(dir, "cells.csv", CELLS),
            })
            .unwrap();
        engine
    }

    #[test]
    fn test_default_parameters() {
        let p = AnalysisParameters::default();
        assert_eq!(p.pixel_to_micron, 0.065);
        assert_eq!(p.frame_interval_hours(), 0.25);
        assert!(p.timelapse);
        assert_eq!(p.overlay, OverlayWindow::default());
    }

    #[test]
    fn test_set_parameter_accepts_numeric_strings() {
        let mut engine = CelltraceEngine::new();
        let res = engine
            .apply(Operation::SetParameter {
                name: "pixel_to_micron".to_string(),
                value: json!("0.1"),
            })
            .unwrap();
        assert!(res.messages[0].contains("pixel_to_micron"));
        assert_eq!(engine.state().parameters.pixel_to_micron, 0.1);
        engine
            .apply(Operation::SetParameter {
                name: "time_interval_minutes".to_string(),
                value: json!(30),
            })
            .unwrap();
        assert_eq!(engine.state().parameters.frame_interval_hours(), 0.5);
    }

    #[test]
    fn test_set_parameter_malformed_number() {
        let mut engine = CelltraceEngine::new();
        let err = engine
            .apply(Operation::SetParameter {
                name: "time_interval_minutes".to_string(),
                value: json!("fifteen"),
            })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::MalformedNumericInput);
        let err = engine
            .apply(Operation::SetParameter {
                name: "overlay_trail".to_string(),
                value: json!(1.5),
            })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::MalformedNumericInput);
        let err = engine
            .apply(Operation::SetParameter {
                name: "pixel_to_micron".to_string(),
                value: json!(0),
            })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
        assert!(engine.operation_log().is_empty());
    }

    #[test]
    fn test_set_parameter_count_out_of_range() {
        let mut engine = CelltraceEngine::new();
        let err = engine
            .apply(Operation::SetParameter {
                name: "overlay_lead".to_string(),
                value: json!(1e19),
            })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::MalformedNumericInput);
        assert_eq!(engine.state().parameters.overlay.lead, 0);
        engine
            .apply(Operation::SetParameter {
                name: "overlay_trail".to_string(),
                value: json!("7"),
            })
            .unwrap();
        assert_eq!(engine.state().parameters.overlay.trail, 7);
    }

    #[test]
    fn test_set_parameter_unknown() {
        let mut engine = CelltraceEngine::new();
        let err = engine
            .apply(Operation::SetParameter {
                name: "nope".to_string(),
                value: json!(1),
            })
            .unwrap_err();
        assert!(err.message.contains("Unknown parameter"));
    }

    #[test]
    fn test_set_column() {
        let mut engine = CelltraceEngine::new();
        engine
            .apply(Operation::SetColumn {
                field: "foci_parent".to_string(),
                column: "Parent_Cells".to_string(),
            })
            .unwrap();
        assert_eq!(engine.state().columns.foci_parent, "Parent_Cells");
        let err = engine
            .apply(Operation::SetColumn {
                field: "colour".to_string(),
                column: "x".to_string(),
            })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
    }

    #[test]
    fn test_reconstruct_requires_cells() {
        let mut engine = CelltraceEngine::new();
        let err = engine.apply(Operation::Reconstruct).unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[test]
    fn test_reconstruct_division() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = loaded(dir.path());
        let res = engine.apply(Operation::Reconstruct).unwrap();
        assert!(res.warnings.is_empty());
        let state = engine.state();
        assert_eq!(state.tracks.len(), 3);
        let table = state.cell_table.as_ref().unwrap();
        assert_eq!(table.len(), 6);
        let daughter_parents: Vec<_> = table
            .rows
            .iter()
            .filter(|r| r.cell_id > 1 && r.relative_time == 0.0)
            .map(|r| r.parent)
            .collect();
        assert_eq!(daughter_parents, vec![Some(1), Some(1)]);

        // Running again starts from a clean claimed set.
        engine.apply(Operation::Reconstruct).unwrap();
        assert_eq!(engine.state().tracks.len(), 3);
    }

    #[test]
    fn test_reconstruct_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = CelltraceEngine::new();
        engine
            .apply(Operation::SetParameter {
                name: "timelapse".to_string(),
                value: json!(false),
            })
            .unwrap();
        engine
            .apply(Operation::LoadCells {
                path: write(dir.path(), "cells.csv", CELLS),
            })
            .unwrap();
        engine.apply(Operation::Reconstruct).unwrap();
        let table = engine.state().cell_table.as_ref().unwrap();
        assert_eq!(table.cell_count(), 6);
        assert!(table.rows.iter().all(|r| r.time_hr == 0.0 && r.parent.is_none()));
    }

    #[test]
    fn test_unhandled_link_types() {
        let dir = tempfile::tempdir().unwrap();
        let text = format!("{CELLS}5,1,4,0,0,2,70,2,2,14,10\n");
        let mut engine = CelltraceEngine::new();
        engine
            .apply(Operation::LoadCells {
                path: write(dir.path(), "gap.csv", &text),
            })
            .unwrap();
        engine
            .apply(Operation::SetParameter {
                name: "strict_link_types".to_string(),
                value: json!(true),
            })
            .unwrap();
        let err = engine.apply(Operation::Reconstruct).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnhandledLinkType);

        engine
            .apply(Operation::SetParameter {
                name: "strict_link_types".to_string(),
                value: json!("false"),
            })
            .unwrap();
        // An orphaned gap record is reported, then fails reconciliation
        // because no track reaches it.
        let err = engine.apply(Operation::Reconstruct).unwrap_err();
        assert_eq!(err.code, ErrorCode::Reconciliation);
    }

    #[test]
    fn test_failed_reconstruct_discards_previous_result() {
        let dir = tempfile::tempdir().unwrap();
        let text = format!("{CELLS}5,1,4,0,0,2,70,2,2,14,10\n");
        let mut engine = CelltraceEngine::new();
        engine
            .apply(Operation::LoadCells {
                path: write(dir.path(), "gap.csv", &text),
            })
            .unwrap();
        engine
            .apply(Operation::SetParameter {
                name: "timelapse".to_string(),
                value: json!(false),
            })
            .unwrap();
        engine.apply(Operation::Reconstruct).unwrap();
        assert!(engine.state().cell_table.is_some());

        for (name, value) in [("timelapse", json!(true)), ("strict_link_types", json!(true))] {
            engine
                .apply(Operation::SetParameter {
                    name: name.to_string(),
                    value,
                })
                .unwrap();
        }
        let err = engine.apply(Operation::Reconstruct).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnhandledLinkType);
        assert!(engine.state().tracks.is_empty());
        assert!(engine.state().cell_table.is_none());

        let out = dir.path().join("out.csv").to_string_lossy().to_string();
        let err = engine
            .apply(Operation::ExportCells {
                path: out.clone(),
                columns: None,
            })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
        assert!(!Path::new(&out).exists());
    }

    #[test]
    fn test_workflow_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let cells = write(dir.path(), "cells.csv", CELLS);
        let foci = write(dir.path(), "foci.csv", FOCI);
        let out = dir.path().join("out.csv").to_string_lossy().to_string();
        let foci_out = dir.path().join("foci_out.csv").to_string_lossy().to_string();
        let overlay_dir = dir.path().join("overlay").to_string_lossy().to_string();
        let plot = dir.path().join("area.svg").to_string_lossy().to_string();

        let wf: Workflow = serde_json::from_value(json!({
            "run_id": "test",
            "ops": [
                {"SetParameter": {"name": "pixel_to_micron", "value": 0.5}},
                {"LoadCells": {"path": cells}},
                {"LoadFoci": {"path": foci}},
                "Reconstruct",
                "AssignFoci",
                {"ExportCells": {"path": out, "columns": ["cellId", "ImageNumber", "Parent"]}},
                {"ExportFoci": {"path": foci_out, "columns": null}},
                {"RenderOverlay": {"output_dir": overlay_dir, "background": null, "from_frame": 2, "to_frame": 3}},
                {"RenderAreaPlot": {"path": plot}}
            ]
        }))
        .unwrap();

        let mut engine = CelltraceEngine::new();
        let results = engine.apply_workflow(wf).unwrap();
        assert_eq!(results.len(), 9);
        assert_eq!(engine.operation_log().len(), 9);
        assert_eq!(engine.operation_log()[0].run_id, "test");
        assert!(results[4].messages[0].contains("Assigned 2 of 3 foci"));
        assert_eq!(results[4].warnings.len(), 1);

        let exported = RawTable::from_path(&out).unwrap();
        assert_eq!(exported.headers(), ["cellId", "ImageNumber", "Parent"]);
        assert_eq!(exported.len(), 6);
        assert_eq!(exported.rows()[0], vec!["1", "1", ""]);

        let foci_table = RawTable::from_path(&foci_out).unwrap();
        let cell_col = foci_table.require_column("cellId").unwrap();
        assert_eq!(foci_table.rows()[2][cell_col], "");

        assert_eq!(results[7].written_paths.len(), 2);
        assert!(Path::new(&results[7].written_paths[0]).ends_with("frame_0002.svg"));
        let svg = std::fs::read_to_string(&plot).unwrap();
        assert!(svg.contains("6 instance(s)"));
    }

    #[test]
    fn test_render_overlay_background_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = loaded(dir.path());
        engine.apply(Operation::Reconstruct).unwrap();
        let overlay_dir = dir.path().join("ov").to_string_lossy().to_string();
        let res = engine
            .apply(Operation::RenderOverlay {
                output_dir: overlay_dir,
                background: Some("stack/page_{frame}.png".to_string()),
                from_frame: Some(4),
                to_frame: None,
            })
            .unwrap();
        let svg = std::fs::read_to_string(&res.written_paths[0]).unwrap();
        assert!(svg.contains("stack/page_4.png"));
        assert!(svg.contains("<polyline"));
    }

    #[test]
    fn test_capabilities() {
        let caps = CelltraceEngine::capabilities();
        assert_eq!(caps.protocol_version, "v1");
        assert!(caps.supported_operations.contains(&"Reconstruct".to_string()));
        assert_eq!(caps.supported_parameters.len(), AnalysisParameters::NAMES.len());
    }
}
