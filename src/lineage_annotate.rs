//! Per-instance annotation of finished tracks: time since the track's first
//! frame and the link to the immediate ancestor instance.

use crate::error::{EngineError, ErrorCode};
use crate::lineage_seed::{CellId, Track};
use crate::record_store::{RecordId, RecordKey, RecordStore};
use std::collections::HashMap;

const UNCLAIMED_PREVIEW: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedRecord {
    pub record: RecordId,
    pub cell_id: CellId,
    pub time_hr: f64,
    pub relative_time: f64,
    pub parent: Option<CellId>,
    pub parent_area: Option<f64>,
}

/// All tracks concatenated in cell id order.
#[derive(Debug, Clone, Default)]
pub struct CellTable {
    pub rows: Vec<AnnotatedRecord>,
    /// Rows that reference a predecessor which is not in the table.
    pub unresolved_parents: usize,
}

impl CellTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn cell_count(&self) -> usize {
        self.rows.iter().map(|r| r.cell_id).max().unwrap_or(0) as usize
    }
}

pub fn time_hr(frame: i64, frame_interval_hours: f64) -> f64 {
    (frame - 1) as f64 * frame_interval_hours
}

pub fn annotate(store: &RecordStore, tracks: &[Track], frame_interval_hours: f64) -> CellTable {
    let mut rows = Vec::with_capacity(store.len());
    for track in tracks {
        let Some(first) = track.first() else {
            continue;
        };
        let birth = time_hr(store.get(first).frame, frame_interval_hours);
        for id in &track.records {
            let t = time_hr(store.get(*id).frame, frame_interval_hours);
            rows.push(AnnotatedRecord {
                record: *id,
                cell_id: track.cell_id,
                time_hr: t,
                relative_time: t - birth,
                parent: None,
                parent_area: None,
            });
        }
    }

    let mut position: HashMap<RecordKey, usize> = HashMap::with_capacity(rows.len());
    for (idx, row) in rows.iter().enumerate() {
        position.entry(store.get(row.record).key()).or_insert(idx);
    }

    let mut unresolved_parents = 0;
    let links: Vec<Option<(CellId, f64)>> = rows
        .iter()
        .map(|row| {
            let record = store.get(row.record);
            let found = position.get(&record.parent_key()).map(|idx| {
                let parent = &rows[*idx];
                (parent.cell_id, store.get(parent.record).metrics.area_um)
            });
            if found.is_none() && record.parent_frame != 0 {
                unresolved_parents += 1;
            }
            found
        })
        .collect();
    for (row, link) in rows.iter_mut().zip(links) {
        if let Some((cell_id, area)) = link {
            row.parent = Some(cell_id);
            row.parent_area = Some(area);
        }
    }

    if unresolved_parents > 0 {
        log::warn!("{unresolved_parents} instance(s) reference a predecessor that is not tracked");
    }
    CellTable {
        rows,
        unresolved_parents,
    }
}

/// Snapshot data has no time axis and no ancestry.
pub fn annotate_snapshot(tracks: &[Track]) -> CellTable {
    let rows = tracks
        .iter()
        .flat_map(|track| {
            track.records.iter().map(|id| AnnotatedRecord {
                record: *id,
                cell_id: track.cell_id,
                time_hr: 0.0,
                relative_time: 0.0,
                parent: None,
                parent_area: None,
            })
        })
        .collect();
    CellTable {
        rows,
        unresolved_parents: 0,
    }
}

/// Every input record must end up in exactly one track.
pub fn reconcile(store: &RecordStore, tracks: &[Track]) -> Result<(), EngineError> {
    let expected = store.len();
    let actual: usize = tracks.iter().map(|t| t.len()).sum();
    if actual == expected {
        return Ok(());
    }
    let unclaimed: Vec<String> = store
        .unclaimed_ids()
        .take(UNCLAIMED_PREVIEW)
        .map(|id| {
            let r = store.get(id);
            format!(
                "frame {} object {} ({})",
                r.frame,
                r.object_id,
                r.link_type.as_str()
            )
        })
        .collect();
    let mut message = format!(
        "Reconstructed {actual} instance(s) from {expected} input record(s)"
    );
    if !unclaimed.is_empty() {
        message.push_str(&format!("; untracked: {}", unclaimed.join(", ")));
        if expected - store.claimed_count() > UNCLAIMED_PREVIEW {
            message.push_str(", ...");
        }
    }
    Err(EngineError::new(ErrorCode::Reconciliation, message))
}
