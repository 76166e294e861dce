use crate::record_store::{RecordId, RecordKey, RecordStore};
use celltrace_protocol::LinkType;
use serde::{Deserialize, Serialize};

pub type CellId = u32;

/// One cell through time: record ids in the order they were reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub cell_id: CellId,
    pub records: Vec<RecordId>,
}

impl Track {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn first(&self) -> Option<RecordId> {
        self.records.first().copied()
    }

    pub fn last(&self) -> Option<RecordId> {
        self.records.last().copied()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SeedReport {
    pub seeds: Vec<Track>,
    /// Primary daughters whose sister could not be found.
    pub unresolved_siblings: Vec<RecordKey>,
}

/// Claims every lineage start and primary daughter as a one-record seed,
/// then the secondary daughter of each division. Cell ids are handed out
/// densely from 1 in that order.
pub fn seed(store: &mut RecordStore) -> SeedReport {
    let mut report = SeedReport::default();
    let mut next_cell_id: CellId = 1;

    for id in 0..store.len() {
        if store.get(id).link_type.starts_track() && store.claim(id) {
            report.seeds.push(Track {
                cell_id: next_cell_id,
                records: vec![id],
            });
            next_cell_id += 1;
        }
    }

    let primary_seed_count = report.seeds.len();
    for idx in 0..primary_seed_count {
        let id = report.seeds[idx].records[0];
        let record = store.get(id);
        if record.link_type != LinkType::DivisionPrimary {
            continue;
        }
        let (frame, parent_object_id, key) = (record.frame, record.parent_object_id, record.key());
        let siblings = store.siblings(frame, parent_object_id, LinkType::Continuation);
        if siblings.is_empty() {
            log::warn!(
                "division at frame {frame} object {}: no sister daughter with parent object {parent_object_id}",
                key.1
            );
            report.unresolved_siblings.push(key);
            continue;
        }
        for sibling in siblings {
            if store.claim(sibling) {
                report.seeds.push(Track {
                    cell_id: next_cell_id,
                    records: vec![sibling],
                });
                next_cell_id += 1;
            }
        }
    }

    log::info!(
        "seeded {} track(s): {primary_seed_count} start/primary, {} sister daughter(s)",
        report.seeds.len(),
        report.seeds.len() - primary_seed_count
    );
    report
}

/// Without a time-lapse every record is its own cell.
pub fn seed_snapshot(store: &mut RecordStore) -> Vec<Track> {
    let mut tracks = Vec::with_capacity(store.len());
    for id in 0..store.len() {
        if store.claim(id) {
            tracks.push(Track {
                cell_id: tracks.len() as CellId + 1,
                records: vec![id],
            });
        }
    }
    tracks
}
