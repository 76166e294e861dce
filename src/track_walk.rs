use crate::lineage_seed::Track;
use crate::record_store::RecordStore;

/// Extends `track` frame by frame until its newest record has no unclaimed
/// successor. Every successor found in a step is appended and claimed; the
/// last one appended becomes the record the next step continues from.
pub fn walk(store: &mut RecordStore, mut track: Track) -> Track {
    while let Some(current) = track.last() {
        let record = store.get(current);
        let next = store.successors(record.frame, record.object_id, record.track_label);
        if next.is_empty() {
            break;
        }
        if next.len() > 1 {
            log::debug!(
                "cell {}: {} successors of frame {} object {}",
                track.cell_id,
                next.len(),
                record.frame,
                record.object_id
            );
        }
        for id in next {
            if store.claim(id) {
                track.records.push(id);
            }
        }
    }
    track
}

/// Walks seeds one at a time, in order, so that each walk sees the records
/// claimed by the ones before it.
pub fn walk_all(store: &mut RecordStore, seeds: Vec<Track>) -> Vec<Track> {
    let tracks: Vec<Track> = seeds.into_iter().map(|seed| walk(store, seed)).collect();
    log::info!(
        "walked {} track(s) covering {} of {} record(s)",
        tracks.len(),
        store.claimed_count(),
        store.len()
    );
    tracks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lineage_seed::seed;
    use crate::record_store::tests::{rec, store};
    use celltrace_protocol::LinkType;

    #[test]
    fn test_walk_follows_chain() {
        let mut s = store(vec![
            rec(1, 1, LinkType::Start, (0, 0), 1),
            rec(2, 1, LinkType::Continuation, (1, 1), 1),
            rec(3, 2, LinkType::Continuation, (2, 1), 1),
        ]);
        let seeds = seed(&mut s).seeds;
        let tracks = walk_all(&mut s, seeds);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].records, vec![0, 1, 2]);
        assert_eq!(s.claimed_count(), 3);
    }

    #[test]
    fn test_walk_stops_at_label_change() {
        let mut s = store(vec![
            rec(1, 1, LinkType::Start, (0, 0), 1),
            rec(2, 1, LinkType::Continuation, (1, 1), 2),
        ]);
        let seeds = seed(&mut s).seeds;
        let tracks = walk_all(&mut s, seeds);
        assert_eq!(tracks[0].records, vec![0]);
        assert!(!s.is_claimed(1));
    }

    #[test]
    fn test_walk_does_not_take_sister_daughter() {
        // Mother 1 in frames 1-2 divides into (3,1) primary and (3,2) sister.
        let mut s = store(vec![
            rec(1, 1, LinkType::Start, (0, 0), 1),
            rec(2, 1, LinkType::Continuation, (1, 1), 1),
            rec(3, 1, LinkType::DivisionPrimary, (2, 1), 2),
            rec(3, 2, LinkType::Continuation, (2, 1), 1),
            rec(4, 1, LinkType::Continuation, (3, 1), 2),
            rec(4, 2, LinkType::Continuation, (3, 2), 1),
        ]);
        let seeds = seed(&mut s).seeds;
        let tracks = walk_all(&mut s, seeds);
        let keys: Vec<Vec<_>> = tracks
            .iter()
            .map(|t| t.records.iter().map(|id| s.get(*id).key()).collect())
            .collect();
        assert_eq!(
            keys,
            vec![
                vec![(1, 1), (2, 1)],
                vec![(3, 1), (4, 1)],
                vec![(3, 2), (4, 2)],
            ]
        );
        assert_eq!(s.claimed_count(), 6);
    }

    #[test]
    fn test_walk_appends_every_match_and_continues_from_last() {
        let mut s = store(vec![
            rec(1, 1, LinkType::Start, (0, 0), 1),
            rec(2, 1, LinkType::Continuation, (1, 1), 1),
            rec(2, 2, LinkType::Continuation, (1, 1), 1),
            rec(3, 1, LinkType::Continuation, (2, 1), 1),
            rec(3, 2, LinkType::Continuation, (2, 2), 1),
        ]);
        let track = walk(
            &mut s,
            Track {
                cell_id: 1,
                records: vec![0],
            },
        );
        let keys: Vec<_> = track.records.iter().map(|id| s.get(*id).key()).collect();
        assert_eq!(keys, vec![(1, 1), (2, 1), (2, 2), (3, 2)]);
        assert!(!s.is_claimed(3));
    }

    #[test]
    fn test_walk_long_chain_is_iterative() {
        let n = 50_000;
        let records = (1..=n)
            .map(|f| {
                let link = if f == 1 {
                    LinkType::Start
                } else {
                    LinkType::Continuation
                };
                let parent = if f == 1 { (0, 0) } else { (f - 1, 1) };
                rec(f, 1, link, parent, 1)
            })
            .collect();
        let mut s = store(records);
        let seeds = seed(&mut s).seeds;
        let tracks = walk_all(&mut s, seeds);
        assert_eq!(tracks[0].len(), n as usize);
    }
}
