//! Schedule conflict reporting.
//!
//! Conflicts are reported, never resolved: two open steps that are not in a
//! shared overlap group must not have intersecting scheduled ranges.

use serde::{Deserialize, Serialize};

use super::model::Timeline;

/// Two open steps whose scheduled ranges intersect without being allowed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConflict {
    pub earlier_id: String,
    pub later_id: String,
    /// Minutes by which `earlier` runs past the start of `later`.
    pub overlap_minutes: i64,
}

/// Scan consecutive open steps for ordering conflicts.
///
/// Adjacent open pairs are enough: once every neighbour pair is ordered the
/// whole open sequence is.
pub fn detect_conflicts(timeline: &Timeline) -> Vec<ScheduleConflict> {
    let groups = timeline.overlap_groups();
    let open: Vec<usize> = timeline
        .steps()
        .iter()
        .enumerate()
        .filter(|(_, s)| s.is_open())
        .map(|(pos, _)| pos)
        .collect();

    open.windows(2)
        .filter_map(|pair| {
            let (a_pos, b_pos) = (pair[0], pair[1]);
            if groups.iter().any(|g| g.contains(&a_pos) && g.contains(&b_pos)) {
                return None;
            }
            let a = &timeline.steps()[a_pos];
            let b = &timeline.steps()[b_pos];
            (a.scheduled_end > b.scheduled_start).then(|| ScheduleConflict {
                earlier_id: a.id.clone(),
                later_id: b.id.clone(),
                overlap_minutes: (a.scheduled_end - b.scheduled_start).num_minutes(),
            })
        })
        .collect()
}
