//! Priority-lane mapping from triage priority and verification flags.

use crate::domain::Lane;

/// `priority >= 5` without review flags rides `p0`; duplicates drop one lane
/// unless they are already on `p0`.
pub fn lane_for(priority: u8, requires_review: bool, likely_duplicate: bool) -> Lane {
    let lane = if priority >= 5 && !requires_review {
        Lane::P0
    } else if priority == 4 {
        Lane::P1
    } else if priority == 3 {
        Lane::P2
    } else {
        Lane::P3
    };

    if likely_duplicate && lane != Lane::P0 {
        lane.downgraded()
    } else {
        lane
    }
}
