//! Per-level scoring for the assignment engine. Each level scores 0–100 and
//! the levels are combined with fixed weights by the engine.

use crate::domain::{
    Availability, Division, DivisionType, Organization, OrganizationCategory, OrganizationType,
    Staff,
};
use crate::geo::haversine_km;
use serde::Serialize;
use std::collections::BTreeSet;

pub const ORG_WEIGHT: f64 = 0.5;
pub const DIVISION_WEIGHT: f64 = 0.3;
pub const STAFF_WEIGHT: f64 = 0.2;

/// Distance beyond which the distance component bottoms out.
const DISTANCE_HORIZON_KM: f64 = 100.0;

/// One transparent contribution to a level score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreComponent {
    pub factor: &'static str,
    pub points: f64,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelScore {
    pub total: f64,
    pub components: Vec<ScoreComponent>,
}

impl LevelScore {
    fn new(components: Vec<ScoreComponent>) -> Self {
        let total = components.iter().map(|c| c.points).sum();
        Self { total, components }
    }

    pub(crate) fn empty() -> Self {
        Self {
            total: 0.0,
            components: Vec::new(),
        }
    }
}

/// What the ranking needs to know about the triaged incident.
#[derive(Debug, Clone)]
pub struct RankContext {
    pub latitude: f64,
    pub longitude: f64,
    pub category: String,
    pub priority: u8,
    pub required_division_type: DivisionType,
    pub required_skills: BTreeSet<String>,
}

fn distance_fit(points: f64, distance_km: f64) -> f64 {
    points * (1.0 - (distance_km / DISTANCE_HORIZON_KM).min(1.0)).max(0.0)
}

fn headroom_fraction(current_load: u32, capacity: u32) -> f64 {
    (1.0 - current_load as f64 / capacity.max(1) as f64).max(0.0)
}

/// Organisation types allowed to serve a triage category.
pub(crate) fn compatible_org_types(category: &str) -> &'static [OrganizationType] {
    match category {
        "Medical Emergency" => &[
            OrganizationType::Government,
            OrganizationType::Ngo,
            OrganizationType::Private,
        ],
        "Food and Shelter" => &[
            OrganizationType::Government,
            OrganizationType::Ngo,
            OrganizationType::VolunteerGroup,
        ],
        "Infrastructure" => &[OrganizationType::Government, OrganizationType::Private],
        "Flood Rescue" | "Fire Response" | "Rescue" => &[
            OrganizationType::Government,
            OrganizationType::Ngo,
            OrganizationType::VolunteerGroup,
        ],
        _ => &[
            OrganizationType::Government,
            OrganizationType::Ngo,
            OrganizationType::VolunteerGroup,
            OrganizationType::Private,
        ],
    }
}

/// Canonical organisation category for a triage category.
pub(crate) fn canonical_org_category(category: &str) -> OrganizationCategory {
    match category {
        "Flood Rescue" | "Rescue" => OrganizationCategory::Rescue,
        "Fire Response" => OrganizationCategory::EmergencyResponse,
        "Medical Emergency" => OrganizationCategory::Medical,
        "Food and Shelter" => OrganizationCategory::Relief,
        "Infrastructure" => OrganizationCategory::Logistics,
        _ => OrganizationCategory::EmergencyResponse,
    }
}

fn skill_overlap(required: &BTreeSet<String>, offered: &BTreeSet<String>) -> f64 {
    if required.is_empty() {
        return 0.0;
    }
    let matched = required.intersection(offered).count();
    matched as f64 / required.len() as f64
}

/// `distance_fit(30) + type_match(20) + category_match(20) + headroom(30)`.
/// Inactive organisations never reach this function.
pub fn score_organization(context: &RankContext, org: &Organization) -> LevelScore {
    let distance_km = haversine_km(context.latitude, context.longitude, org.latitude, org.longitude);
    let distance_points = distance_fit(30.0, distance_km);

    let type_compatible = compatible_org_types(&context.category).contains(&org.org_type);
    let type_points = if type_compatible { 20.0 } else { 0.0 };

    let category_matches = canonical_org_category(&context.category) == org.category;
    let category_points = if category_matches { 20.0 } else { 0.0 };

    let headroom = headroom_fraction(org.current_load, org.capacity);
    let headroom_points = 30.0 * headroom;

    LevelScore::new(vec![
        ScoreComponent {
            factor: "distance",
            points: distance_points,
            note: format!("{distance_km:.1} km away"),
        },
        ScoreComponent {
            factor: "type_match",
            points: type_points,
            note: format!("org type {:?}", org.org_type),
        },
        ScoreComponent {
            factor: "category_match",
            points: category_points,
            note: format!("org category {:?}", org.category),
        },
        ScoreComponent {
            factor: "headroom",
            points: headroom_points,
            note: format!("{}/{} load", org.current_load, org.capacity),
        },
    ])
}

/// `type_match(50) + headroom(30) + skill_overlap(20)`.
pub fn score_division(context: &RankContext, division: &Division) -> LevelScore {
    let type_points = if division.division_type == context.required_division_type {
        50.0
    } else {
        0.0
    };
    let headroom_points = 30.0 * headroom_fraction(division.current_load, division.capacity);
    let overlap = skill_overlap(&context.required_skills, &division.skills);
    let skill_points = 20.0 * overlap;

    LevelScore::new(vec![
        ScoreComponent {
            factor: "type_match",
            points: type_points,
            note: format!("division type {}", division.division_type.label()),
        },
        ScoreComponent {
            factor: "headroom",
            points: headroom_points,
            note: format!("{}/{} load", division.current_load, division.capacity),
        },
        ScoreComponent {
            factor: "skill_overlap",
            points: skill_points,
            note: format!("{:.0}% of required skills", overlap * 100.0),
        },
    ])
}

/// `availability(40) + skill_overlap(40) + distance_fit(20)`. Busy and
/// off-duty staff are filtered out before scoring.
pub fn score_staff(context: &RankContext, staff: &Staff) -> LevelScore {
    debug_assert_eq!(staff.availability, Availability::Available);

    let (availability_points, distance_points, distance_note) = match staff.location() {
        Some((lat, lon)) => {
            let km = haversine_km(context.latitude, context.longitude, lat, lon);
            (40.0, distance_fit(20.0, km), format!("{km:.1} km away"))
        }
        None => (20.0, 0.0, "location unknown".to_string()),
    };

    let overlap = skill_overlap(&context.required_skills, &staff.skills);
    let skill_points = 40.0 * overlap;

    LevelScore::new(vec![
        ScoreComponent {
            factor: "availability",
            points: availability_points,
            note: staff.availability.label().to_string(),
        },
        ScoreComponent {
            factor: "skill_overlap",
            points: skill_points,
            note: format!("{:.0}% of required skills", overlap * 100.0),
        },
        ScoreComponent {
            factor: "distance",
            points: distance_points,
            note: distance_note,
        },
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::domain::{CapacityStatus, DivisionId, OrganizationId, StaffId, StaffRole};
    use crate::domain::ActivityStatus;

    fn context() -> RankContext {
        RankContext {
            latitude: 17.9689,
            longitude: 79.5941,
            category: "Flood Rescue".to_string(),
            priority: 5,
            required_division_type: DivisionType::Rescue,
            required_skills: ["rescue", "boat"].iter().map(|s| s.to_string()).collect(),
        }
    }

    fn org(load: u32, capacity: u32) -> Organization {
        let now = Utc::now();
        Organization {
            id: OrganizationId::from("org-a"),
            name: "District Rescue".to_string(),
            org_type: OrganizationType::Government,
            category: OrganizationCategory::Rescue,
            region: "warangal".to_string(),
            latitude: 17.9689,
            longitude: 79.5941,
            capacity,
            current_load: load,
            status: CapacityStatus::Available,
            contact_person: None,
            contact_phone: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn colocated_matching_org_scores_full_marks() {
        let score = score_organization(&context(), &org(0, 10));
        assert!((score.total - 100.0).abs() < 1e-9, "got {}", score.total);
    }

    #[test]
    fn distance_component_zeroes_beyond_horizon() {
        let mut far = org(0, 10);
        far.latitude = 8.5;
        far.longitude = 76.9;
        let score = score_organization(&context(), &far);
        let distance = score
            .components
            .iter()
            .find(|c| c.factor == "distance")
            .expect("distance component");
        assert_eq!(distance.points, 0.0);
    }

    #[test]
    fn headroom_shrinks_with_load() {
        let relaxed = score_organization(&context(), &org(1, 10));
        let strained = score_organization(&context(), &org(9, 10));
        assert!(relaxed.total > strained.total);

        let full = score_organization(&context(), &org(10, 10));
        let headroom = full
            .components
            .iter()
            .find(|c| c.factor == "headroom")
            .expect("headroom component");
        assert_eq!(headroom.points, 0.0);
    }

    #[test]
    fn division_type_match_dominates() {
        let now = Utc::now();
        let rescue = Division {
            id: DivisionId::from("div-r"),
            organization_id: OrganizationId::from("org-a"),
            name: "Swift Water".to_string(),
            division_type: DivisionType::Rescue,
            description: None,
            skills: ["rescue", "boat"].iter().map(|s| s.to_string()).collect(),
            capacity: 5,
            current_load: 0,
            status: CapacityStatus::Available,
            created_at: now,
            updated_at: now,
        };
        let mut logistics = rescue.clone();
        logistics.division_type = DivisionType::Logistics;

        let ctx = context();
        assert_eq!(score_division(&ctx, &rescue).total, 100.0);
        assert_eq!(score_division(&ctx, &logistics).total, 50.0);
    }

    #[test]
    fn staff_without_location_gets_reduced_availability_points() {
        let now = Utc::now();
        let located = Staff {
            id: StaffId::from("stf-1"),
            organization_id: OrganizationId::from("org-a"),
            division_id: None,
            name: "K. Rao".to_string(),
            role: StaffRole::Worker,
            skills: ["rescue", "boat"].iter().map(|s| s.to_string()).collect(),
            contact_phone: None,
            contact_email: None,
            availability: Availability::Available,
            latitude: Some(17.9689),
            longitude: Some(79.5941),
            status: ActivityStatus::Active,
            created_at: now,
            updated_at: now,
        };
        let mut unlocated = located.clone();
        unlocated.latitude = None;
        unlocated.longitude = None;

        let ctx = context();
        assert_eq!(score_staff(&ctx, &located).total, 100.0);
        assert_eq!(score_staff(&ctx, &unlocated).total, 60.0);
    }

    #[test]
    fn empty_required_skills_score_no_overlap_points() {
        let mut ctx = context();
        ctx.required_skills.clear();
        let score = score_organization(&ctx, &org(0, 10));
        assert!(score.total > 0.0);
    }
}
