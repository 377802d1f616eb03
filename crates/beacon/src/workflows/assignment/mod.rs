//! Assignment engine: rank organisations, divisions, and staff for a triaged
//! incident. Pure over a fleet snapshot (no mutation, no I/O) so the
//! coordinator can re-validate the chosen rows in its own transaction.

pub mod scoring;
pub mod snapshot;

use std::collections::BTreeSet;

use serde::Serialize;

use crate::domain::{
    ActivityStatus, Availability, CapacityStatus, Division, DivisionType, Incident, Organization,
    OrganizationId, Staff,
};
pub use scoring::{LevelScore, RankContext, ScoreComponent};
pub use snapshot::FleetSnapshot;
use scoring::{DIVISION_WEIGHT, ORG_WEIGHT, STAFF_WEIGHT};

/// One ranked (org, division?, staff?) proposal with its score trail.
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub organization: Organization,
    pub division: Option<Division>,
    pub staff: Option<Staff>,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoreBreakdown {
    pub organization: LevelScore,
    pub division: LevelScore,
    pub staff: LevelScore,
    /// Set when capacity escalation admitted organisations that are full.
    pub overflow: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AssignmentEngine;

impl AssignmentEngine {
    pub fn new() -> Self {
        Self
    }

    /// Ranking context for a triaged incident; triage fields win over the raw
    /// report where both exist.
    pub fn context_for(incident: &Incident) -> RankContext {
        let (category, division_type, skills) = match &incident.triage {
            Some(triage) => (
                triage.category.clone(),
                triage.required_division_type,
                triage.required_skills.clone(),
            ),
            None => (incident.category.clone(), DivisionType::Rescue, BTreeSet::new()),
        };
        RankContext {
            latitude: incident.latitude,
            longitude: incident.longitude,
            category,
            priority: incident.priority,
            required_division_type: division_type,
            required_skills: skills,
        }
    }

    /// Score and order all eligible candidates, best first. Returns an empty
    /// ranking only when no active organisation exists at all.
    pub fn rank(
        &self,
        context: &RankContext,
        fleet: &FleetSnapshot,
        excluded_organizations: &BTreeSet<OrganizationId>,
    ) -> Vec<Candidate> {
        let eligible: Vec<&Organization> = fleet
            .organizations
            .iter()
            .filter(|org| org.status != CapacityStatus::Inactive)
            .filter(|org| !excluded_organizations.contains(&org.id))
            .collect();

        let with_headroom: Vec<&Organization> = eligible
            .iter()
            .copied()
            .filter(|org| !org.at_capacity())
            .collect();

        // Full organisations are admitted only when nothing in the region has
        // headroom; priority-5 escalation is the primary consumer, and the
        // breakdown carries an overflow warning either way.
        let (pool, overflow) = if with_headroom.is_empty() {
            (eligible, true)
        } else {
            (with_headroom, false)
        };

        let mut candidates: Vec<Candidate> = pool
            .into_iter()
            .map(|org| self.candidate_for(context, fleet, org, overflow))
            .collect();

        candidates.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.organization.headroom().cmp(&a.organization.headroom()))
                .then_with(|| {
                    org_distance(context, &a.organization)
                        .total_cmp(&org_distance(context, &b.organization))
                })
                .then_with(|| a.organization.id.cmp(&b.organization.id))
        });
        candidates
    }

    fn candidate_for(
        &self,
        context: &RankContext,
        fleet: &FleetSnapshot,
        org: &Organization,
        overflow: bool,
    ) -> Candidate {
        let org_score = scoring::score_organization(context, org);

        let division = fleet
            .divisions
            .iter()
            .filter(|division| division.organization_id == org.id)
            .filter(|division| division.status != CapacityStatus::Inactive)
            .filter(|division| overflow || !division.at_capacity())
            .map(|division| (division, scoring::score_division(context, division)))
            .max_by(|a, b| {
                a.1.total
                    .total_cmp(&b.1.total)
                    .then_with(|| b.0.id.cmp(&a.0.id))
            });

        let staff = fleet
            .staff
            .iter()
            .filter(|member| member.organization_id == org.id)
            .filter(|member| member.status == ActivityStatus::Active)
            .filter(|member| member.availability == Availability::Available)
            .map(|member| (member, scoring::score_staff(context, member)))
            .max_by(|a, b| {
                a.1.total
                    .total_cmp(&b.1.total)
                    .then_with(|| b.0.id.cmp(&a.0.id))
            });

        let (division, division_score) = match division {
            Some((division, score)) => (Some(division.clone()), score),
            None => (None, LevelScore::empty()),
        };
        let (staff, staff_score) = match staff {
            Some((member, score)) => (Some(member.clone()), score),
            None => (None, LevelScore::empty()),
        };

        let score = ORG_WEIGHT * org_score.total
            + DIVISION_WEIGHT * division_score.total
            + STAFF_WEIGHT * staff_score.total;

        Candidate {
            organization: org.clone(),
            division,
            staff,
            score,
            breakdown: ScoreBreakdown {
                organization: org_score,
                division: division_score,
                staff: staff_score,
                overflow,
            },
        }
    }
}

fn org_distance(context: &RankContext, org: &Organization) -> f64 {
    crate::geo::haversine_km(context.latitude, context.longitude, org.latitude, org.longitude)
}
