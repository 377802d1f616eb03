use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use crate::domain::{
    ActivityStatus, Availability, CapacityStatus, Division, DivisionId, DivisionType, Organization,
    OrganizationCategory, OrganizationId, OrganizationType, Staff, StaffId, StaffRole,
};
use crate::identity::{Principal, Role};
use crate::store::MemoryStore;
use crate::workflows::lifecycle::{LifecycleCoordinator, LifecycleSettings, NewIncident};
use crate::workflows::triage::TriageService;

pub(super) fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 12, 10, 0, 0).single().expect("valid instant")
}

pub(super) fn admin() -> Principal {
    Principal {
        username: "ops-admin".to_string(),
        role: Role::Admin,
        staff_id: None,
    }
}

pub(super) fn responder(staff_id: &str) -> Principal {
    Principal {
        username: format!("responder-{staff_id}"),
        role: Role::Responder,
        staff_id: Some(StaffId::from(staff_id)),
    }
}

pub(super) fn organization(id: &str, name: &str, load: u32, capacity: u32) -> Organization {
    let now = fixed_now();
    Organization {
        id: OrganizationId::from(id),
        name: name.to_string(),
        org_type: OrganizationType::Government,
        category: OrganizationCategory::Rescue,
        region: "warangal".to_string(),
        latitude: 17.9689,
        longitude: 79.5941,
        capacity,
        current_load: load,
        status: if capacity > 0 && load >= capacity {
            CapacityStatus::Overloaded
        } else {
            CapacityStatus::Available
        },
        contact_person: None,
        contact_phone: None,
        created_at: now,
        updated_at: now,
    }
}

pub(super) fn division(id: &str, org_id: &str) -> Division {
    let now = fixed_now();
    Division {
        id: DivisionId::from(id),
        organization_id: OrganizationId::from(org_id),
        name: format!("Division {id}"),
        division_type: DivisionType::Rescue,
        description: None,
        skills: ["rescue", "boat"].iter().map(|s| s.to_string()).collect(),
        capacity: 5,
        current_load: 0,
        status: CapacityStatus::Available,
        created_at: now,
        updated_at: now,
    }
}

pub(super) fn staff(id: &str, org_id: &str, division_id: Option<&str>) -> Staff {
    let now = fixed_now();
    Staff {
        id: StaffId::from(id),
        organization_id: OrganizationId::from(org_id),
        division_id: division_id.map(DivisionId::from),
        name: format!("Responder {id}"),
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
    }
}

/// Store with two rescue organisations near the flood scenario coordinates.
pub(super) fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store
        .with_tx(|state| {
            for org in [
                organization("org-a", "District Rescue A", 0, 3),
                organization("org-b", "District Rescue B", 0, 3),
            ] {
                state.organizations.insert(org.id.clone(), org);
            }
            for div in [division("div-a", "org-a"), division("div-b", "org-b")] {
                state.divisions.insert(div.id.clone(), div);
            }
            for member in [
                staff("stf-a", "org-a", Some("div-a")),
                staff("stf-b", "org-b", Some("div-b")),
            ] {
                state.staff.insert(member.id.clone(), member);
            }
            Ok(())
        })
        .expect("seed commits");
    store
}

pub(super) fn coordinator(store: Arc<MemoryStore>) -> LifecycleCoordinator {
    LifecycleCoordinator::new(
        store,
        Arc::new(TriageService::rules_only()),
        LifecycleSettings::new(Duration::from_secs(600), Duration::from_secs(900)),
    )
}

pub(super) fn flood_report() -> NewIncident {
    NewIncident {
        external_id: None,
        source: "intake".to_string(),
        text: "Flood water entered homes, children trapped".to_string(),
        voice_transcript: None,
        category_hint: None,
        place: "Warangal Urban".to_string(),
        latitude: 17.9689,
        longitude: 79.5941,
        people_affected: 12,
        notes: None,
    }
}
