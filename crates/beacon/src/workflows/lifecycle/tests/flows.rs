use super::common::*;
use crate::domain::{
    AuditKind, Availability, CapacityStatus, IncidentStatus, OrganizationId, StaffId,
};
use crate::error::CoreError;
use crate::workflows::lifecycle::CandidateSelection;

fn selection(org: &str, division: Option<&str>, staff: Option<&str>) -> CandidateSelection {
    CandidateSelection {
        organization_id: OrganizationId::from(org),
        division_id: division.map(crate::domain::DivisionId::from),
        staff_id: staff.map(StaffId::from),
    }
}

#[tokio::test]
async fn happy_path_returns_capacity_and_completes() {
    let store = seeded_store();
    let coordinator = coordinator(store.clone());
    let now = fixed_now();

    let incident = coordinator
        .create(&admin(), flood_report(), now)
        .await
        .expect("incident created");
    assert_eq!(incident.status, IncidentStatus::Pending);
    let triage = incident.triage.as_ref().expect("triage stored inline");
    assert_eq!(triage.category, "Flood Rescue");
    assert_eq!(triage.priority, 5);
    assert_eq!(
        triage.required_division_type,
        crate::domain::DivisionType::Rescue
    );

    let before_load = store.read(|state| {
        state
            .organization(&OrganizationId::from("org-a"))
            .expect("org")
            .current_load
    });

    coordinator
        .start_window(
            &admin(),
            &incident.id,
            selection("org-a", Some("div-a"), Some("stf-a")),
            now,
        )
        .expect("window opens");

    store.read(|state| {
        let org = state.organization(&OrganizationId::from("org-a")).expect("org");
        assert_eq!(org.current_load, before_load + 1);
        // Staff stays available until acceptance.
        let staff = state.staff_member(&StaffId::from("stf-a")).expect("staff");
        assert_eq!(staff.availability, Availability::Available);
    });

    let accepted = coordinator
        .accept(&responder("stf-a"), &incident.id, None, now)
        .expect("accepted");
    assert_eq!(accepted.status, IncidentStatus::InProgress);
    assert!(accepted.assignment_deadline.is_none());
    store.read(|state| {
        let staff = state.staff_member(&StaffId::from("stf-a")).expect("staff");
        assert_eq!(staff.availability, Availability::Busy);
    });

    let done = coordinator
        .complete(&responder("stf-a"), &incident.id, now)
        .expect("completed");
    assert_eq!(done.status, IncidentStatus::Done);
    assert_eq!(done.actual_completion, Some(now));

    store.read(|state| {
        let org = state.organization(&OrganizationId::from("org-a")).expect("org");
        assert_eq!(org.current_load, before_load);
        let staff = state.staff_member(&StaffId::from("stf-a")).expect("staff");
        assert_eq!(staff.availability, Availability::Available);
    });
}

#[tokio::test]
async fn reject_releases_load_and_reassigns_to_next_best() {
    let store = seeded_store();
    let coordinator = coordinator(store.clone());
    let now = fixed_now();

    let incident = coordinator
        .create(&admin(), flood_report(), now)
        .await
        .expect("created");
    coordinator
        .start_window(
            &admin(),
            &incident.id,
            selection("org-a", Some("div-a"), Some("stf-a")),
            now,
        )
        .expect("window opens");

    let outcome = coordinator
        .reject(
            &responder("stf-a"),
            &incident.id,
            "Organization unavailable",
            now,
        )
        .expect("rejected");

    // Org A load is back to its pre-assignment value, org B carries the
    // fresh window.
    store.read(|state| {
        let org_a = state.organization(&OrganizationId::from("org-a")).expect("org a");
        assert_eq!(org_a.current_load, 0);
        let org_b = state.organization(&OrganizationId::from("org-b")).expect("org b");
        assert_eq!(org_b.current_load, 1);
    });

    let reassigned = outcome.reassigned_to.expect("auto-reassigned");
    assert_eq!(reassigned.organization_id.as_str(), "org-b");
    assert_eq!(
        reassigned.assignment_deadline,
        now + chrono::Duration::seconds(600)
    );
    assert_eq!(outcome.incident.status, IncidentStatus::PendingAssignment);

    // Cooldown keeps org A out of re-ranking.
    let ranked = coordinator
        .rank_candidates(&admin(), &incident.id, now)
        .expect("ranking works");
    assert!(ranked
        .iter()
        .all(|candidate| candidate.organization.id.as_str() != "org-a"));

    // Audit order: reject on A, then the fresh window on B.
    store.read(|state| {
        let kinds: Vec<AuditKind> = state
            .audit
            .iter()
            .filter(|event| event.incident_id.as_ref() == Some(&incident.id))
            .map(|event| event.kind)
            .collect();
        let reject_pos = kinds
            .iter()
            .position(|kind| *kind == AuditKind::Reject)
            .expect("reject audited");
        let rewindow_pos = kinds
            .iter()
            .rposition(|kind| *kind == AuditKind::StartWindow)
            .expect("fresh window audited");
        assert!(reject_pos < rewindow_pos);
        let reject_event = state
            .audit
            .iter()
            .find(|event| event.kind == AuditKind::Reject)
            .expect("reject event");
        assert!(reject_event.detail.contains("Organization unavailable"));
        assert!(reject_event.detail.contains("org-a"));
    });
}

#[tokio::test]
async fn saturated_region_escalates_and_marks_overloaded() {
    let store = seeded_store();
    store
        .with_tx(|state| {
            for id in ["org-a", "org-b"] {
                let org = state.organization_mut(&OrganizationId::from(id)).expect("org");
                org.current_load = org.capacity;
                org.status = CapacityStatus::Overloaded;
            }
            Ok(())
        })
        .expect("saturate fleet");
    let coordinator = coordinator(store.clone());
    let now = fixed_now();

    let incident = coordinator
        .create(&admin(), flood_report(), now)
        .await
        .expect("created");
    assert_eq!(incident.priority, 5);

    let ranked = coordinator
        .rank_candidates(&admin(), &incident.id, now)
        .expect("ranking");
    assert!(!ranked.is_empty());
    assert!(ranked[0].breakdown.overflow);

    coordinator
        .start_window(
            &admin(),
            &incident.id,
            CandidateSelection::from(&ranked[0]),
            now,
        )
        .expect("escalated assignment succeeds");

    store.read(|state| {
        let org = state
            .organization(&ranked[0].organization.id)
            .expect("org");
        assert!(org.current_load > org.capacity);
        assert_eq!(org.status, CapacityStatus::Overloaded);
    });
}

#[tokio::test]
async fn accepting_twice_is_a_no_op() {
    let store = seeded_store();
    let coordinator = coordinator(store.clone());
    let now = fixed_now();

    let incident = coordinator
        .create(&admin(), flood_report(), now)
        .await
        .expect("created");
    coordinator
        .start_window(
            &admin(),
            &incident.id,
            selection("org-a", Some("div-a"), Some("stf-a")),
            now,
        )
        .expect("window opens");
    coordinator
        .accept(&responder("stf-a"), &incident.id, None, now)
        .expect("first accept");

    let audit_before = store.read(|state| state.audit.len());
    let second = coordinator
        .accept(&responder("stf-a"), &incident.id, None, now)
        .expect("second accept is a no-op");
    assert_eq!(second.status, IncidentStatus::InProgress);
    assert_eq!(store.read(|state| state.audit.len()), audit_before);
}

#[tokio::test]
async fn only_the_assigned_responder_may_act() {
    let store = seeded_store();
    let coordinator = coordinator(store.clone());
    let now = fixed_now();

    let incident = coordinator
        .create(&admin(), flood_report(), now)
        .await
        .expect("created");
    coordinator
        .start_window(
            &admin(),
            &incident.id,
            selection("org-a", Some("div-a"), Some("stf-a")),
            now,
        )
        .expect("window opens");

    let err = coordinator
        .accept(&responder("stf-b"), &incident.id, None, now)
        .expect_err("other responder denied");
    assert!(matches!(err, CoreError::Forbidden { .. }));

    let err = coordinator
        .complete(&admin(), &incident.id, now)
        .expect_err("admin cannot complete on behalf of staff");
    assert!(matches!(err, CoreError::Forbidden { .. }));
}

#[tokio::test]
async fn start_window_detects_stale_candidates() {
    let store = seeded_store();
    let coordinator = coordinator(store.clone());
    let now = fixed_now();

    let incident = coordinator
        .create(&admin(), flood_report(), now)
        .await
        .expect("created");

    // The staff member turned busy between ranking and assignment.
    store
        .with_tx(|state| {
            state
                .staff_member_mut(&StaffId::from("stf-a"))
                .expect("staff")
                .availability = Availability::Busy;
            Ok(())
        })
        .expect("mutate staff");

    let err = coordinator
        .start_window(
            &admin(),
            &incident.id,
            selection("org-a", Some("div-a"), Some("stf-a")),
            now,
        )
        .expect_err("stale candidate rejected");
    assert!(matches!(err, CoreError::StaleSnapshot(_)));
}

#[tokio::test]
async fn complete_requires_in_progress() {
    let store = seeded_store();
    let coordinator = coordinator(store);
    let now = fixed_now();

    let incident = coordinator
        .create(&admin(), flood_report(), now)
        .await
        .expect("created");
    // Not assigned to anyone yet, so the ownership rule denies before the
    // state check can run.
    let err = coordinator
        .complete(&responder("stf-a"), &incident.id, now)
        .expect_err("complete from pending denied");
    assert!(matches!(err, CoreError::Forbidden { .. }));
}

#[tokio::test]
async fn cancel_releases_capacity_and_is_admin_only() {
    let store = seeded_store();
    let coordinator = coordinator(store.clone());
    let now = fixed_now();

    let incident = coordinator
        .create(&admin(), flood_report(), now)
        .await
        .expect("created");
    coordinator
        .start_window(
            &admin(),
            &incident.id,
            selection("org-a", Some("div-a"), Some("stf-a")),
            now,
        )
        .expect("window opens");
    coordinator
        .accept(&responder("stf-a"), &incident.id, None, now)
        .expect("accepted");

    let err = coordinator
        .cancel(&responder("stf-a"), &incident.id, now)
        .expect_err("responder cannot cancel");
    assert!(matches!(err, CoreError::Forbidden { .. }));

    let cancelled = coordinator
        .cancel(&admin(), &incident.id, now)
        .expect("admin cancels");
    assert_eq!(cancelled.status, IncidentStatus::Cancelled);
    store.read(|state| {
        let org = state.organization(&OrganizationId::from("org-a")).expect("org");
        assert_eq!(org.current_load, 0);
        let staff = state.staff_member(&StaffId::from("stf-a")).expect("staff");
        assert_eq!(staff.availability, Availability::Available);
    });
}

#[tokio::test]
async fn external_id_resubmission_returns_the_existing_ticket() {
    let store = seeded_store();
    let coordinator = coordinator(store.clone());
    let now = fixed_now();

    let mut draft = flood_report();
    draft.external_id = Some("APP-DEMO-001".to_string());
    let first = coordinator
        .create(&admin(), draft.clone(), now)
        .await
        .expect("first create");
    let second = coordinator
        .create(&admin(), draft, now)
        .await
        .expect("second create is idempotent");
    assert_eq!(first.id, second.id);
    assert_eq!(store.read(|state| state.incidents.len()), 1);
}
