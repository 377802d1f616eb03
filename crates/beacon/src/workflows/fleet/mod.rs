//! Fleet management: admin CRUD over organisations, divisions, and staff.
//! Creating a staff member can provision responder credentials so field
//! acceptance works end to end.

pub mod router;

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::domain::{
    ActivityStatus, Availability, CapacityStatus, Division, DivisionId, DivisionType, Organization,
    OrganizationCategory, OrganizationId, OrganizationType, Staff, StaffId, StaffRole,
};
use crate::error::CoreError;
use crate::identity::{Principal, Role, UserDirectory};
use crate::store::MemoryStore;
use crate::workflows::lifecycle::{authorize, Action};
use crate::workflows::workload::capacity_status;

#[derive(Debug, Clone, Deserialize)]
pub struct OrganizationDraft {
    pub name: String,
    pub org_type: OrganizationType,
    pub category: OrganizationCategory,
    #[serde(default)]
    pub region: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub capacity: u32,
    pub contact_person: Option<String>,
    pub contact_phone: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrganizationPatch {
    pub name: Option<String>,
    pub region: Option<String>,
    pub capacity: Option<u32>,
    pub status: Option<CapacityStatus>,
    pub contact_person: Option<String>,
    pub contact_phone: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DivisionDraft {
    pub organization_id: OrganizationId,
    pub name: String,
    pub division_type: DivisionType,
    pub description: Option<String>,
    #[serde(default)]
    pub skills: BTreeSet<String>,
    #[serde(default)]
    pub capacity: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StaffCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StaffDraft {
    pub organization_id: OrganizationId,
    pub division_id: Option<DivisionId>,
    pub name: String,
    pub role: StaffRole,
    #[serde(default)]
    pub skills: BTreeSet<String>,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub credentials: Option<StaffCredentials>,
}

pub struct FleetService {
    store: Arc<MemoryStore>,
    users: Arc<UserDirectory>,
}

impl FleetService {
    pub fn new(store: Arc<MemoryStore>, users: Arc<UserDirectory>) -> Self {
        Self { store, users }
    }

    pub fn create_organization(
        &self,
        principal: &Principal,
        draft: OrganizationDraft,
        now: DateTime<Utc>,
    ) -> Result<Organization, CoreError> {
        authorize(principal, Action::ManageFleet, None)?;
        if draft.name.trim().is_empty() {
            return Err(CoreError::invalid_input("name", "organization name required"));
        }
        self.store.with_tx(move |state| {
            let organization = Organization {
                id: OrganizationId::next(),
                name: draft.name,
                org_type: draft.org_type,
                category: draft.category,
                region: draft.region,
                latitude: draft.latitude,
                longitude: draft.longitude,
                capacity: draft.capacity,
                current_load: 0,
                status: capacity_status(0, draft.capacity),
                contact_person: draft.contact_person,
                contact_phone: draft.contact_phone,
                created_at: now,
                updated_at: now,
            };
            state
                .organizations
                .insert(organization.id.clone(), organization.clone());
            Ok(organization)
        })
    }

    pub fn update_organization(
        &self,
        principal: &Principal,
        id: &OrganizationId,
        patch: OrganizationPatch,
        now: DateTime<Utc>,
    ) -> Result<Organization, CoreError> {
        authorize(principal, Action::ManageFleet, None)?;
        self.store.with_tx(move |state| {
            let organization = state.organization_mut(id)?;
            if let Some(name) = patch.name {
                organization.name = name;
            }
            if let Some(region) = patch.region {
                organization.region = region;
            }
            if let Some(capacity) = patch.capacity {
                organization.capacity = capacity;
            }
            if let Some(status) = patch.status {
                organization.status = status;
            }
            if let Some(contact_person) = patch.contact_person {
                organization.contact_person = Some(contact_person);
            }
            if let Some(contact_phone) = patch.contact_phone {
                organization.contact_phone = Some(contact_phone);
            }
            if organization.status != CapacityStatus::Inactive {
                organization.status =
                    capacity_status(organization.current_load, organization.capacity);
            }
            organization.updated_at = now;
            Ok(organization.clone())
        })
    }

    pub fn delete_organization(
        &self,
        principal: &Principal,
        id: &OrganizationId,
    ) -> Result<(), CoreError> {
        authorize(principal, Action::ManageFleet, None)?;
        self.store.with_tx(move |state| {
            let organization = state.organization(id)?;
            if organization.current_load > 0 {
                return Err(CoreError::Conflict(format!(
                    "organization {id} still holds {} active assignment(s)",
                    organization.current_load
                )));
            }
            if state
                .divisions
                .values()
                .any(|division| &division.organization_id == id)
            {
                return Err(CoreError::Conflict(format!(
                    "organization {id} still has divisions"
                )));
            }
            state.organizations.remove(id);
            Ok(())
        })
    }

    pub fn list_organizations(&self, principal: &Principal) -> Result<Vec<Organization>, CoreError> {
        authorize(principal, Action::ManageFleet, None)?;
        Ok(self
            .store
            .read(|state| state.organizations.values().cloned().collect()))
    }

    pub fn create_division(
        &self,
        principal: &Principal,
        draft: DivisionDraft,
        now: DateTime<Utc>,
    ) -> Result<Division, CoreError> {
        authorize(principal, Action::ManageFleet, None)?;
        self.store.with_tx(move |state| {
            let parent = state.organization(&draft.organization_id)?;
            if parent.status == CapacityStatus::Inactive {
                return Err(CoreError::Conflict(format!(
                    "organization {} is inactive",
                    draft.organization_id
                )));
            }
            let division = Division {
                id: DivisionId::next(),
                organization_id: draft.organization_id,
                name: draft.name,
                division_type: draft.division_type,
                description: draft.description,
                skills: draft.skills,
                capacity: draft.capacity,
                current_load: 0,
                status: capacity_status(0, draft.capacity),
                created_at: now,
                updated_at: now,
            };
            state.divisions.insert(division.id.clone(), division.clone());
            Ok(division)
        })
    }

    pub fn delete_division(
        &self,
        principal: &Principal,
        id: &DivisionId,
    ) -> Result<(), CoreError> {
        authorize(principal, Action::ManageFleet, None)?;
        self.store.with_tx(move |state| {
            let division = state.division(id)?;
            if division.current_load > 0 {
                return Err(CoreError::Conflict(format!(
                    "division {id} still holds active assignments"
                )));
            }
            state.divisions.remove(id);
            Ok(())
        })
    }

    pub fn list_divisions(&self, principal: &Principal) -> Result<Vec<Division>, CoreError> {
        authorize(principal, Action::ManageFleet, None)?;
        Ok(self
            .store
            .read(|state| state.divisions.values().cloned().collect()))
    }

    pub fn create_staff(
        &self,
        principal: &Principal,
        draft: StaffDraft,
        now: DateTime<Utc>,
    ) -> Result<Staff, CoreError> {
        authorize(principal, Action::ManageFleet, None)?;
        let credentials = draft.credentials.clone();
        let staff = self.store.with_tx(move |state| {
            state.organization(&draft.organization_id)?;
            if let Some(division_id) = &draft.division_id {
                let division = state.division(division_id)?;
                if division.organization_id != draft.organization_id {
                    return Err(CoreError::invalid_input(
                        "division_id",
                        "division belongs to a different organization",
                    ));
                }
            }
            let staff = Staff {
                id: StaffId::next(),
                organization_id: draft.organization_id,
                division_id: draft.division_id,
                name: draft.name,
                role: draft.role,
                skills: draft.skills,
                contact_phone: draft.contact_phone,
                contact_email: draft.contact_email,
                availability: Availability::Available,
                latitude: draft.latitude,
                longitude: draft.longitude,
                status: ActivityStatus::Active,
                created_at: now,
                updated_at: now,
            };
            state.staff.insert(staff.id.clone(), staff.clone());
            Ok(staff)
        })?;

        if let Some(credentials) = credentials {
            self.users.register(
                credentials.username,
                &credentials.password,
                Role::Responder,
                Some(staff.id.clone()),
            );
        }
        Ok(staff)
    }

    pub fn delete_staff(&self, principal: &Principal, id: &StaffId) -> Result<(), CoreError> {
        authorize(principal, Action::ManageFleet, None)?;
        self.store.with_tx(move |state| {
            let staff = state.staff_member(id)?;
            if staff.availability == Availability::Busy {
                return Err(CoreError::Conflict(format!(
                    "staff {id} is busy on an active assignment"
                )));
            }
            state.staff.remove(id);
            Ok(())
        })
    }

    pub fn list_staff(&self, principal: &Principal) -> Result<Vec<Staff>, CoreError> {
        authorize(principal, Action::ManageFleet, None)?;
        Ok(self.store.read(|state| state.staff.values().cloned().collect()))
    }
}
