use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

macro_rules! record_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub String);

        impl $name {
            pub fn next() -> Self {
                static SEQUENCE: AtomicU64 = AtomicU64::new(1);
                let id = SEQUENCE.fetch_add(1, Ordering::Relaxed);
                Self(format!(concat!($prefix, "-{:06}"), id))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

record_id!(
    /// Identifier for an incident ticket.
    IncidentId,
    "inc"
);
record_id!(
    /// Identifier for a response organisation.
    OrganizationId,
    "org"
);
record_id!(
    /// Identifier for a division within an organisation.
    DivisionId,
    "div"
);
record_id!(
    /// Identifier for a staff member.
    StaffId,
    "stf"
);
record_id!(
    /// Identifier for a shelter or hospital.
    FacilityId,
    "fac"
);
record_id!(
    /// Identifier for a queued dispatch job.
    JobId,
    "job"
);
