//! The coordination core's subsystems: triage, assignment, lifecycle,
//! workload accounting, mobile intake, outbound dispatch, and fleet
//! management.

pub mod assignment;
pub mod dispatch;
pub mod fleet;
pub mod intake;
pub mod lifecycle;
pub mod triage;
pub mod workload;
