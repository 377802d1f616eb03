//! Tracing bootstrap for the coordination service.
//!
//! Request-path modules attach their own structured fields (`incident_id`,
//! `job_id`, lanes, scores); this module only installs the subscriber. The
//! outbound HTTP stack (reqwest and friends) is capped at `warn` by default
//! so classifier and weather calls do not drown the lifecycle logs.

use crate::config::TelemetryConfig;
use std::fmt;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::EnvFilter;

/// Crates whose chatter is capped unless the operator overrides via
/// `RUST_LOG`.
const QUIET_DEPENDENCIES: &[&str] = &["hyper", "hyper_util", "reqwest", "h2", "rustls"];

#[derive(Debug)]
pub enum TelemetryError {
    InvalidDirective { directive: String, source: ParseError },
    Install(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for TelemetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryError::InvalidDirective { directive, .. } => {
                write!(f, "cannot build log filter from '{directive}'")
            }
            TelemetryError::Install(err) => {
                write!(f, "tracing subscriber already installed: {err}")
            }
        }
    }
}

impl std::error::Error for TelemetryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TelemetryError::InvalidDirective { source, .. } => Some(source),
            TelemetryError::Install(err) => Some(&**err),
        }
    }
}

/// Filter directives for the configured level: the service at `log_level`,
/// dependency noise capped at `warn`.
fn filter_directives(log_level: &str) -> String {
    let mut directives = vec![log_level.trim().to_string()];
    directives.extend(
        QUIET_DEPENDENCIES
            .iter()
            .map(|target| format!("{target}=warn")),
    );
    directives.join(",")
}

fn build_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directive = filter_directives(&config.log_level);
    EnvFilter::try_new(&directive).map_err(|source| TelemetryError::InvalidDirective {
        directive,
        source,
    })
}

pub fn init(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    tracing_subscriber::fmt()
        .with_env_filter(build_filter(config)?)
        .with_target(false)
        .compact()
        .with_ansi(false)
        .try_init()
        .map_err(TelemetryError::Install)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_cap_the_http_stack_at_warn() {
        let directives = filter_directives("debug");
        assert!(directives.starts_with("debug,"));
        assert!(directives.contains("reqwest=warn"));
        assert!(directives.contains("hyper=warn"));
    }

    #[test]
    fn configured_level_survives_trimming() {
        assert!(filter_directives("  info ").starts_with("info,"));
    }

    #[test]
    fn invalid_levels_are_rejected() {
        // Checked against the directive parser directly so an ambient
        // RUST_LOG cannot short-circuit the fallback path under test.
        let directive = filter_directives("shouting!!");
        assert!(EnvFilter::try_new(&directive).is_err());
    }
}
