use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use beacon::config::AuthConfig;
use beacon::identity::{Role, UserDirectory};
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::warn;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Register the bootstrap admin account. Responder accounts are provisioned
/// through fleet management; the admin comes from configuration.
pub(crate) fn bootstrap_users(config: &AuthConfig, directory: &UserDirectory) {
    let password = match &config.admin_password {
        Some(password) => password.clone(),
        None => {
            warn!(
                username = %config.admin_username,
                "APP_ADMIN_PASSWORD not set, using the development default"
            );
            "change-me".to_string()
        }
    };
    directory.register(config.admin_username.clone(), &password, Role::Admin, None);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_registers_the_admin_account() {
        let directory = UserDirectory::default();
        bootstrap_users(
            &AuthConfig {
                admin_username: "ops".to_string(),
                admin_password: Some("secret".to_string()),
            },
            &directory,
        );
        let principal = directory.verify("ops", "secret").expect("admin login");
        assert_eq!(principal.role, Role::Admin);
    }
}
