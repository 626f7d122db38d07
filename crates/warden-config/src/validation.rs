//! Settings validation

use crate::schema::RawSettings;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Hypervisor setting '{field}': {message}")]
    HypervisorError { field: String, message: String },

    #[error("Lifecycle setting '{field}': {message}")]
    LifecycleError { field: String, message: String },
}

/// Validate raw settings
pub fn validate_settings(raw: &RawSettings) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    for (field, value) in [
        ("host", &raw.hypervisor.host),
        ("node", &raw.hypervisor.node),
        ("user", &raw.hypervisor.user),
        ("token_name", &raw.hypervisor.token_name),
    ] {
        if value.is_empty() {
            errors.push(ValidationError::HypervisorError {
                field: field.into(),
                message: "cannot be empty".into(),
            });
        }
    }

    if !raw.hypervisor.user.contains('@') {
        errors.push(ValidationError::HypervisorError {
            field: "user".into(),
            message: "must include a realm, e.g. warden@pve".into(),
        });
    }

    if raw.hypervisor.request_timeout_secs == 0 {
        errors.push(ValidationError::HypervisorError {
            field: "request_timeout_secs".into(),
            message: "must be nonzero".into(),
        });
    }

    if raw.lifecycle.task_poll_interval_secs == 0 {
        errors.push(ValidationError::LifecycleError {
            field: "task_poll_interval_secs".into(),
            message: "must be nonzero".into(),
        });
    }

    if raw.lifecycle.task_timeout_secs <= raw.lifecycle.task_poll_interval_secs {
        errors.push(ValidationError::LifecycleError {
            field: "task_timeout_secs".into(),
            message: "must exceed task_poll_interval_secs".into(),
        });
    }

    errors
}
