use crate::domain::eligibility::EligibilityViolation;
use crate::domain::types::{CycleStatus, RuleKind, ServiceType};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Unknown service type: {value}")]
    UnknownService { value: String },

    #[error("Unknown rule type: {value}")]
    UnknownRule { value: String },

    #[error("Rule {rule} is not available for service {service}")]
    RuleNotAllowed { service: ServiceType, rule: RuleKind },

    #[error("No rule configured for service {service}")]
    ServiceNotConfigured { service: ServiceType },

    #[error("Invalid proration request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Rule cannot be applied: {0}")]
    Eligibility(EligibilityViolation),

    #[error("Invalid billing cycle: {reason}")]
    InvalidCycle { reason: String },

    #[error("Billing cycle is {status}, expected an open cycle")]
    CycleNotOpen { status: CycleStatus },

    #[error("Invalid cycle transition from {from} to {to}")]
    InvalidStateTransition { from: CycleStatus, to: CycleStatus },

    #[error("A billing cycle for {month:02}/{year} already exists")]
    DuplicateCycle { month: u32, year: i32 },

    #[error("An expense for service {service} already exists in this cycle")]
    DuplicateExpense { service: ServiceType },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BillingError {
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    pub fn invalid_cycle(reason: impl Into<String>) -> Self {
        Self::InvalidCycle {
            reason: reason.into(),
        }
    }

    /// Unknown or disallowed service/rule combinations.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            BillingError::UnknownService { .. }
                | BillingError::UnknownRule { .. }
                | BillingError::RuleNotAllowed { .. }
                | BillingError::ServiceNotConfigured { .. }
                | BillingError::Config(_)
        )
    }
}

impl From<EligibilityViolation> for BillingError {
    fn from(violation: EligibilityViolation) -> Self {
        BillingError::Eligibility(violation)
    }
}

pub type Result<T> = std::result::Result<T, BillingError>;
