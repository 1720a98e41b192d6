//! Per-property choice of allocation rule for each billed service.

use crate::domain::catalog::RuleCatalog;
use crate::domain::eligibility::{EligibilityChecker, UnitProfile};
use crate::domain::types::{RuleKind, ServiceType};
use crate::error::{BillingError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRule {
    pub service_type: ServiceType,
    pub rule_type: RuleKind,
}

impl ServiceRule {
    pub fn new(service_type: ServiceType, rule_type: RuleKind) -> Self {
        Self {
            service_type,
            rule_type,
        }
    }

    pub fn recommended(service_type: ServiceType) -> Self {
        Self::new(service_type, RuleCatalog::recommended_rule(service_type))
    }
}

/// At most one rule per service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceRuleSet {
    rules: Vec<ServiceRule>,
}

impl ServiceRuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a validated set in one step.
    pub fn configured(rules: Vec<ServiceRule>, units: &[UnitProfile]) -> Result<Self> {
        let mut set = Self::new();
        set.replace(rules, units)?;
        Ok(set)
    }

    pub fn rules(&self) -> &[ServiceRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rule_for(&self, service: ServiceType) -> Option<RuleKind> {
        self.rules
            .iter()
            .find(|r| r.service_type == service)
            .map(|r| r.rule_type)
    }

    pub fn require_rule_for(&self, service: ServiceType) -> Result<RuleKind> {
        self.rule_for(service)
            .ok_or(BillingError::ServiceNotConfigured { service })
    }

    /// Swaps in a whole new configuration.
    ///
    /// The candidate set is validated in full first; on error the current
    /// configuration is left untouched.
    pub fn replace(&mut self, rules: Vec<ServiceRule>, units: &[UnitProfile]) -> Result<()> {
        Self::validate(&rules, units)?;

        info!(
            services = rules.len(),
            "Replacing service rule configuration"
        );
        self.rules = rules;
        Ok(())
    }

    fn validate(rules: &[ServiceRule], units: &[UnitProfile]) -> Result<()> {
        if rules.is_empty() {
            return Err(BillingError::invalid_request(
                "service rule configuration cannot be empty",
            ));
        }

        let mut seen = HashSet::with_capacity(rules.len());
        for rule in rules {
            if !seen.insert(rule.service_type) {
                return Err(BillingError::invalid_request(format!(
                    "service {} is configured more than once",
                    rule.service_type
                )));
            }
            RuleCatalog::ensure_allowed(rule.service_type, rule.rule_type)?;
        }

        if rules
            .iter()
            .any(|r| r.rule_type == RuleKind::OccupantProration)
        {
            EligibilityChecker::require(RuleKind::OccupantProration, units)?;
        }

        Ok(())
    }
}
