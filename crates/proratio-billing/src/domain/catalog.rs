//! Static registry of allocation rules and the services allowed to use them.

use crate::domain::types::{RuleKind, ServiceType};
use crate::error::{BillingError, Result};
use serde::Serialize;

/// Human-readable description of a rule, shown when picking one for a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleExplanation {
    pub kind: RuleKind,
    pub title: &'static str,
    pub description: &'static str,
    pub admin_note: &'static str,
}

const ELECTRICITY_RULES: &[RuleKind] = &[
    RuleKind::ConsumptionAdjustment,
    RuleKind::EqualDivision,
    RuleKind::OccupantProration,
];

const WATER_RULES: &[RuleKind] = &[
    RuleKind::OccupantProration,
    RuleKind::ConsumptionAdjustment,
    RuleKind::EqualDivision,
];

const MUNICIPAL_TAX_RULES: &[RuleKind] = &[RuleKind::EqualDivision, RuleKind::ProportionalArea];

const MOTOR_RULES: &[RuleKind] = &[RuleKind::FixedFee, RuleKind::EqualDivision];

const MAINTENANCE_RULES: &[RuleKind] = &[
    RuleKind::FixedFee,
    RuleKind::EqualDivision,
    RuleKind::ProportionalArea,
];

const GAS_RULES: &[RuleKind] = &[
    RuleKind::ConsumptionAdjustment,
    RuleKind::EqualDivision,
    RuleKind::OccupantProration,
];

pub struct RuleCatalog;

impl RuleCatalog {
    /// Allowed rules for a service, recommended rule first.
    pub fn rules_for_service(service: ServiceType) -> &'static [RuleKind] {
        match service {
            ServiceType::Electricity => ELECTRICITY_RULES,
            ServiceType::Water => WATER_RULES,
            ServiceType::MunicipalTax => MUNICIPAL_TAX_RULES,
            ServiceType::Motor => MOTOR_RULES,
            ServiceType::Maintenance => MAINTENANCE_RULES,
            ServiceType::Gas => GAS_RULES,
        }
    }

    pub fn recommended_rule(service: ServiceType) -> RuleKind {
        Self::rules_for_service(service)[0]
    }

    pub fn is_rule_allowed(service: ServiceType, rule: RuleKind) -> bool {
        Self::rules_for_service(service).contains(&rule)
    }

    /// Lookup by wire name, failing with a configuration error for unknown services.
    pub fn rules_for_service_name(service: &str) -> Result<&'static [RuleKind]> {
        let service: ServiceType = service.parse()?;
        Ok(Self::rules_for_service(service))
    }

    pub fn recommended_rule_for_name(service: &str) -> Result<RuleKind> {
        let service: ServiceType = service.parse()?;
        Ok(Self::recommended_rule(service))
    }

    pub fn ensure_allowed(service: ServiceType, rule: RuleKind) -> Result<()> {
        if Self::is_rule_allowed(service, rule) {
            Ok(())
        } else {
            Err(BillingError::RuleNotAllowed { service, rule })
        }
    }

    /// Every rule in display order.
    pub fn all_rules() -> &'static [RuleKind] {
        &RuleKind::ALL
    }

    pub fn explain(rule: RuleKind) -> RuleExplanation {
        let (title, description, admin_note) = match rule {
            RuleKind::EqualDivision => (
                "Equal division",
                "Splits the expense into identical parts across every unit.",
                "Make sure the number of active units is correct before prorating.",
            ),
            RuleKind::OccupantProration => (
                "Occupant proration",
                "Splits the expense by the number of people living in each unit.",
                "Every unit must have a tenant with an occupant count to use this rule.",
            ),
            RuleKind::ProportionalArea => (
                "Proportional area",
                "Splits the expense by the floor area (m²) of each unit.",
                "Every unit must have its area registered.",
            ),
            RuleKind::ConsumptionAdjustment => (
                "Consumption adjustment (meters)",
                "Scales each unit's meter reading so the readings add up to the billed total.",
                "Every unit needs a meter reading for the cycle.",
            ),
            RuleKind::FixedFee => (
                "Fixed fee",
                "Assigns the same fixed amount to every unit.",
                "Uneven totals are reconciled on the last unit unless strict equality is configured.",
            ),
        };

        RuleExplanation {
            kind: rule,
            title,
            description,
            admin_note,
        }
    }

    /// Explanations for the rules a service may use, recommended first.
    pub fn explanations_for_service(service: ServiceType) -> Vec<RuleExplanation> {
        Self::rules_for_service(service)
            .iter()
            .copied()
            .map(Self::explain)
            .collect()
    }
}
