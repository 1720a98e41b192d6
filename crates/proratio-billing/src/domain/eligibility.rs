//! Prerequisite checks deciding whether a rule can be applied to a set of units.
//!
//! Violations are plain values so that a preview can explain why a rule is
//! blocked. The calculation path calls [`EligibilityChecker::require`], which
//! turns the first violation into a [`BillingError`].

use crate::domain::types::{RuleKind, UnitId};
use crate::error::{BillingError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantProfile {
    pub name: String,
    pub occupants: u32,
}

/// Unit data read by the eligibility checker and the cycle finalizer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitProfile {
    pub id: UnitId,
    pub name: String,
    #[serde(default)]
    pub area: Option<Decimal>,
    #[serde(default)]
    pub tenant: Option<TenantProfile>,
}

impl UnitProfile {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: UnitId::new(id),
            name: name.into(),
            area: None,
            tenant: None,
        }
    }

    pub fn with_area(mut self, area: Decimal) -> Self {
        self.area = Some(area);
        self
    }

    pub fn with_tenant(mut self, name: impl Into<String>, occupants: u32) -> Self {
        self.tenant = Some(TenantProfile {
            name: name.into(),
            occupants,
        });
        self
    }

    pub fn occupants(&self) -> Option<u32> {
        self.tenant.as_ref().map(|t| t.occupants)
    }
}

/// Reason a rule cannot be used for the current units
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EligibilityViolation {
    NoUnits,
    MissingTenant { unit: String },
    NoOccupants { unit: String },
    MissingArea { unit: String },
}

impl fmt::Display for EligibilityViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EligibilityViolation::NoUnits => write!(f, "the property has no units"),
            EligibilityViolation::MissingTenant { unit } => write!(
                f,
                "all units must have occupant counts assigned; unit '{unit}' has no tenant"
            ),
            EligibilityViolation::NoOccupants { unit } => write!(
                f,
                "all units must have occupant counts assigned; the tenant of unit '{unit}' has no occupants"
            ),
            EligibilityViolation::MissingArea { unit } => {
                write!(f, "all units must have an area registered; unit '{unit}' has none")
            }
        }
    }
}

pub struct EligibilityChecker;

impl EligibilityChecker {
    /// True only if there is at least one unit and every unit has a tenant
    /// with a positive occupant count.
    pub fn can_use_occupant_proration(units: &[UnitProfile]) -> bool {
        Self::occupant_proration_violation(units).is_none()
    }

    /// First unit that blocks occupant proration, if any.
    pub fn occupant_proration_violation(units: &[UnitProfile]) -> Option<EligibilityViolation> {
        if units.is_empty() {
            return Some(EligibilityViolation::NoUnits);
        }

        units.iter().find_map(|unit| match &unit.tenant {
            None => Some(EligibilityViolation::MissingTenant {
                unit: unit.name.clone(),
            }),
            Some(tenant) if tenant.occupants == 0 => Some(EligibilityViolation::NoOccupants {
                unit: unit.name.clone(),
            }),
            Some(_) => None,
        })
    }

    /// All prerequisite violations of `rule` for the given units.
    ///
    /// Meter readings belong to a cycle rather than to a unit and are checked
    /// when a consumption-adjusted expense is allocated.
    pub fn check(rule: RuleKind, units: &[UnitProfile]) -> Vec<EligibilityViolation> {
        if units.is_empty() {
            return vec![EligibilityViolation::NoUnits];
        }

        match rule {
            RuleKind::OccupantProration => units
                .iter()
                .filter_map(|unit| match &unit.tenant {
                    None => Some(EligibilityViolation::MissingTenant {
                        unit: unit.name.clone(),
                    }),
                    Some(tenant) if tenant.occupants == 0 => {
                        Some(EligibilityViolation::NoOccupants {
                            unit: unit.name.clone(),
                        })
                    }
                    Some(_) => None,
                })
                .collect(),
            RuleKind::ProportionalArea => units
                .iter()
                .filter(|unit| !matches!(unit.area, Some(area) if area > Decimal::ZERO))
                .map(|unit| EligibilityViolation::MissingArea {
                    unit: unit.name.clone(),
                })
                .collect(),
            RuleKind::EqualDivision | RuleKind::ConsumptionAdjustment | RuleKind::FixedFee => {
                Vec::new()
            }
        }
    }

    /// Authoritative re-check performed right before a calculation.
    pub fn require(rule: RuleKind, units: &[UnitProfile]) -> Result<()> {
        match Self::check(rule, units).into_iter().next() {
            None => Ok(()),
            Some(violation) => {
                debug!(rule = %rule, %violation, "Rule rejected by eligibility check");
                Err(BillingError::Eligibility(violation))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn occupied_units() -> Vec<UnitProfile> {
        vec![
            UnitProfile::new("101", "Apt 101").with_tenant("Juan", 2),
            UnitProfile::new("102", "Apt 102").with_tenant("Maria", 3),
        ]
    }

    #[test]
    fn test_all_units_with_occupants_are_eligible() {
        assert!(EligibilityChecker::can_use_occupant_proration(&occupied_units()));
        assert!(EligibilityChecker::require(RuleKind::OccupantProration, &occupied_units()).is_ok());
    }

    #[test]
    fn test_missing_tenant_blocks_occupant_proration() {
        let mut units = occupied_units();
        units.push(UnitProfile::new("103", "Apt 103"));

        assert!(!EligibilityChecker::can_use_occupant_proration(&units));
        assert_eq!(
            EligibilityChecker::occupant_proration_violation(&units),
            Some(EligibilityViolation::MissingTenant {
                unit: "Apt 103".to_string()
            })
        );
    }

    #[test]
    fn test_zero_occupants_blocks_occupant_proration() {
        let mut units = occupied_units();
        units[1].tenant.as_mut().unwrap().occupants = 0;

        assert!(!EligibilityChecker::can_use_occupant_proration(&units));

        let err = EligibilityChecker::require(RuleKind::OccupantProration, &units).unwrap_err();
        assert!(matches!(
            err,
            BillingError::Eligibility(EligibilityViolation::NoOccupants { .. })
        ));
        assert!(err.to_string().contains("Apt 102"));
    }

    #[test]
    fn test_no_units_is_not_eligible() {
        assert!(!EligibilityChecker::can_use_occupant_proration(&[]));
        assert_eq!(
            EligibilityChecker::check(RuleKind::EqualDivision, &[]),
            vec![EligibilityViolation::NoUnits]
        );
    }

    #[test]
    fn test_proportional_area_requires_positive_area() {
        let units = vec![
            UnitProfile::new("a", "A").with_area(dec!(50)),
            UnitProfile::new("b", "B"),
            UnitProfile::new("c", "C").with_area(Decimal::ZERO),
        ];

        let violations = EligibilityChecker::check(RuleKind::ProportionalArea, &units);
        assert_eq!(violations.len(), 2);
        assert!(EligibilityChecker::check(RuleKind::EqualDivision, &units).is_empty());
    }

    #[test]
    fn test_violation_serializes_with_kind_tag() {
        let json = serde_json::to_value(EligibilityViolation::MissingTenant {
            unit: "A".to_string(),
        })
        .unwrap();
        assert_eq!(json["kind"], "missing_tenant");
        assert_eq!(json["unit"], "A");
    }
}
