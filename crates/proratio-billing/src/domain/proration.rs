//! Splits a service expense across units.
//!
//! Every share is rounded to the currency minor unit and the last unit (in
//! input order) absorbs whatever is left, so the allocations always add up to
//! the requested total exactly.

use crate::config::BillingConfig;
use crate::domain::types::{MinorUnit, RuleKind, UnitId};
use crate::error::{BillingError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Per-unit input whose meaning depends on the rule kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum UnitWeight {
    Occupants(u32),
    Area(Decimal),
    MeterReading(Decimal),
}

impl UnitWeight {
    fn name(&self) -> &'static str {
        match self {
            UnitWeight::Occupants(_) => "occupants",
            UnitWeight::Area(_) => "area",
            UnitWeight::MeterReading(_) => "meter_reading",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProrationUnit {
    pub unit_id: UnitId,
    #[serde(default)]
    pub weight: Option<UnitWeight>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProrationRequest {
    pub rule_kind: RuleKind,
    pub total_amount: Decimal,
    pub units: Vec<ProrationUnit>,
}

impl ProrationRequest {
    pub fn new(rule_kind: RuleKind, total_amount: Decimal) -> Self {
        Self {
            rule_kind,
            total_amount,
            units: Vec::new(),
        }
    }

    pub fn with_unit(mut self, unit_id: impl Into<String>, weight: Option<UnitWeight>) -> Self {
        self.units.push(ProrationUnit {
            unit_id: UnitId::new(unit_id),
            weight,
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub unit_id: UnitId,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProrationResult {
    pub rule_kind: RuleKind,
    pub total_amount: Decimal,
    /// Billed total divided by the sum of meter readings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjustment_factor: Option<Decimal>,
    pub allocations: Vec<Allocation>,
}

impl ProrationResult {
    pub fn allocated_total(&self) -> Decimal {
        self.allocations.iter().map(|a| a.amount).sum()
    }

    pub fn amount_for(&self, unit_id: &UnitId) -> Option<Decimal> {
        self.allocations
            .iter()
            .find(|a| &a.unit_id == unit_id)
            .map(|a| a.amount)
    }

    pub fn amounts(&self) -> Vec<Decimal> {
        self.allocations.iter().map(|a| a.amount).collect()
    }
}

/// What wins when a fixed fee does not divide the total evenly
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixedFeePolicy {
    /// Shares are identical except the last, which absorbs the remainder.
    #[default]
    ReconcileTotal,
    /// Shares must be identical; uneven totals are rejected.
    StrictlyEqual,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProrationCalculator {
    minor_unit: MinorUnit,
    fixed_fee_policy: FixedFeePolicy,
}

impl ProrationCalculator {
    pub fn new(minor_unit: MinorUnit, fixed_fee_policy: FixedFeePolicy) -> Self {
        Self {
            minor_unit,
            fixed_fee_policy,
        }
    }

    pub fn from_config(config: &BillingConfig) -> Self {
        Self::new(config.minor_unit(), config.proration.fixed_fee_policy)
    }

    pub fn minor_unit(&self) -> MinorUnit {
        self.minor_unit
    }

    pub fn fixed_fee_policy(&self) -> FixedFeePolicy {
        self.fixed_fee_policy
    }

    pub fn allocate(&self, request: &ProrationRequest) -> Result<ProrationResult> {
        let (weights, weight_sum) = self.validate(request)?;
        let total = request.total_amount;
        let unit_count = Decimal::from(request.units.len());

        debug!(
            rule = %request.rule_kind,
            units = request.units.len(),
            total = %total,
            "Allocating expense"
        );

        let mut adjustment_factor = None;
        let shares = match request.rule_kind {
            RuleKind::EqualDivision => {
                let share = self.minor_unit.round(checked_div(total, unit_count)?);
                vec![share; request.units.len()]
            }
            RuleKind::FixedFee => {
                let exact = checked_div(total, unit_count)?;
                let share = self.minor_unit.round(exact);
                if self.fixed_fee_policy == FixedFeePolicy::StrictlyEqual && share != exact {
                    return Err(BillingError::invalid_request(format!(
                        "fixed fee of {total} cannot be split into {} identical shares",
                        request.units.len()
                    )));
                }
                vec![share; request.units.len()]
            }
            RuleKind::OccupantProration | RuleKind::ProportionalArea => {
                weights
                    .iter()
                    .map(|weight| {
                        let scaled = checked_mul(total, *weight)?;
                        Ok(self.minor_unit.round(checked_div(scaled, weight_sum)?))
                    })
                    .collect::<Result<Vec<_>>>()?
            }
            RuleKind::ConsumptionAdjustment => {
                let factor = checked_div(total, weight_sum)?;
                adjustment_factor = Some(factor);
                weights
                    .iter()
                    .map(|reading| Ok(self.minor_unit.round(checked_mul(*reading, factor)?)))
                    .collect::<Result<Vec<_>>>()?
            }
        };

        let shares = self.absorb_remainder(total, shares)?;

        let allocations = request
            .units
            .iter()
            .zip(shares)
            .map(|(unit, amount)| Allocation {
                unit_id: unit.unit_id.clone(),
                amount,
            })
            .collect();

        Ok(ProrationResult {
            rule_kind: request.rule_kind,
            total_amount: total,
            adjustment_factor,
            allocations,
        })
    }

    /// Rejects malformed requests and returns the numeric weight of each unit
    /// together with their sum.
    fn validate(&self, request: &ProrationRequest) -> Result<(Vec<Decimal>, Decimal)> {
        let total = request.total_amount;
        if total <= Decimal::ZERO {
            return Err(BillingError::invalid_request(format!(
                "total amount must be positive, got {total}"
            )));
        }
        if !self.minor_unit.is_representable(total) {
            return Err(BillingError::invalid_request(format!(
                "total amount {total} has more than {} decimal places",
                self.minor_unit.scale
            )));
        }
        if request.units.is_empty() {
            return Err(BillingError::invalid_request("at least one unit is required"));
        }

        let mut seen = HashSet::with_capacity(request.units.len());
        for unit in &request.units {
            if !seen.insert(&unit.unit_id) {
                return Err(BillingError::invalid_request(format!(
                    "unit {} appears more than once",
                    unit.unit_id
                )));
            }
        }

        if !request.rule_kind.is_weighted() {
            let count = Decimal::from(request.units.len());
            return Ok((vec![Decimal::ONE; request.units.len()], count));
        }

        let weights = request
            .units
            .iter()
            .map(|unit| Self::weight_of(request.rule_kind, unit))
            .collect::<Result<Vec<_>>>()?;

        let weight_sum = checked_sum(&weights)
            .ok_or_else(|| BillingError::invalid_request("weights overflow decimal range"))?;
        if weight_sum.is_zero() {
            return Err(BillingError::invalid_request(format!(
                "weights for {} add up to zero",
                request.rule_kind
            )));
        }

        Ok((weights, weight_sum))
    }

    fn weight_of(rule: RuleKind, unit: &ProrationUnit) -> Result<Decimal> {
        let weight = unit.weight.ok_or_else(|| {
            BillingError::invalid_request(format!("unit {} is missing a weight for {rule}", unit.unit_id))
        })?;

        match (rule, weight) {
            (RuleKind::OccupantProration, UnitWeight::Occupants(count)) => {
                if count == 0 {
                    return Err(BillingError::invalid_request(format!(
                        "unit {} must have at least one occupant",
                        unit.unit_id
                    )));
                }
                Ok(Decimal::from(count))
            }
            (RuleKind::ProportionalArea, UnitWeight::Area(area)) => {
                if area <= Decimal::ZERO {
                    return Err(BillingError::invalid_request(format!(
                        "unit {} must have a positive area, got {area}",
                        unit.unit_id
                    )));
                }
                Ok(area)
            }
            (RuleKind::ConsumptionAdjustment, UnitWeight::MeterReading(reading)) => {
                if reading < Decimal::ZERO {
                    return Err(BillingError::invalid_request(format!(
                        "unit {} has a negative meter reading {reading}",
                        unit.unit_id
                    )));
                }
                Ok(reading)
            }
            (rule, weight) => Err(BillingError::invalid_request(format!(
                "unit {} has a {} weight, which {rule} does not use",
                unit.unit_id,
                weight.name()
            ))),
        }
    }

    /// Replaces the last share with whatever is left of the total.
    ///
    /// When rounding pushed the earlier shares past the total, the excess is
    /// taken back from the preceding units, latest first, so no share goes
    /// negative.
    fn absorb_remainder(&self, total: Decimal, mut shares: Vec<Decimal>) -> Result<Vec<Decimal>> {
        let Some(last) = shares.len().checked_sub(1) else {
            return Ok(shares);
        };

        let allocated = checked_sum(&shares[..last])
            .ok_or_else(|| BillingError::invalid_request("allocated shares overflow decimal range"))?;
        let mut remainder = total
            .checked_sub(allocated)
            .ok_or_else(|| BillingError::invalid_request("allocated shares overflow decimal range"))?;

        if remainder < Decimal::ZERO {
            warn!(
                excess = %(-remainder),
                "Rounded shares exceed the total; reclaiming from preceding units"
            );
            let mut excess = -remainder;
            for share in shares[..last].iter_mut().rev() {
                if excess.is_zero() {
                    break;
                }
                let taken = (*share).min(excess);
                *share -= taken;
                excess -= taken;
            }
            remainder = Decimal::ZERO;
        }

        if remainder != shares[last] {
            debug!(
                nominal = %shares[last],
                absorbed = %remainder,
                "Last unit absorbs rounding remainder"
            );
        }

        shares[last] = self.minor_unit.round(remainder);
        Ok(shares)
    }
}

fn checked_sum(values: &[Decimal]) -> Option<Decimal> {
    values
        .iter()
        .try_fold(Decimal::ZERO, |acc, value| acc.checked_add(*value))
}

fn checked_mul(lhs: Decimal, rhs: Decimal) -> Result<Decimal> {
    lhs.checked_mul(rhs)
        .ok_or_else(|| BillingError::invalid_request("amount overflows decimal range"))
}

fn checked_div(lhs: Decimal, rhs: Decimal) -> Result<Decimal> {
    lhs.checked_div(rhs)
        .ok_or_else(|| BillingError::invalid_request("division by zero or overflow"))
}
