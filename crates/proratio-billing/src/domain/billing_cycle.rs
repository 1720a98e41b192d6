use crate::config::CycleConfig;
use crate::domain::catalog::RuleCatalog;
use crate::domain::eligibility::{EligibilityChecker, UnitProfile};
use crate::domain::proration::{ProrationCalculator, ProrationRequest, ProrationResult, UnitWeight};
use crate::domain::service_rules::ServiceRuleSet;
use crate::domain::types::{
    CycleId, CycleStatus, MinorUnit, PropertyId, RuleKind, ServiceType, UnitId,
};
use crate::error::{BillingError, Result};
use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info};

/// Invoice for one service within a billing cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    pub service_type: ServiceType,
    pub total_amount: Decimal,
    /// Readings used by consumption-adjusted services
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meter_readings: BTreeMap<UnitId, Decimal>,
}

impl Expense {
    pub fn new(service_type: ServiceType, total_amount: Decimal) -> Self {
        Self {
            service_type,
            total_amount,
            meter_readings: BTreeMap::new(),
        }
    }

    pub fn with_meter_reading(mut self, unit_id: impl Into<String>, reading: Decimal) -> Self {
        self.meter_readings.insert(UnitId::new(unit_id), reading);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAllocation {
    pub service_type: ServiceType,
    pub rule_kind: RuleKind,
    pub result: ProrationResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitTotal {
    pub unit_id: UnitId,
    pub amount: Decimal,
}

/// Per-service and per-unit charges of a billing cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleStatement {
    pub cycle_id: CycleId,
    pub property_id: PropertyId,
    pub month: u32,
    pub year: i32,
    pub services: Vec<ServiceAllocation>,
    pub unit_totals: Vec<UnitTotal>,
    pub total: Decimal,
}

impl CycleStatement {
    pub fn total_for(&self, unit_id: &UnitId) -> Option<Decimal> {
        self.unit_totals
            .iter()
            .find(|t| &t.unit_id == unit_id)
            .map(|t| t.amount)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingCycle {
    #[serde(default)]
    pub id: CycleId,
    pub property_id: PropertyId,
    pub month: u32,
    pub year: i32,
    #[serde(default)]
    pub status: CycleStatus,
    #[serde(default)]
    pub expenses: Vec<Expense>,
}

impl BillingCycle {
    pub fn open(
        property_id: PropertyId,
        month: u32,
        year: i32,
        today: NaiveDate,
        config: &CycleConfig,
    ) -> Result<Self> {
        Self::validate_period(month, year, today, config)?;

        Ok(Self {
            id: CycleId::new(),
            property_id,
            month,
            year,
            status: CycleStatus::Open,
            expenses: Vec::new(),
        })
    }

    /// Month in 1..=12, year not before the configured floor and not in the future.
    pub fn validate_period(
        month: u32,
        year: i32,
        today: NaiveDate,
        config: &CycleConfig,
    ) -> Result<()> {
        if !(1..=12).contains(&month) {
            return Err(BillingError::invalid_cycle(format!(
                "month must be between 1 and 12, got {month}"
            )));
        }
        if year < config.earliest_year {
            return Err(BillingError::invalid_cycle(format!(
                "year {year} is before {}",
                config.earliest_year
            )));
        }
        if (year, month) > (today.year(), today.month()) {
            return Err(BillingError::invalid_cycle(format!(
                "{month:02}/{year} is in the future"
            )));
        }
        Ok(())
    }

    pub fn expense_total(&self) -> Decimal {
        self.expenses.iter().map(|e| e.total_amount).sum()
    }

    pub fn expense_for(&self, service: ServiceType) -> Option<&Expense> {
        self.expenses.iter().find(|e| e.service_type == service)
    }

    pub fn add_expense(
        &mut self,
        expense: Expense,
        rules: &ServiceRuleSet,
        minor_unit: MinorUnit,
    ) -> Result<()> {
        if !self.status.accepts_expenses() {
            return Err(BillingError::CycleNotOpen {
                status: self.status,
            });
        }
        rules.require_rule_for(expense.service_type)?;
        Self::check_expense(&expense, minor_unit)?;

        if self.expense_for(expense.service_type).is_some() {
            return Err(BillingError::DuplicateExpense {
                service: expense.service_type,
            });
        }

        debug!(
            cycle = %self.id,
            service = %expense.service_type,
            amount = %expense.total_amount,
            "Expense added"
        );
        self.expenses.push(expense);
        Ok(())
    }

    /// Rebuilds a cycle received from outside through `open` and
    /// `add_expense`, keeping its id.
    pub fn restore(
        snapshot: BillingCycle,
        rules: &ServiceRuleSet,
        today: NaiveDate,
        config: &CycleConfig,
        minor_unit: MinorUnit,
    ) -> Result<Self> {
        if !snapshot.status.accepts_expenses() {
            return Err(BillingError::CycleNotOpen {
                status: snapshot.status,
            });
        }

        let mut cycle = Self::open(
            snapshot.property_id,
            snapshot.month,
            snapshot.year,
            today,
            config,
        )?;
        cycle.id = snapshot.id;
        for expense in snapshot.expenses {
            cycle.add_expense(expense, rules, minor_unit)?;
        }
        Ok(cycle)
    }

    /// Checks that do not depend on configuration or the current date.
    pub fn validate_expenses(&self, minor_unit: MinorUnit) -> Result<()> {
        if !(1..=12).contains(&self.month) {
            return Err(BillingError::invalid_cycle(format!(
                "month must be between 1 and 12, got {}",
                self.month
            )));
        }

        let mut seen = HashSet::with_capacity(self.expenses.len());
        for expense in &self.expenses {
            if !seen.insert(expense.service_type) {
                return Err(BillingError::DuplicateExpense {
                    service: expense.service_type,
                });
            }
            Self::check_expense(expense, minor_unit)?;
        }
        Ok(())
    }

    fn check_expense(expense: &Expense, minor_unit: MinorUnit) -> Result<()> {
        if expense.total_amount <= Decimal::ZERO {
            return Err(BillingError::invalid_request(format!(
                "expense amount must be positive, got {}",
                expense.total_amount
            )));
        }
        if !minor_unit.is_representable(expense.total_amount) {
            return Err(BillingError::invalid_request(format!(
                "expense amount {} has more than {} decimal places",
                expense.total_amount, minor_unit.scale
            )));
        }
        if let Some((unit, reading)) = expense
            .meter_readings
            .iter()
            .find(|(_, reading)| **reading < Decimal::ZERO)
        {
            return Err(BillingError::invalid_request(format!(
                "meter reading {reading} for unit {unit} is negative"
            )));
        }
        Ok(())
    }

    pub fn transition_to(&mut self, next: CycleStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(BillingError::InvalidStateTransition {
                from: self.status,
                to: next,
            });
        }

        info!(cycle = %self.id, from = %self.status, to = %next, "Billing cycle transition");
        self.status = next;
        Ok(())
    }

    /// Computes every unit's charges without changing the cycle.
    pub fn preview(
        &self,
        rules: &ServiceRuleSet,
        units: &[UnitProfile],
        calculator: &ProrationCalculator,
    ) -> Result<CycleStatement> {
        if self.expenses.is_empty() {
            return Err(BillingError::invalid_cycle("cycle has no expenses"));
        }
        self.validate_expenses(calculator.minor_unit())?;

        let services = self
            .expenses
            .iter()
            .map(|expense| {
                let rule = rules.require_rule_for(expense.service_type)?;
                let request = Self::build_request(expense, rule, units)?;
                Ok(ServiceAllocation {
                    service_type: expense.service_type,
                    rule_kind: rule,
                    result: calculator.allocate(&request)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut per_unit: HashMap<&UnitId, Decimal> = HashMap::new();
        for allocation in services.iter().flat_map(|s| &s.result.allocations) {
            *per_unit.entry(&allocation.unit_id).or_default() += allocation.amount;
        }

        let unit_totals: Vec<UnitTotal> = units
            .iter()
            .map(|unit| UnitTotal {
                unit_id: unit.id.clone(),
                amount: per_unit.get(&unit.id).copied().unwrap_or_default(),
            })
            .collect();

        Ok(CycleStatement {
            cycle_id: self.id,
            property_id: self.property_id.clone(),
            month: self.month,
            year: self.year,
            services,
            total: unit_totals.iter().map(|t| t.amount).sum(),
            unit_totals,
        })
    }

    /// Allocates every expense and moves the cycle to review.
    ///
    /// Eligibility is checked again against the units passed here, not the
    /// ones seen when the rules were configured. Nothing changes on error.
    pub fn finalize(
        &mut self,
        rules: &ServiceRuleSet,
        units: &[UnitProfile],
        calculator: &ProrationCalculator,
    ) -> Result<CycleStatement> {
        if !self.status.accepts_expenses() {
            return Err(BillingError::CycleNotOpen {
                status: self.status,
            });
        }

        let statement = self.preview(rules, units, calculator)?;
        self.transition_to(CycleStatus::InReview)?;

        info!(
            cycle = %self.id,
            services = statement.services.len(),
            total = %statement.total,
            "Billing cycle finalized"
        );
        Ok(statement)
    }

    fn build_request(
        expense: &Expense,
        rule: RuleKind,
        units: &[UnitProfile],
    ) -> Result<ProrationRequest> {
        RuleCatalog::ensure_allowed(expense.service_type, rule)?;
        EligibilityChecker::require(rule, units)?;

        if rule == RuleKind::ConsumptionAdjustment {
            if let Some(unknown) = expense
                .meter_readings
                .keys()
                .find(|id| !units.iter().any(|u| &u.id == *id))
            {
                return Err(BillingError::invalid_request(format!(
                    "meter reading given for unknown unit {unknown}"
                )));
            }
        }

        let mut request = ProrationRequest::new(rule, expense.total_amount);
        for unit in units {
            let weight = match rule {
                RuleKind::EqualDivision | RuleKind::FixedFee => None,
                RuleKind::OccupantProration => unit.occupants().map(UnitWeight::Occupants),
                RuleKind::ProportionalArea => unit.area.map(UnitWeight::Area),
                RuleKind::ConsumptionAdjustment => {
                    let reading = expense.meter_readings.get(&unit.id).ok_or_else(|| {
                        BillingError::invalid_request(format!(
                            "no {} meter reading for unit {}",
                            expense.service_type, unit.name
                        ))
                    })?;
                    Some(UnitWeight::MeterReading(*reading))
                }
            };
            request = request.with_unit(unit.id.as_str(), weight);
        }

        Ok(request)
    }
}

/// Billing cycles of one property, at most one per month
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleBook {
    pub property_id: PropertyId,
    cycles: Vec<BillingCycle>,
}

impl CycleBook {
    pub fn new(property_id: PropertyId) -> Self {
        Self {
            property_id,
            cycles: Vec::new(),
        }
    }

    pub fn open_cycle(
        &mut self,
        month: u32,
        year: i32,
        today: NaiveDate,
        config: &CycleConfig,
    ) -> Result<&mut BillingCycle> {
        if self.find(month, year).is_some() {
            return Err(BillingError::DuplicateCycle { month, year });
        }

        let cycle = BillingCycle::open(self.property_id.clone(), month, year, today, config)?;
        info!(property = %self.property_id, cycle = %cycle.id, month, year, "Billing cycle opened");

        // Newest period first
        let position = self
            .cycles
            .iter()
            .position(|c| (c.year, c.month) < (year, month))
            .unwrap_or(self.cycles.len());
        self.cycles.insert(position, cycle);
        Ok(&mut self.cycles[position])
    }

    pub fn find(&self, month: u32, year: i32) -> Option<&BillingCycle> {
        self.cycles
            .iter()
            .find(|c| c.month == month && c.year == year)
    }

    pub fn get_mut(&mut self, id: CycleId) -> Option<&mut BillingCycle> {
        self.cycles.iter_mut().find(|c| c.id == id)
    }

    pub fn cycles(&self) -> &[BillingCycle] {
        &self.cycles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::service_rules::ServiceRule;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 15).unwrap()
    }

    fn units() -> Vec<UnitProfile> {
        vec![
            UnitProfile::new("A", "Unit A")
                .with_area(dec!(50))
                .with_tenant("Ana", 1),
            UnitProfile::new("B", "Unit B")
                .with_area(dec!(100))
                .with_tenant("Bruno", 2),
            UnitProfile::new("C", "Unit C")
                .with_area(dec!(50))
                .with_tenant("Carla", 2),
        ]
    }

    fn rules() -> ServiceRuleSet {
        ServiceRuleSet::configured(
            vec![
                ServiceRule::new(ServiceType::Water, RuleKind::OccupantProration),
                ServiceRule::new(ServiceType::Electricity, RuleKind::ConsumptionAdjustment),
                ServiceRule::new(ServiceType::MunicipalTax, RuleKind::ProportionalArea),
            ],
            &units(),
        )
        .unwrap()
    }

    fn cycle() -> BillingCycle {
        BillingCycle::open(
            PropertyId::new("p-1"),
            7,
            2025,
            today(),
            &CycleConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_period_validation() {
        let config = CycleConfig::default();
        assert!(BillingCycle::validate_period(13, 2025, today(), &config).is_err());
        assert!(BillingCycle::validate_period(0, 2025, today(), &config).is_err());
        assert!(BillingCycle::validate_period(8, 2025, today(), &config).is_err());
        assert!(BillingCycle::validate_period(6, 2050, today(), &config).is_err());
        assert!(BillingCycle::validate_period(6, 1999, today(), &config).is_err());
        assert!(BillingCycle::validate_period(12, 2024, today(), &config).is_ok());
        assert!(BillingCycle::validate_period(7, 2025, today(), &config).is_ok());
    }

    #[test]
    fn test_add_expense_rules() {
        let mut cycle = cycle();
        let rules = rules();

        cycle
            .add_expense(Expense::new(ServiceType::Water, dec!(150.00)), &rules, MinorUnit::cents())
            .unwrap();

        let err = cycle
            .add_expense(Expense::new(ServiceType::Gas, dec!(100.00)), &rules, MinorUnit::cents())
            .unwrap_err();
        assert!(matches!(err, BillingError::ServiceNotConfigured { .. }));

        let err = cycle
            .add_expense(Expense::new(ServiceType::Water, dec!(10.00)), &rules, MinorUnit::cents())
            .unwrap_err();
        assert!(matches!(err, BillingError::DuplicateExpense { .. }));

        let err = cycle
            .add_expense(Expense::new(ServiceType::MunicipalTax, dec!(-50.00)), &rules, MinorUnit::cents())
            .unwrap_err();
        assert!(matches!(err, BillingError::InvalidRequest { .. }));

        assert_eq!(cycle.expense_total(), dec!(150.00));
    }

    #[test]
    fn test_add_expense_rejects_amounts_below_minor_unit() {
        let mut cycle = cycle();
        let err = cycle
            .add_expense(Expense::new(ServiceType::Water, dec!(10.005)), &rules(), MinorUnit::cents())
            .unwrap_err();
        assert!(matches!(err, BillingError::InvalidRequest { .. }), "{err}");
        assert!(cycle.expenses.is_empty());

        let mills = MinorUnit::new(3, Default::default());
        cycle
            .add_expense(Expense::new(ServiceType::Water, dec!(10.005)), &rules(), mills)
            .unwrap();
    }

    fn unchecked_cycle(month: u32, year: i32, expenses: Vec<Expense>) -> BillingCycle {
        BillingCycle {
            id: CycleId::new(),
            property_id: PropertyId::new("p-1"),
            month,
            year,
            status: CycleStatus::Open,
            expenses,
        }
    }

    #[test]
    fn test_finalize_rejects_cycles_built_around_add_expense() {
        let calculator = ProrationCalculator::default();

        let mut bad_month = unchecked_cycle(13, 2025, vec![Expense::new(ServiceType::Water, dec!(150))]);
        let err = bad_month.finalize(&rules(), &units(), &calculator).unwrap_err();
        assert!(matches!(err, BillingError::InvalidCycle { .. }), "{err}");
        assert_eq!(bad_month.status, CycleStatus::Open);

        let mut duplicated = unchecked_cycle(
            7,
            2025,
            vec![
                Expense::new(ServiceType::Water, dec!(150)),
                Expense::new(ServiceType::Water, dec!(20)),
            ],
        );
        let err = duplicated.finalize(&rules(), &units(), &calculator).unwrap_err();
        assert!(matches!(
            err,
            BillingError::DuplicateExpense {
                service: ServiceType::Water
            }
        ));

        let mut negative_reading = unchecked_cycle(
            7,
            2025,
            vec![Expense::new(ServiceType::Electricity, dec!(90))
                .with_meter_reading("A", dec!(30))
                .with_meter_reading("B", dec!(-30))
                .with_meter_reading("C", dec!(30))],
        );
        assert!(negative_reading.finalize(&rules(), &units(), &calculator).is_err());
    }

    #[test]
    fn test_restore_replays_period_and_expense_rules() {
        let config = CycleConfig::default();
        let water = || Expense::new(ServiceType::Water, dec!(150));

        let too_old = unchecked_cycle(13, 1900, vec![water(), water()]);
        let err = BillingCycle::restore(too_old, &rules(), today(), &config, MinorUnit::cents())
            .unwrap_err();
        assert!(matches!(err, BillingError::InvalidCycle { .. }));

        let duplicated = unchecked_cycle(7, 2025, vec![water(), water()]);
        let err = BillingCycle::restore(duplicated, &rules(), today(), &config, MinorUnit::cents())
            .unwrap_err();
        assert!(matches!(err, BillingError::DuplicateExpense { .. }));

        let mut closed = unchecked_cycle(7, 2025, vec![water()]);
        closed.status = CycleStatus::Closed;
        assert!(matches!(
            BillingCycle::restore(closed, &rules(), today(), &config, MinorUnit::cents()),
            Err(BillingError::CycleNotOpen { .. })
        ));

        let snapshot = unchecked_cycle(6, 2025, vec![water()]);
        let id = snapshot.id;
        let restored =
            BillingCycle::restore(snapshot, &rules(), today(), &config, MinorUnit::cents()).unwrap();
        assert_eq!(restored.id, id);
        assert_eq!(restored.expense_total(), dec!(150));
    }

    #[test]
    fn test_closed_cycle_rejects_expenses() {
        let mut cycle = cycle();
        cycle.transition_to(CycleStatus::InReview).unwrap();
        cycle.transition_to(CycleStatus::Closed).unwrap();

        let err = cycle
            .add_expense(Expense::new(ServiceType::Water, dec!(10)), &rules(), MinorUnit::cents())
            .unwrap_err();
        assert!(matches!(
            err,
            BillingError::CycleNotOpen {
                status: CycleStatus::Closed
            }
        ));
        assert!(cycle.transition_to(CycleStatus::Open).is_err());
    }

    #[test]
    fn test_finalize_allocates_every_expense() {
        let mut cycle = cycle();
        let rules = rules();
        cycle
            .add_expense(Expense::new(ServiceType::Water, dec!(150.00)), &rules, MinorUnit::cents())
            .unwrap();
        cycle
            .add_expense(
                Expense::new(ServiceType::Electricity, dec!(200.00))
                    .with_meter_reading("A", dec!(60))
                    .with_meter_reading("B", dec!(60))
                    .with_meter_reading("C", dec!(60)),
                &rules,
                MinorUnit::cents(),
            )
            .unwrap();
        cycle
            .add_expense(Expense::new(ServiceType::MunicipalTax, dec!(300.00)), &rules, MinorUnit::cents())
            .unwrap();

        let statement = cycle
            .finalize(&rules, &units(), &ProrationCalculator::default())
            .unwrap();

        assert_eq!(cycle.status, CycleStatus::InReview);
        assert_eq!(statement.services.len(), 3);
        assert_eq!(statement.total, dec!(650.00));
        assert_eq!(statement.total_for(&UnitId::new("A")), Some(dec!(171.67)));
        assert_eq!(statement.total_for(&UnitId::new("B")), Some(dec!(276.67)));
        assert_eq!(statement.total_for(&UnitId::new("C")), Some(dec!(201.66)));
    }

    #[test]
    fn test_finalize_rechecks_eligibility() {
        let mut cycle = cycle();
        let rules = rules();
        cycle
            .add_expense(Expense::new(ServiceType::Water, dec!(150.00)), &rules, MinorUnit::cents())
            .unwrap();

        let mut moved_out = units();
        moved_out[2].tenant = None;

        let err = cycle
            .finalize(&rules, &moved_out, &ProrationCalculator::default())
            .unwrap_err();
        assert!(matches!(err, BillingError::Eligibility(_)));
        assert_eq!(cycle.status, CycleStatus::Open);
    }

    #[test]
    fn test_consumption_needs_every_reading() {
        let mut cycle = cycle();
        let rules = rules();
        cycle
            .add_expense(
                Expense::new(ServiceType::Electricity, dec!(200.00))
                    .with_meter_reading("A", dec!(60)),
                &rules,
                MinorUnit::cents(),
            )
            .unwrap();

        let err = cycle
            .preview(&rules, &units(), &ProrationCalculator::default())
            .unwrap_err();
        assert!(err.to_string().contains("Unit B"));
    }

    #[test]
    fn test_empty_cycle_cannot_be_finalized() {
        let mut cycle = cycle();
        assert!(matches!(
            cycle.finalize(&rules(), &units(), &ProrationCalculator::default()),
            Err(BillingError::InvalidCycle { .. })
        ));
    }

    #[test]
    fn test_cycle_book_rejects_duplicates_and_orders_newest_first() {
        let mut book = CycleBook::new(PropertyId::new("p-1"));
        let config = CycleConfig::default();

        book.open_cycle(5, 2025, today(), &config).unwrap();
        book.open_cycle(7, 2025, today(), &config).unwrap();
        book.open_cycle(6, 2025, today(), &config).unwrap();

        let err = book.open_cycle(6, 2025, today(), &config).unwrap_err();
        assert!(matches!(err, BillingError::DuplicateCycle { month: 6, year: 2025 }));

        let months: Vec<u32> = book.cycles().iter().map(|c| c.month).collect();
        assert_eq!(months, vec![7, 6, 5]);
    }
}
