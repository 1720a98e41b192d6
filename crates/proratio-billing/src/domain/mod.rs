pub mod billing_cycle;
pub mod catalog;
pub mod eligibility;
pub mod proration;
pub mod service_rules;
pub mod types;

pub use billing_cycle::{BillingCycle, CycleBook, CycleStatement, Expense, ServiceAllocation, UnitTotal};
pub use catalog::{RuleCatalog, RuleExplanation};
pub use eligibility::{EligibilityChecker, EligibilityViolation, TenantProfile, UnitProfile};
pub use proration::{
    Allocation, FixedFeePolicy, ProrationCalculator, ProrationRequest, ProrationResult,
    ProrationUnit, UnitWeight,
};
pub use service_rules::{ServiceRule, ServiceRuleSet};
pub use types::{
    CycleId, CycleStatus, MinorUnit, PropertyId, RoundingMode, RuleKind, ServiceType, UnitId,
};
