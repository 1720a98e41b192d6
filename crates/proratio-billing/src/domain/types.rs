use crate::error::BillingError;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unit identifier as issued by the property backend
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UnitId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Property identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyId(String);

impl PropertyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Billing cycle identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CycleId(Uuid);

impl CycleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CycleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CycleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CycleId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Services whose invoices get split across the units of a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Electricity,
    Water,
    /// Municipal tax
    #[serde(rename = "arbitrios", alias = "municipal_tax")]
    MunicipalTax,
    Motor,
    Maintenance,
    Gas,
}

impl ServiceType {
    pub const ALL: [ServiceType; 6] = [
        ServiceType::Electricity,
        ServiceType::Water,
        ServiceType::MunicipalTax,
        ServiceType::Motor,
        ServiceType::Maintenance,
        ServiceType::Gas,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Electricity => "electricity",
            ServiceType::Water => "water",
            ServiceType::MunicipalTax => "arbitrios",
            ServiceType::Motor => "motor",
            ServiceType::Maintenance => "maintenance",
            ServiceType::Gas => "gas",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ServiceType::Electricity => "Electricity",
            ServiceType::Water => "Water",
            ServiceType::MunicipalTax => "Municipal tax",
            ServiceType::Motor => "Water pump motor",
            ServiceType::Maintenance => "Maintenance",
            ServiceType::Gas => "Gas",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "electricity" => Ok(ServiceType::Electricity),
            "water" => Ok(ServiceType::Water),
            "arbitrios" | "municipal_tax" | "municipal-tax" => Ok(ServiceType::MunicipalTax),
            "motor" => Ok(ServiceType::Motor),
            "maintenance" => Ok(ServiceType::Maintenance),
            "gas" => Ok(ServiceType::Gas),
            _ => Err(BillingError::UnknownService {
                value: s.to_string(),
            }),
        }
    }
}

/// Allocation rule applied to a service expense
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    EqualDivision,
    OccupantProration,
    ProportionalArea,
    ConsumptionAdjustment,
    FixedFee,
}

impl RuleKind {
    pub const ALL: [RuleKind; 5] = [
        RuleKind::EqualDivision,
        RuleKind::OccupantProration,
        RuleKind::ProportionalArea,
        RuleKind::ConsumptionAdjustment,
        RuleKind::FixedFee,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::EqualDivision => "equal_division",
            RuleKind::OccupantProration => "occupant_proration",
            RuleKind::ProportionalArea => "proportional_area",
            RuleKind::ConsumptionAdjustment => "consumption_adjustment",
            RuleKind::FixedFee => "fixed_fee",
        }
    }

    /// Rules whose shares depend on a per-unit weight
    pub fn is_weighted(&self) -> bool {
        matches!(
            self,
            RuleKind::OccupantProration
                | RuleKind::ProportionalArea
                | RuleKind::ConsumptionAdjustment
        )
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleKind {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        RuleKind::ALL
            .into_iter()
            .find(|rule| rule.as_str() == needle)
            .ok_or_else(|| BillingError::UnknownRule {
                value: s.to_string(),
            })
    }
}

/// Rounding applied to individual shares
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingMode {
    #[default]
    HalfEven,
    HalfUp,
}

impl RoundingMode {
    fn strategy(&self) -> RoundingStrategy {
        match self {
            RoundingMode::HalfEven => RoundingStrategy::MidpointNearestEven,
            RoundingMode::HalfUp => RoundingStrategy::MidpointAwayFromZero,
        }
    }
}

/// Currency minor unit (cents for a scale of 2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinorUnit {
    pub scale: u32,
    pub rounding: RoundingMode,
}

impl MinorUnit {
    pub const MAX_SCALE: u32 = 10;

    pub fn new(scale: u32, rounding: RoundingMode) -> Self {
        Self { scale, rounding }
    }

    pub fn cents() -> Self {
        Self::new(2, RoundingMode::HalfEven)
    }

    /// Smallest representable amount, e.g. 0.01
    pub fn step(&self) -> Decimal {
        Decimal::new(1, self.scale)
    }

    pub fn round(&self, amount: Decimal) -> Decimal {
        let mut rounded = amount.round_dp_with_strategy(self.scale, self.rounding.strategy());
        rounded.rescale(self.scale);
        rounded
    }

    /// True when the amount carries no digits below the minor unit.
    pub fn is_representable(&self, amount: Decimal) -> bool {
        amount.normalize().scale() <= self.scale
    }
}

impl Default for MinorUnit {
    fn default() -> Self {
        Self::cents()
    }
}

/// Billing cycle lifecycle states
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    #[default]
    Open,
    InReview,
    Closed,
}

impl CycleStatus {
    pub fn accepts_expenses(&self) -> bool {
        matches!(self, CycleStatus::Open)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CycleStatus::Closed)
    }

    pub fn can_transition_to(&self, next: CycleStatus) -> bool {
        matches!(
            (self, next),
            (CycleStatus::Open, CycleStatus::InReview)
                | (CycleStatus::InReview, CycleStatus::Open)
                | (CycleStatus::InReview, CycleStatus::Closed)
        )
    }
}

impl fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleStatus::Open => write!(f, "open"),
            CycleStatus::InReview => write!(f, "in_review"),
            CycleStatus::Closed => write!(f, "closed"),
        }
    }
}
