use crate::domain::proration::FixedFeePolicy;
use crate::domain::types::{MinorUnit, RoundingMode};
use crate::error::{BillingError, Result};
use chrono::Datelike;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_CONFIG_FILE: &str = "proratio.toml";
pub const ENV_PREFIX: &str = "PRORATIO_";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingConfig {
    #[serde(default)]
    pub currency: CurrencyConfig,
    #[serde(default)]
    pub proration: ProrationConfig,
    #[serde(default)]
    pub cycles: CycleConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyConfig {
    /// Decimal places of the minor unit (2 for cents)
    pub scale: u32,
    pub rounding: RoundingMode,
}

impl Default for CurrencyConfig {
    fn default() -> Self {
        Self {
            scale: 2,
            rounding: RoundingMode::HalfEven,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProrationConfig {
    pub fixed_fee_policy: FixedFeePolicy,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleConfig {
    pub earliest_year: i32,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            earliest_year: 2000,
        }
    }
}

impl BillingConfig {
    /// Defaults, then the TOML file, then `PRORATIO_` environment variables.
    ///
    /// Nested keys use a double underscore: `PRORATIO_CURRENCY__SCALE=3`.
    pub fn load(path_override: Option<PathBuf>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(BillingConfig::default()));

        match path_override {
            Some(path) => {
                if !path.exists() {
                    return Err(BillingError::Config(format!(
                        "configuration file {} does not exist",
                        path.display()
                    )));
                }
                figment = figment.merge(Toml::file(path));
            }
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    figment = figment.merge(Toml::file(default_path));
                }
            }
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: BillingConfig = figment
            .extract()
            .map_err(|e| BillingError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    pub fn validate(&self) -> Result<()> {
        if self.currency.scale > MinorUnit::MAX_SCALE {
            return Err(BillingError::Config(format!(
                "currency.scale must be at most {}, got {}",
                MinorUnit::MAX_SCALE,
                self.currency.scale
            )));
        }

        let current_year = chrono::Utc::now().year();
        if self.cycles.earliest_year > current_year {
            return Err(BillingError::Config(format!(
                "cycles.earliest_year {} is in the future",
                self.cycles.earliest_year
            )));
        }

        Ok(())
    }

    pub fn minor_unit(&self) -> MinorUnit {
        MinorUnit::new(self.currency.scale, self.currency.rounding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults() {
        let config = BillingConfig::default();
        assert_eq!(config.minor_unit(), MinorUnit::cents());
        assert_eq!(config.proration.fixed_fee_policy, FixedFeePolicy::ReconcileTotal);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_and_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                DEFAULT_CONFIG_FILE,
                r#"
                [currency]
                scale = 3
                rounding = "half_up"

                [proration]
                fixed_fee_policy = "strictly_equal"
                "#,
            )?;
            jail.set_env("PRORATIO_CYCLES__EARLIEST_YEAR", "2015");

            let config = BillingConfig::load(None).expect("config should load");
            assert_eq!(config.currency.scale, 3);
            assert_eq!(config.currency.rounding, RoundingMode::HalfUp);
            assert_eq!(config.proration.fixed_fee_policy, FixedFeePolicy::StrictlyEqual);
            assert_eq!(config.cycles.earliest_year, 2015);
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("custom.toml", "[currency]\nscale = 4\n")?;
            jail.set_env("PRORATIO_CURRENCY__SCALE", "0");

            let config = BillingConfig::load(Some(PathBuf::from("custom.toml")))
                .expect("config should load");
            assert_eq!(config.currency.scale, 0);
            Ok(())
        });
    }

    #[test]
    fn test_rejects_out_of_range_scale() {
        Jail::expect_with(|jail| {
            jail.set_env("PRORATIO_CURRENCY__SCALE", "12");
            let err = BillingConfig::load(None).unwrap_err();
            assert!(err.is_configuration_error());
            Ok(())
        });
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = BillingConfig::load(Some(PathBuf::from("/nonexistent/proratio.toml")))
            .unwrap_err();
        assert!(matches!(err, BillingError::Config(_)));
    }

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let rendered = toml::to_string_pretty(&BillingConfig::default()).unwrap();
        let parsed: BillingConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, BillingConfig::default());
    }
}
