use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use proratio_billing::config::BillingConfig;
use proratio_billing::domain::{
    BillingCycle, ProrationCalculator, ProrationRequest, RuleCatalog, RuleExplanation, RuleKind,
    ServiceRuleSet, ServiceType, UnitProfile,
};
use proratio_common::logging;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "proratio-billing")]
#[command(about = "Proratio billing - expense proration previews for shared properties")]
struct Args {
    #[arg(short, long, global = true, help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Generate sample configuration file")]
    gen_config: bool,

    #[command(flatten)]
    verbosity: Verbosity<WarnLevel>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List allocation rules per service, recommended rule first
    Catalog {
        #[arg(long, help = "Only show rules for this service")]
        service: Option<String>,
    },
    /// Allocate one expense described by a JSON proration request
    Allocate {
        #[arg(long, help = "Path to the request JSON")]
        request: PathBuf,
    },
    /// Allocate every expense of a billing cycle and print the statement
    Finalize {
        #[arg(long, help = "Path to a JSON file with `cycle`, `rules` and `units`")]
        cycle: PathBuf,
    },
}

#[derive(Debug, Deserialize)]
struct CycleInput {
    cycle: BillingCycle,
    rules: ServiceRuleSet,
    units: Vec<UnitProfile>,
}

#[derive(Debug, Serialize)]
struct CatalogEntry {
    service_type: ServiceType,
    label: &'static str,
    recommended: RuleKind,
    rules: Vec<RuleExplanation>,
}

impl CatalogEntry {
    fn for_service(service: ServiceType) -> Self {
        Self {
            service_type: service,
            label: service.label(),
            recommended: RuleCatalog::recommended_rule(service),
            rules: RuleCatalog::explanations_for_service(service),
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    logging::init_cli_logging(&args.verbosity, "proratio_billing=info")?;

    if args.gen_config {
        let toml = toml::to_string_pretty(&BillingConfig::default())?;
        println!("{}", toml);
        return Ok(());
    }

    let config = BillingConfig::load(args.config)?;
    let calculator = ProrationCalculator::from_config(&config);

    let Some(command) = args.command else {
        bail!("no command given, see --help");
    };

    match command {
        Command::Catalog { service } => {
            let entries: Vec<CatalogEntry> = match service {
                Some(name) => vec![CatalogEntry::for_service(name.parse()?)],
                None => ServiceType::ALL
                    .into_iter()
                    .map(CatalogEntry::for_service)
                    .collect(),
            };
            print_json(&entries)?;
        }
        Command::Allocate { request } => {
            let request: ProrationRequest = read_json(&request)?;
            let result = calculator.allocate(&request)?;
            info!(
                rule = %result.rule_kind,
                units = result.allocations.len(),
                "Allocation computed"
            );
            print_json(&result)?;
        }
        Command::Finalize { cycle } => {
            let CycleInput {
                cycle,
                rules,
                units,
            } = read_json(&cycle)?;
            let today = chrono::Utc::now().date_naive();
            let mut cycle = BillingCycle::restore(
                cycle,
                &rules,
                today,
                &config.cycles,
                config.minor_unit(),
            )?;
            let statement = cycle.finalize(&rules, &units, &calculator)?;
            print_json(&statement)?;
        }
    }

    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
