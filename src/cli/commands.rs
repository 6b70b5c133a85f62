use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use orchestra::guardian::OutputGuardian;
use orchestra::orchestrator::{
    MonitoringSnapshot, PortfolioOrchestrator, PortfolioRequest, SubOrchestrator,
};
use orchestra::resilience::BreakerRegistry;
use orchestra::trading::Domain;
use orchestra::workers::{DataMap, ReplaySpec, Worker};
use orchestra::Config;

/// One domain's replayed workers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainScenario {
    pub domain: Domain,
    pub workers: Vec<ReplaySpec>,
    #[serde(default)]
    pub minimum_viable: Option<Vec<String>>,
}

/// Scenario file consumed by `orchestra run`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub entity_ids: Vec<String>,
    #[serde(default)]
    pub macro_indicators: BTreeMap<String, f64>,
    #[serde(default)]
    pub market_data: DataMap,
    #[serde(default)]
    pub reference_data: DataMap,
    #[serde(default)]
    pub current_allocations: BTreeMap<Domain, f64>,
    pub domains: Vec<DomainScenario>,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("Invalid scenario {}", path.display()))
    }

    pub fn request(&self) -> PortfolioRequest {
        PortfolioRequest {
            entity_ids: self.entity_ids.clone(),
            macro_indicators: self.macro_indicators.clone(),
            market_data: self.market_data.clone(),
            reference_data: self.reference_data.clone(),
        }
    }
}

pub fn build_orchestrator(config: &Config, scenario: &Scenario) -> Result<PortfolioOrchestrator> {
    let registry = Arc::new(BreakerRegistry::default());
    let guardian = Arc::new(OutputGuardian::new(config.validator.clone()));
    let mut orchestrator = PortfolioOrchestrator::new(config, Arc::clone(&registry), Arc::clone(&guardian))?;

    for domain in &scenario.domains {
        let mut builder = SubOrchestrator::builder(domain.domain).settings(config);
        for spec in &domain.workers {
            let track = spec.track;
            let worker: Arc<dyn Worker> = Arc::new(spec.clone().into_worker());
            builder = builder.worker(track, worker);
        }
        if let Some(names) = &domain.minimum_viable {
            builder = builder.minimum_viable(names.as_slice());
        }
        let sub = builder
            .build(Arc::clone(&registry), Arc::clone(&guardian))
            .with_context(|| format!("Failed to build sub-orchestrator for {}", domain.domain))?;
        orchestrator.register(sub)?;
    }

    if !scenario.current_allocations.is_empty() {
        orchestrator.set_current_allocations(scenario.current_allocations.clone());
    }
    Ok(orchestrator)
}

/// Execute `cycles` portfolio runs and print each result plus a final snapshot
pub async fn run_scenario(config: Config, path: &Path, cycles: u32, history: usize) -> Result<()> {
    let scenario = Scenario::load(path)?;
    let mut orchestrator = build_orchestrator(&config, &scenario)?;
    info!(
        "📋 Scenario loaded: {} domains, {} entities",
        scenario.domains.len(),
        scenario.entity_ids.len()
    );

    for cycle in 1..=cycles {
        match orchestrator.run(scenario.request()).await {
            Ok(recommendation) => {
                println!("{}", serde_json::to_string_pretty(&recommendation)?);
            }
            Err(e) => {
                warn!("Cycle {} failed: {}", cycle, e);
                println!("{}", serde_json::json!({ "cycle": cycle, "error": e.to_string() }));
            }
        }
    }

    let snapshot = MonitoringSnapshot::capture(&orchestrator, history);
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

pub fn print_config(config: &Config) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
