//! Macro Regime Classification
//!
//! Scores the latest macro indicators on three dimensions (growth,
//! inflation, volatility) and maps them to a discrete regime. Each regime
//! carries a starting allocation template for the capital allocator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

use super::domain::Domain;
use crate::errors::{OrchestraError, OrchestraResult};

/// Market regime classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketRegime {
    RisingGrowthRisingInflation,
    RisingGrowthFallingInflation,
    FallingGrowthRisingInflation,
    FallingGrowthFallingInflation,
    HighVolatility,
    LowVolatility,
    RiskOn,
    RiskOff,
    Unknown,
}

impl std::fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            MarketRegime::RisingGrowthRisingInflation => "RISING_GROWTH_RISING_INFLATION",
            MarketRegime::RisingGrowthFallingInflation => "RISING_GROWTH_FALLING_INFLATION",
            MarketRegime::FallingGrowthRisingInflation => "FALLING_GROWTH_RISING_INFLATION",
            MarketRegime::FallingGrowthFallingInflation => "FALLING_GROWTH_FALLING_INFLATION",
            MarketRegime::HighVolatility => "HIGH_VOLATILITY",
            MarketRegime::LowVolatility => "LOW_VOLATILITY",
            MarketRegime::RiskOn => "RISK_ON",
            MarketRegime::RiskOff => "RISK_OFF",
            MarketRegime::Unknown => "UNKNOWN",
        };
        write!(f, "{}", label)
    }
}

/// Select a regime from dimension scores.
///
/// Volatility at or above the threshold overrides the quadrant. A growth
/// or inflation score of exactly zero counts as falling.
pub fn select_regime(
    growth: f64,
    inflation: f64,
    volatility: f64,
    high_volatility_threshold: f64,
) -> MarketRegime {
    if volatility >= high_volatility_threshold {
        return MarketRegime::HighVolatility;
    }
    match (growth > 0.0, inflation > 0.0) {
        (true, true) => MarketRegime::RisingGrowthRisingInflation,
        (true, false) => MarketRegime::RisingGrowthFallingInflation,
        (false, true) => MarketRegime::FallingGrowthRisingInflation,
        (false, false) => MarketRegime::FallingGrowthFallingInflation,
    }
}

impl MarketRegime {
    /// Human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            MarketRegime::RisingGrowthRisingInflation => {
                "Reflation - real assets and crypto favored, duration penalized"
            }
            MarketRegime::RisingGrowthFallingInflation => {
                "Goldilocks - balanced risk-on with bonds still supportive"
            }
            MarketRegime::FallingGrowthRisingInflation => {
                "Stagflation - distressed opportunities, minimal crypto"
            }
            MarketRegime::FallingGrowthFallingInflation => {
                "Deflationary slowdown - duration favored"
            }
            MarketRegime::HighVolatility => "Stress - defensive bonds and distressed, crypto cut",
            MarketRegime::LowVolatility => "Calm markets - treated as risk-off for allocation",
            MarketRegime::RiskOn => "Broad risk appetite - growth assets favored",
            MarketRegime::RiskOff => "Broad risk aversion - bonds favored",
            MarketRegime::Unknown => "Insufficient data - defensive template applied",
        }
    }
}

/// Per-domain starting allocation fractions
pub type AllocationTemplate = BTreeMap<Domain, f64>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSpec {
    pub name: String,
    pub weight: f64,
    /// Reference level that scores zero
    pub neutral: f64,
    /// Higher readings mean weaker conditions
    #[serde(default)]
    pub inverted: bool,
}

impl IndicatorSpec {
    fn new(name: &str, weight: f64, neutral: f64) -> Self {
        Self {
            name: name.to_string(),
            weight,
            neutral,
            inverted: false,
        }
    }

    fn inverted(mut self) -> Self {
        self.inverted = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilityIndicatorSpec {
    pub name: String,
    pub weight: f64,
    pub high: f64,
    pub critical: f64,
}

impl VolatilityIndicatorSpec {
    fn new(name: &str, weight: f64, high: f64, critical: f64) -> Self {
        Self {
            name: name.to_string(),
            weight,
            high,
            critical,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    pub growth: Vec<IndicatorSpec>,
    pub inflation: Vec<IndicatorSpec>,
    pub volatility: Vec<VolatilityIndicatorSpec>,
    pub high_volatility_threshold: f64,
    pub templates: BTreeMap<MarketRegime, AllocationTemplate>,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            growth: vec![
                IndicatorSpec::new("gdp_growth", 0.30, 2.0),
                IndicatorSpec::new("pmi", 0.25, 50.0),
                IndicatorSpec::new("unemployment_claims", 0.15, 250_000.0).inverted(),
                IndicatorSpec::new("retail_sales_yoy", 0.15, 3.0),
                IndicatorSpec::new("industrial_production_yoy", 0.15, 1.0),
            ],
            inflation: vec![
                IndicatorSpec::new("cpi_yoy", 0.30, 2.5),
                IndicatorSpec::new("pce_yoy", 0.25, 2.0),
                IndicatorSpec::new("fed_funds_rate", 0.20, 3.0),
                IndicatorSpec::new("breakeven_inflation_5y", 0.15, 2.2),
                IndicatorSpec::new("commodity_index_yoy", 0.10, 0.0),
            ],
            volatility: vec![
                VolatilityIndicatorSpec::new("vix", 0.40, 25.0, 35.0),
                VolatilityIndicatorSpec::new("credit_spread_hy", 0.30, 500.0, 800.0),
                VolatilityIndicatorSpec::new("move_index", 0.30, 120.0, 160.0),
            ],
            high_volatility_threshold: 75.0,
            templates: Self::default_templates(),
        }
    }
}

impl RegimeConfig {
    /// Bonds / crypto / real estate / distressed fractions per named regime
    pub fn default_templates() -> BTreeMap<MarketRegime, AllocationTemplate> {
        let rows = [
            (MarketRegime::RisingGrowthRisingInflation, [0.10, 0.25, 0.35, 0.30]),
            (MarketRegime::RisingGrowthFallingInflation, [0.30, 0.20, 0.30, 0.20]),
            (MarketRegime::FallingGrowthRisingInflation, [0.15, 0.10, 0.15, 0.60]),
            (MarketRegime::FallingGrowthFallingInflation, [0.45, 0.10, 0.20, 0.25]),
            (MarketRegime::HighVolatility, [0.30, 0.05, 0.15, 0.50]),
            (MarketRegime::RiskOn, [0.15, 0.30, 0.30, 0.25]),
            (MarketRegime::RiskOff, [0.50, 0.05, 0.15, 0.30]),
        ];
        rows.into_iter()
            .map(|(regime, fractions)| (regime, Domain::ALL.into_iter().zip(fractions).collect()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeClassification {
    pub regime: MarketRegime,
    pub confidence: f64,
    pub growth_score: f64,
    pub inflation_score: f64,
    /// 0-100
    pub volatility_score: f64,
    pub allocation_template: AllocationTemplate,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RegimeClassifier {
    config: RegimeConfig,
    indicators: BTreeMap<String, f64>,
    history: Vec<RegimeClassification>,
}

impl RegimeClassifier {
    pub fn new(config: RegimeConfig) -> Self {
        Self {
            config,
            indicators: BTreeMap::new(),
            history: Vec::new(),
        }
    }

    /// Last write wins; non-finite readings are dropped
    pub fn update_indicator(&mut self, name: &str, value: f64) {
        if !value.is_finite() {
            warn!("Ignoring non-finite reading for indicator '{}'", name);
            return;
        }
        self.indicators.insert(name.to_string(), value);
    }

    pub fn update_indicators<'a, I>(&mut self, readings: I)
    where
        I: IntoIterator<Item = (&'a String, &'a f64)>,
    {
        for (name, value) in readings {
            self.update_indicator(name, *value);
        }
    }

    pub fn indicators(&self) -> &BTreeMap<String, f64> {
        &self.indicators
    }

    /// Growth score in [-2, 2] and the share of configured weight available
    pub fn growth_score(&self) -> (f64, f64) {
        self.dimension_score(&self.config.growth)
    }

    pub fn inflation_score(&self) -> (f64, f64) {
        self.dimension_score(&self.config.inflation)
    }

    /// Weighted 0-100 stress score; 50 when no volatility data is present
    pub fn volatility_score(&self) -> f64 {
        let mut weighted = 0.0;
        let mut available = 0.0;
        for spec in &self.config.volatility {
            let Some(value) = self.indicators.get(&spec.name) else {
                continue;
            };
            let score = if *value >= spec.critical {
                100.0
            } else if *value >= spec.high {
                let span = spec.critical - spec.high;
                let pct = if span > 0.0 { (value - spec.high) / span } else { 1.0 };
                50.0 + pct * 50.0
            } else if spec.high > 0.0 {
                (value / spec.high * 50.0).max(0.0)
            } else {
                0.0
            };
            weighted += score * spec.weight;
            available += spec.weight;
        }
        if available > 0.0 {
            weighted / available
        } else {
            50.0
        }
    }

    pub fn template_for(&self, regime: MarketRegime) -> AllocationTemplate {
        self.config
            .templates
            .get(&regime)
            .or_else(|| self.config.templates.get(&MarketRegime::RiskOff))
            .cloned()
            .unwrap_or_default()
    }

    /// Classify the current indicator set and append the result to history
    pub fn classify(&mut self) -> OrchestraResult<RegimeClassification> {
        if self.indicators.is_empty() {
            return Err(OrchestraError::RegimeDetection(
                "no macro indicators available".to_string(),
            ));
        }
        let (growth, growth_confidence) = self.growth_score();
        let (inflation, inflation_confidence) = self.inflation_score();
        let volatility = self.volatility_score();
        let regime = select_regime(
            growth,
            inflation,
            volatility,
            self.config.high_volatility_threshold,
        );

        let classification = RegimeClassification {
            regime,
            confidence: (growth_confidence + inflation_confidence) / 2.0,
            growth_score: growth,
            inflation_score: inflation,
            volatility_score: volatility,
            allocation_template: self.template_for(regime),
            timestamp: Utc::now(),
        };
        info!(
            "Regime {} (growth {:.3}, inflation {:.3}, volatility {:.1}, confidence {:.2})",
            regime, growth, inflation, volatility, classification.confidence
        );
        self.history.push(classification.clone());
        Ok(classification)
    }

    /// Record an UNKNOWN classification with zero confidence
    pub fn fallback(&mut self) -> RegimeClassification {
        let classification = RegimeClassification {
            regime: MarketRegime::Unknown,
            confidence: 0.0,
            growth_score: 0.0,
            inflation_score: 0.0,
            volatility_score: 50.0,
            allocation_template: self.template_for(MarketRegime::Unknown),
            timestamp: Utc::now(),
        };
        self.history.push(classification.clone());
        classification
    }

    pub fn current(&self) -> Option<&RegimeClassification> {
        self.history.last()
    }

    /// The most recent `n` classifications, oldest first
    pub fn history(&self, n: usize) -> &[RegimeClassification] {
        let start = self.history.len().saturating_sub(n);
        &self.history[start..]
    }

    fn dimension_score(&self, specs: &[IndicatorSpec]) -> (f64, f64) {
        let total_weight: f64 = specs.iter().map(|s| s.weight).sum();
        let mut weighted = 0.0;
        let mut available = 0.0;

        for spec in specs {
            let Some(value) = self.indicators.get(&spec.name) else {
                continue;
            };
            let scale = if spec.neutral == 0.0 { 10.0 } else { spec.neutral.abs() };
            let mut deviation = (value - spec.neutral) / scale;
            if spec.inverted {
                deviation = -deviation;
            }
            weighted += deviation.clamp(-2.0, 2.0) * spec.weight;
            available += spec.weight;
        }

        if available == 0.0 || total_weight == 0.0 {
            return (0.0, 0.0);
        }
        (weighted / available, available / total_weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> RegimeClassifier {
        RegimeClassifier::new(RegimeConfig::default())
    }

    #[test]
    fn test_quadrant_selection() {
        assert_eq!(
            select_regime(0.4, -0.2, 20.0, 75.0),
            MarketRegime::RisingGrowthFallingInflation
        );
        assert_eq!(
            select_regime(0.4, 0.2, 20.0, 75.0),
            MarketRegime::RisingGrowthRisingInflation
        );
        assert_eq!(
            select_regime(-0.4, 0.2, 20.0, 75.0),
            MarketRegime::FallingGrowthRisingInflation
        );
        assert_eq!(
            select_regime(0.4, 0.2, 75.0, 75.0),
            MarketRegime::HighVolatility
        );
    }

    #[test]
    fn test_zero_scores_fall_to_falling_side() {
        assert_eq!(
            select_regime(0.0, 0.0, 10.0, 75.0),
            MarketRegime::FallingGrowthFallingInflation
        );
        assert_eq!(
            select_regime(0.0, 0.5, 10.0, 75.0),
            MarketRegime::FallingGrowthRisingInflation
        );
        assert_eq!(
            select_regime(0.5, 0.0, 10.0, 75.0),
            MarketRegime::RisingGrowthFallingInflation
        );
    }

    #[test]
    fn test_growth_score_and_confidence() {
        let mut c = classifier();
        c.update_indicator("gdp_growth", 3.0);
        c.update_indicator("unemployment_claims", 300_000.0);

        let (score, confidence) = c.growth_score();
        // gdp +0.5 at 0.30, claims inverted -0.2 at 0.15
        let expected = (0.5 * 0.30 + -0.2 * 0.15) / 0.45;
        assert!((score - expected).abs() < 1e-9);
        assert!((confidence - 0.45).abs() < 1e-9);
    }

    #[test]
    fn test_zero_neutral_uses_fixed_scale_and_clamps() {
        let mut c = classifier();
        c.update_indicator("commodity_index_yoy", 5.0);
        assert!((c.inflation_score().0 - 0.5).abs() < 1e-9);
        c.update_indicator("commodity_index_yoy", 80.0);
        assert_eq!(c.inflation_score().0, 2.0);
    }

    #[test]
    fn test_volatility_interpolation() {
        let mut c = classifier();
        assert_eq!(c.volatility_score(), 50.0);

        c.update_indicator("vix", 30.0);
        assert!((c.volatility_score() - 75.0).abs() < 1e-9);
        c.update_indicator("vix", 12.5);
        assert!((c.volatility_score() - 25.0).abs() < 1e-9);
        c.update_indicator("vix", 40.0);
        assert_eq!(c.volatility_score(), 100.0);
    }

    #[test]
    fn test_classify_appends_history() {
        let mut c = classifier();
        c.update_indicators(&BTreeMap::from([
            ("gdp_growth".to_string(), 3.0),
            ("cpi_yoy".to_string(), 2.0),
            ("vix".to_string(), 15.0),
        ]));

        let result = c.classify().unwrap();
        assert_eq!(result.regime, MarketRegime::RisingGrowthFallingInflation);
        assert_eq!(result.allocation_template[&Domain::Bonds], 0.30);

        c.update_indicator("vix", 50.0);
        assert_eq!(c.classify().unwrap().regime, MarketRegime::HighVolatility);
        assert_eq!(c.history(10).len(), 2);
        assert_eq!(c.history(1)[0].regime, MarketRegime::HighVolatility);
        assert_eq!(c.current().map(|r| r.regime), Some(MarketRegime::HighVolatility));
    }

    #[test]
    fn test_missing_indicators_fail_and_fallback_is_unknown() {
        let mut c = classifier();
        assert!(c.classify().is_err());
        let fallback = c.fallback();
        assert_eq!(fallback.regime, MarketRegime::Unknown);
        assert_eq!(fallback.confidence, 0.0);
        assert_eq!(fallback.allocation_template, c.template_for(MarketRegime::RiskOff));
        assert_eq!(c.history(5).len(), 1);
    }

    #[test]
    fn test_non_finite_reading_ignored() {
        let mut c = classifier();
        c.update_indicator("vix", f64::NAN);
        assert!(c.indicators().is_empty());
    }

    #[test]
    fn test_templates_sum_to_one() {
        for (regime, template) in RegimeConfig::default_templates() {
            let total: f64 = template.values().sum();
            assert!((total - 1.0).abs() < 1e-9, "{} sums to {}", regime, total);
        }
    }
}
