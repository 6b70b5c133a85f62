//! Domain Risk Models
//!
//! Each domain turns its fetched data map into one `RiskMetrics` record per
//! run. The shared fields feed portfolio aggregation; the domain payload is
//! carried through to signals for downstream consumers.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::domain::Domain;
use crate::workers::DataMap;

/// One-sided 95% normal quantile
const Z_95: f64 = 1.645;

const TRADING_DAYS: f64 = 252.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainRisk {
    Rates {
        modified_duration: f64,
        dv01: f64,
        cs01: f64,
        oas: f64,
        key_rate_duration: BTreeMap<String, f64>,
    },
    Volatility {
        realized_volatility: f64,
        implied_volatility: f64,
        liquidity_depth: f64,
        exchange_concentration: f64,
    },
    Valuation {
        cap_rate: f64,
        ltv_ratio: f64,
        vacancy_rate: f64,
    },
    CreditRecovery {
        expected_recovery: f64,
        prob_default: f64,
        time_to_resolution_months: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub domain: Domain,
    pub var_95: Option<f64>,
    pub cvar_95: Option<f64>,
    pub max_drawdown: Option<f64>,
    pub sharpe_ratio: Option<f64>,
    pub detail: Option<DomainRisk>,
}

impl RiskMetrics {
    /// Placeholder used when a domain's risk computation fails
    pub fn empty(domain: Domain) -> Self {
        Self {
            domain,
            var_95: None,
            cvar_95: None,
            max_drawdown: None,
            sharpe_ratio: None,
            detail: None,
        }
    }

    /// Shared and domain fields flattened into one map, unset fields omitted
    pub fn to_map(&self) -> DataMap {
        let mut map = DataMap::new();
        let shared = [
            ("var_95", self.var_95),
            ("cvar_95", self.cvar_95),
            ("max_drawdown", self.max_drawdown),
            ("sharpe_ratio", self.sharpe_ratio),
        ];
        for (key, value) in shared {
            if let Some(v) = value {
                map.insert(key.to_string(), Value::from(v));
            }
        }
        if let Some(detail) = &self.detail {
            if let Ok(Value::Object(fields)) = serde_json::to_value(detail) {
                for (key, value) in fields {
                    if key != "kind" {
                        map.insert(key, value);
                    }
                }
            }
        }
        map
    }
}

/// Distressed deal summary attached to the distressed domain's report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealAnalysis {
    pub enterprise_value: f64,
    pub total_debt: f64,
    pub blended_recovery: f64,
}

pub trait RiskModel: Send + Sync {
    fn domain(&self) -> Domain;

    fn compute(&self, data: &DataMap) -> Result<RiskMetrics>;

    fn deal_analysis(&self, _data: &DataMap) -> Option<DealAnalysis> {
        None
    }
}

/// Built-in model for a domain
pub fn default_risk_model(domain: Domain) -> Box<dyn RiskModel> {
    match domain {
        Domain::Bonds => Box::new(RatesRiskModel),
        Domain::Crypto => Box::new(CryptoRiskModel),
        Domain::RealEstate => Box::new(RealEstateRiskModel),
        Domain::Distressed => Box::new(DistressedRiskModel),
    }
}

fn section<'a>(data: &'a DataMap, key: &str) -> Option<&'a DataMap> {
    data.get(key).and_then(Value::as_object)
}

fn number(section: Option<&DataMap>, key: &str, default: f64) -> Result<f64> {
    match section.and_then(|s| s.get(key)) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value
            .as_f64()
            .ok_or_else(|| anyhow!("field '{}' is not numeric: {}", key, value)),
    }
}

pub struct RatesRiskModel;

impl RiskModel for RatesRiskModel {
    fn domain(&self) -> Domain {
        Domain::Bonds
    }

    fn compute(&self, data: &DataMap) -> Result<RiskMetrics> {
        let portfolio = section(data, "bond_portfolio");
        let spreads = section(data, "credit_spreads");
        let dv01 = number(portfolio, "dv01", 500.0)?;
        let modified_duration = number(portfolio, "modified_duration", 5.0)?;

        // ~15bp daily rate vol
        let var_95 = modified_duration * 0.15 * Z_95 / 100.0;

        let key_rate_duration = section(data, "treasury_rates")
            .map(|rates| {
                rates
                    .keys()
                    .map(|tenor| {
                        let scale = if tenor == "2Y" || tenor == "30Y" { 0.5 } else { 1.0 };
                        (tenor.clone(), modified_duration * scale)
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(RiskMetrics {
            domain: Domain::Bonds,
            var_95: Some(var_95),
            cvar_95: Some(var_95 * 1.4),
            max_drawdown: Some(-0.05),
            sharpe_ratio: None,
            detail: Some(DomainRisk::Rates {
                modified_duration,
                dv01,
                cs01: number(spreads, "investment_grade", 120.0)? * 0.01,
                oas: number(spreads, "high_yield", 450.0)?,
                key_rate_duration,
            }),
        })
    }
}

pub struct CryptoRiskModel;

impl RiskModel for CryptoRiskModel {
    fn domain(&self) -> Domain {
        Domain::Crypto
    }

    fn compute(&self, data: &DataMap) -> Result<RiskMetrics> {
        let realized = number(section(data, "volatility"), "realized_30d", 0.60)?;
        let daily = TRADING_DAYS.sqrt();

        Ok(RiskMetrics {
            domain: Domain::Crypto,
            var_95: Some(realized * Z_95 / daily),
            cvar_95: Some(realized * 2.0 / daily),
            max_drawdown: Some(-0.20),
            sharpe_ratio: None,
            detail: Some(DomainRisk::Volatility {
                realized_volatility: realized,
                implied_volatility: realized * 1.1,
                liquidity_depth: number(section(data, "volume"), "volume_24h_usd", 50e9)?,
                exchange_concentration: 0.35,
            }),
        })
    }
}

pub struct RealEstateRiskModel;

impl RiskModel for RealEstateRiskModel {
    fn domain(&self) -> Domain {
        Domain::RealEstate
    }

    fn compute(&self, data: &DataMap) -> Result<RiskMetrics> {
        let cap_rate = number(section(data, "valuations"), "current_cap_rate", 5.5)?;
        let vacancy_rising = section(data, "market_cycle")
            .and_then(|cycle| cycle.get("vacancy_trend"))
            .and_then(Value::as_str)
            == Some("rising");

        // quarterly horizon
        let var_95 = 0.08;
        Ok(RiskMetrics {
            domain: Domain::RealEstate,
            var_95: Some(var_95),
            cvar_95: Some(var_95 * 1.5),
            max_drawdown: Some(-0.15),
            sharpe_ratio: None,
            detail: Some(DomainRisk::Valuation {
                cap_rate,
                ltv_ratio: 0.65,
                vacancy_rate: if vacancy_rising { 0.08 } else { 0.05 },
            }),
        })
    }
}

pub struct DistressedRiskModel;

impl DistressedRiskModel {
    fn total_debt(deal: Option<&DataMap>) -> Result<f64> {
        Ok(number(deal, "senior_secured_debt", 0.0)?
            + number(deal, "senior_unsecured_debt", 0.0)?
            + number(deal, "subordinated_debt", 0.0)?)
    }
}

impl RiskModel for DistressedRiskModel {
    fn domain(&self) -> Domain {
        Domain::Distressed
    }

    fn compute(&self, data: &DataMap) -> Result<RiskMetrics> {
        let deal = section(data, "deal_data");
        let enterprise_value = number(deal, "enterprise_value", 500_000_000.0)?;
        let total_debt = Self::total_debt(deal)?;
        let recovery = if total_debt > 0.0 {
            enterprise_value / total_debt
        } else {
            0.0
        };

        let spread_bps = number(section(data, "pricing"), "spread_to_treasury_bps", 1200.0)?;
        let loss_given_default = 1.0 - recovery;
        let prob_default = if loss_given_default > 0.0 {
            (spread_bps / 10_000.0) / loss_given_default
        } else {
            0.5
        };

        Ok(RiskMetrics {
            domain: Domain::Distressed,
            var_95: Some(0.15),
            cvar_95: Some(0.25),
            max_drawdown: Some(-0.30),
            sharpe_ratio: None,
            detail: Some(DomainRisk::CreditRecovery {
                expected_recovery: recovery.min(1.0),
                prob_default: prob_default.min(1.0),
                time_to_resolution_months: 18.0,
            }),
        })
    }

    fn deal_analysis(&self, data: &DataMap) -> Option<DealAnalysis> {
        let deal = section(data, "deal_data")?;
        let enterprise_value = number(Some(deal), "enterprise_value", 0.0).ok()?;
        let total_debt = Self::total_debt(Some(deal)).ok()?;
        Some(DealAnalysis {
            enterprise_value,
            total_debt,
            blended_recovery: if total_debt > 0.0 {
                enterprise_value / total_debt
            } else {
                0.0
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: Value) -> DataMap {
        match value {
            Value::Object(map) => map,
            _ => DataMap::new(),
        }
    }

    #[test]
    fn test_bonds_defaults() {
        let metrics = RatesRiskModel
            .compute(&data(json!({"treasury_rates": {"2Y": 4.1, "10Y": 4.3}})))
            .unwrap();
        let var = 5.0 * 0.15 * 1.645 / 100.0;
        assert!((metrics.var_95.unwrap() - var).abs() < 1e-12);
        assert!((metrics.cvar_95.unwrap() - var * 1.4).abs() < 1e-12);

        match metrics.detail.unwrap() {
            DomainRisk::Rates {
                cs01,
                oas,
                key_rate_duration,
                ..
            } => {
                assert!((cs01 - 1.2).abs() < 1e-12);
                assert_eq!(oas, 450.0);
                assert_eq!(key_rate_duration["2Y"], 2.5);
                assert_eq!(key_rate_duration["10Y"], 5.0);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_crypto_uses_volume_for_liquidity() {
        let metrics = CryptoRiskModel
            .compute(&data(json!({"volume": {"volume_24h_usd": 1.0e9}})))
            .unwrap();
        let map = metrics.to_map();
        assert_eq!(map["liquidity_depth"], 1.0e9);
        assert_eq!(map["max_drawdown"], -0.20);
        assert!(!map.contains_key("kind"));
        assert!(!map.contains_key("sharpe_ratio"));
    }

    #[test]
    fn test_real_estate_vacancy_trend() {
        let rising = RealEstateRiskModel
            .compute(&data(json!({"market_cycle": {"vacancy_trend": "rising"}})))
            .unwrap();
        assert_eq!(rising.to_map()["vacancy_rate"], 0.08);
        let flat = RealEstateRiskModel.compute(&DataMap::new()).unwrap();
        assert_eq!(flat.to_map()["vacancy_rate"], 0.05);
        assert_eq!(flat.to_map()["cap_rate"], 5.5);
    }

    #[test]
    fn test_distressed_recovery_and_default_probability() {
        let input = data(json!({
            "deal_data": {
                "enterprise_value": 400.0,
                "senior_secured_debt": 500.0,
                "subordinated_debt": 300.0
            },
            "pricing": {"spread_to_treasury_bps": 1000.0}
        }));
        let metrics = DistressedRiskModel.compute(&input).unwrap();
        match metrics.detail.unwrap() {
            DomainRisk::CreditRecovery {
                expected_recovery,
                prob_default,
                ..
            } => {
                assert!((expected_recovery - 0.5).abs() < 1e-12);
                assert!((prob_default - 0.2).abs() < 1e-12);
            }
            other => panic!("unexpected payload {:?}", other),
        }

        let deal = DistressedRiskModel.deal_analysis(&input).unwrap();
        assert_eq!(deal.total_debt, 800.0);
        assert!((deal.blended_recovery - 0.5).abs() < 1e-12);
        assert!(DistressedRiskModel.deal_analysis(&DataMap::new()).is_none());
    }

    #[test]
    fn test_full_recovery_caps_default_probability() {
        let input = data(json!({"deal_data": {"enterprise_value": 900.0, "senior_secured_debt": 600.0}}));
        let metrics = DistressedRiskModel.compute(&input).unwrap();
        assert_eq!(metrics.to_map()["expected_recovery"], 1.0);
        assert_eq!(metrics.to_map()["prob_default"], 0.5);
    }

    #[test]
    fn test_non_numeric_field_is_an_error() {
        let input = data(json!({"bond_portfolio": {"modified_duration": "long"}}));
        assert!(RatesRiskModel.compute(&input).is_err());
    }
}
