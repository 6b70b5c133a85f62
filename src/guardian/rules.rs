//! Layer 1: deterministic rule checks
//!
//! Field ranges, cross-field consistency, staleness and a NaN/Inf scan.
//! No I/O, runs synchronously on every output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::workers::{DataMap, NumericScore};

/// A single field of a worker output as seen by the validator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(f64),
    Time(DateTime<Utc>),
    Text(String),
}

impl FieldValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(*b),
            Value::Number(n) => n.as_f64().map(FieldValue::Number).unwrap_or(FieldValue::Null),
            Value::String(s) => FieldValue::Text(s.clone()),
            other => FieldValue::Text(other.to_string()),
        }
    }

    fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::Time(t) => Value::String(t.to_rfc3339()),
            FieldValue::Text(s) => Value::String(s.clone()),
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Null => write!(f, "null"),
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Time(t) => write!(f, "{}", t.to_rfc3339()),
            FieldValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Time(value)
    }
}

/// Flat view of one worker output. Unlike a JSON map it keeps
/// non-finite numbers, so the NaN scan can see them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputRecord(BTreeMap<String, FieldValue>);

impl OutputRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<K: Into<String>, V: Into<FieldValue>>(mut self, key: K, value: V) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert<K: Into<String>, V: Into<FieldValue>>(&mut self, key: K, value: V) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.0.get(key)
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(FieldValue::as_number)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.0.iter()
    }

    pub fn from_map(map: &DataMap) -> Self {
        Self(
            map.iter()
                .map(|(k, v)| (k.clone(), FieldValue::from_json(v)))
                .collect(),
        )
    }

    /// Record for a raw numeric result. Signal entries are included unless
    /// they collide with the score fields.
    pub fn from_numeric(score: &NumericScore, timestamp: DateTime<Utc>) -> Self {
        let mut record = Self::from_map(&score.signals);
        record.insert("indicator", score.indicator.as_str());
        record.insert("score", score.score);
        record.insert("confidence", score.confidence);
        record.insert("timestamp", timestamp);
        record
    }

    /// JSON rendering; non-finite numbers become null
    pub fn to_map(&self) -> DataMap {
        self.0.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    pub field: String,
    pub min: f64,
    pub max: f64,
    pub required: bool,
    pub description: String,
}

impl ValidationRule {
    pub fn new(field: &str, min: f64, max: f64, required: bool, description: &str) -> Self {
        Self {
            field: field.to_string(),
            min,
            max,
            required,
            description: description.to_string(),
        }
    }

    pub fn check(&self, value: &FieldValue) -> Result<(), String> {
        if let FieldValue::Null = value {
            if self.required {
                return Err(format!("{}: required field is null", self.field));
            }
            return Ok(());
        }

        let num = value
            .as_number()
            .ok_or_else(|| format!("{}: cannot convert '{}' to a number", self.field, value))?;

        if !num.is_finite() {
            return Err(format!("{}: value is NaN or Inf", self.field));
        }
        if num < self.min || num > self.max {
            return Err(format!(
                "{}: {} out of range [{}, {}]",
                self.field, num, self.min, self.max
            ));
        }
        Ok(())
    }
}

/// Standard ranges for the fields workers commonly emit
pub fn standard_rules() -> Vec<ValidationRule> {
    vec![
        ValidationRule::new("price", 0.0001, 1_000_000.0, true, "Asset price"),
        ValidationRule::new("rsi", 0.0, 100.0, true, "Relative Strength Index"),
        ValidationRule::new("macd_signal", -1000.0, 1000.0, false, "MACD signal"),
        ValidationRule::new("volume", 0.0, 1e15, true, "Trading volume"),
        ValidationRule::new("confidence", 0.0, 1.0, true, "Confidence score"),
        ValidationRule::new("score", 0.0, 100.0, false, "Numeric worker score"),
        ValidationRule::new("severity_score", 0.0, 100.0, false, "Severity"),
        ValidationRule::new("daily_return_pct", -50.0, 50.0, false, "Daily return %"),
        ValidationRule::new("bid_ask_spread_pct", 0.0, 20.0, false, "Bid-ask spread %"),
        ValidationRule::new("market_cap", 0.0, 1e14, false, "Market cap"),
        ValidationRule::new("pe_ratio", -1000.0, 10000.0, false, "P/E ratio"),
        ValidationRule::new("dividend_yield", 0.0, 100.0, false, "Dividend yield %"),
        ValidationRule::new("beta", -10.0, 10.0, false, "Beta"),
        ValidationRule::new("sharpe_ratio", -10.0, 20.0, false, "Sharpe ratio"),
        ValidationRule::new("max_drawdown", -1.0, 0.0, false, "Max drawdown"),
        ValidationRule::new("altman_z_score", -10.0, 30.0, false, "Altman Z-score"),
        ValidationRule::new("dv01", -10000.0, 10000.0, false, "Dollar duration"),
        ValidationRule::new("oas", 0.0, 50000.0, false, "Option-adjusted spread bps"),
        ValidationRule::new("ltv_ratio", 0.0, 2.0, false, "Loan-to-value"),
        ValidationRule::new("cap_rate", 0.0, 50.0, false, "Capitalization rate %"),
        ValidationRule::new("recovery_rate", 0.0, 1.0, false, "Expected recovery"),
        ValidationRule::new("prob_default", 0.0, 1.0, false, "Probability of default"),
        ValidationRule::new("conviction", -1.0, 1.0, false, "Signed conviction"),
    ]
}

/// Relationship between several numeric fields
#[derive(Debug, Clone)]
pub struct CrossFieldRule {
    pub name: String,
    pub fields: Vec<String>,
    check: fn(&[f64]) -> Result<(), String>,
}

impl CrossFieldRule {
    pub fn new(name: &str, fields: &[&str], check: fn(&[f64]) -> Result<(), String>) -> Self {
        Self {
            name: name.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            check,
        }
    }

    /// None when any field is absent or not numeric
    pub fn evaluate(&self, record: &OutputRecord) -> Option<Result<(), String>> {
        let values: Option<Vec<f64>> = self.fields.iter().map(|f| record.number(f)).collect();
        values.map(|v| (self.check)(&v))
    }
}

pub fn standard_cross_rules() -> Vec<CrossFieldRule> {
    vec![
        CrossFieldRule::new("bid_lt_ask", &["bid", "ask"], |v| {
            if v[0] < v[1] {
                Ok(())
            } else {
                Err(format!("bid ({}) >= ask ({})", v[0], v[1]))
            }
        }),
        CrossFieldRule::new("open_between_high_low", &["open", "high", "low"], |v| {
            if v[2] <= v[0] && v[0] <= v[1] {
                Ok(())
            } else {
                Err(format!("open ({}) not between low ({}) and high ({})", v[0], v[2], v[1]))
            }
        }),
        CrossFieldRule::new("close_between_high_low", &["close", "high", "low"], |v| {
            if v[2] <= v[0] && v[0] <= v[1] {
                Ok(())
            } else {
                Err(format!("close ({}) not between low ({}) and high ({})", v[0], v[2], v[1]))
            }
        }),
        CrossFieldRule::new("high_gte_low", &["high", "low"], |v| {
            if v[0] >= v[1] {
                Ok(())
            } else {
                Err(format!("high ({}) < low ({})", v[0], v[1]))
            }
        }),
    ]
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleReport {
    pub passed: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub checked_fields: usize,
    pub failed_fields: usize,
}

impl RuleReport {
    fn new() -> Self {
        Self {
            passed: true,
            ..Default::default()
        }
    }

    fn error(&mut self, message: String) {
        self.errors.push(message);
        self.passed = false;
    }
}

#[derive(Debug, Clone)]
pub struct RuleValidator {
    rules: BTreeMap<String, ValidationRule>,
    cross_rules: Vec<CrossFieldRule>,
    staleness_threshold_secs: f64,
}

impl RuleValidator {
    pub fn new(staleness_threshold_secs: f64) -> Self {
        Self::with_rules(standard_rules(), standard_cross_rules(), staleness_threshold_secs)
    }

    pub fn with_rules(
        rules: Vec<ValidationRule>,
        cross_rules: Vec<CrossFieldRule>,
        staleness_threshold_secs: f64,
    ) -> Self {
        Self {
            rules: rules.into_iter().map(|r| (r.field.clone(), r)).collect(),
            cross_rules,
            staleness_threshold_secs,
        }
    }

    pub fn add_rule(&mut self, rule: ValidationRule) {
        self.rules.insert(rule.field.clone(), rule);
    }

    pub fn add_cross_rule(&mut self, rule: CrossFieldRule) {
        self.cross_rules.push(rule);
    }

    pub fn rule(&self, field: &str) -> Option<&ValidationRule> {
        self.rules.get(field)
    }

    pub fn staleness_threshold_secs(&self) -> f64 {
        self.staleness_threshold_secs
    }

    pub fn validate(&self, record: &OutputRecord) -> RuleReport {
        let mut report = RuleReport::new();

        if record.is_empty() {
            report.error("Empty output record".to_string());
            return report;
        }

        for (field, value) in record.iter() {
            if let Some(rule) = self.rules.get(field) {
                report.checked_fields += 1;
                if let Err(message) = rule.check(value) {
                    report.failed_fields += 1;
                    report.error(message);
                }
            } else if let FieldValue::Number(n) = value {
                if !n.is_finite() {
                    report.error(format!("{}: contains NaN or Inf", field));
                }
            }
        }

        for rule in &self.cross_rules {
            if let Some(Err(message)) = rule.evaluate(record) {
                report.error(format!("Cross-field[{}]: {}", rule.name, message));
            }
        }

        if let Some(timestamp) = record.get("timestamp") {
            self.check_staleness(timestamp, &mut report);
        }

        report
    }

    pub fn validate_batch(&self, records: &[OutputRecord]) -> Vec<RuleReport> {
        records.iter().map(|r| self.validate(r)).collect()
    }

    fn check_staleness(&self, timestamp: &FieldValue, report: &mut RuleReport) {
        let at = match timestamp {
            FieldValue::Null => return,
            FieldValue::Time(t) => Some(*t),
            FieldValue::Text(s) => DateTime::parse_from_rfc3339(s).ok().map(|t| t.with_timezone(&Utc)),
            FieldValue::Number(secs) if secs.is_finite() => {
                DateTime::<Utc>::from_timestamp(secs.trunc() as i64, (secs.fract() * 1e9) as u32)
            }
            _ => None,
        };

        let Some(at) = at else {
            report.warnings.push(format!("Cannot parse timestamp '{}'", timestamp));
            return;
        };

        let age = (Utc::now() - at).num_milliseconds() as f64 / 1000.0;
        if age > self.staleness_threshold_secs {
            report.warnings.push(format!(
                "Data is {:.0}s old (threshold: {}s)",
                age, self.staleness_threshold_secs
            ));
        }
    }
}

impl Default for RuleValidator {
    fn default() -> Self {
        Self::new(300.0)
    }
}
