use anyhow::Result;
use orchestra::config::Config;
use orchestra::workers::{ReplaySpec, Track};

#[test]
fn test_config_missing_file() {
    std::env::set_var("ORCHESTRA_CONFIG", "/nonexistent/orchestra.json");
    let result = Config::load();
    std::env::remove_var("ORCHESTRA_CONFIG");

    assert!(result.is_err());
    let err = result.unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}

#[test]
fn test_sample_scenario_workers_parse() -> Result<()> {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/scenarios/two_domains.json");
    let scenario: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;

    let domains = scenario["domains"].as_array().cloned().unwrap_or_default();
    assert_eq!(domains.len(), 2);
    for domain in domains {
        let specs: Vec<ReplaySpec> = serde_json::from_value(domain["workers"].clone())?;
        assert!(specs.iter().any(|s| s.track == Track::Numeric));
        assert!(specs.iter().all(|s| !s.script.is_empty()));
    }
    Ok(())
}
