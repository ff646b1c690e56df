//! Serialisation roundtrip tests for `pivrun-core` registry and config types.
//!
//! Each `#[case]` stands alone.

use std::path::PathBuf;

use chrono::Utc;
use pivrun_core::{config::Config, FieldValue, InjectionStep, InstanceRecord, ProcessId, Registry};
use rstest::rstest;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn record(prefix: &str, source: &str) -> InstanceRecord {
    InstanceRecord {
        process_id: ProcessId(4242),
        process_start_time: Some(1_760_000_000),
        source_folder: PathBuf::from(source),
        name_prefix: prefix.to_string(),
        final_index: 120,
        output_folder: PathBuf::from("/out"),
        launched_at: Some(Utc::now()),
    }
}

fn empty_registry() -> Registry {
    Registry::new()
}

fn single_registry() -> Registry {
    [(PathBuf::from("/tmp/pivrun-isolation/piv-a"), record("run", "/data/A/B1"))]
        .into_iter()
        .collect()
}

fn unicode_registry() -> Registry {
    [(
        PathBuf::from("/tmp/pivrun-isolation/piv-ü"),
        record("実験_", "/データ/流れ場 1"),
    )]
    .into_iter()
    .collect()
}

// ---------------------------------------------------------------------------
// Parameterised registry roundtrip
// ---------------------------------------------------------------------------

#[rstest]
#[case("empty", empty_registry())]
#[case("single", single_registry())]
#[case("unicode_paths", unicode_registry())]
fn registry_roundtrip(#[case] label: &str, #[case] registry: Registry) {
    let json = serde_json::to_string_pretty(&registry)
        .unwrap_or_else(|e| panic!("[{label}] serialize failed: {e}"));
    let back: Registry = serde_json::from_str(&json)
        .unwrap_or_else(|e| panic!("[{label}] deserialize failed: {e}"));
    assert_eq!(registry, back, "[{label}]");
}

// ---------------------------------------------------------------------------
// Injection steps survive the YAML config format
// ---------------------------------------------------------------------------

#[rstest]
#[case(InjectionStep::navigate(7))]
#[case(InjectionStep::write(FieldValue::OutputFolder))]
#[case(InjectionStep::write(FieldValue::Literal("2".into())))]
#[case(InjectionStep::trigger("load"))]
#[case(InjectionStep::Settle)]
fn injection_step_yaml_roundtrip(#[case] step: InjectionStep) {
    let yaml = serde_yaml::to_string(&step).expect("serialize");
    let back: InjectionStep = serde_yaml::from_str(&yaml).expect("deserialize");
    assert_eq!(step, back);
}

#[test]
fn default_config_yaml_roundtrip() {
    let config = Config::default();
    let yaml = serde_yaml::to_string(&config).expect("serialize");
    let back: Config = serde_yaml::from_str(&yaml).expect("deserialize");
    assert_eq!(config, back);
}
