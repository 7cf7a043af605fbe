use super::*;

#[test]
fn test_default_config() {
    let config = ProjectConfig::default();

    assert_eq!(config.shared_state.frequency_threshold, 5);
    assert!(config
        .shared_state
        .critical_data
        .contains(&"balance".to_string()));
    assert!(!config.shared_state.assume_concurrent);
    assert!(config.lock_order.follow_self_calls);
    assert_eq!(config.stress.threads, 10);
    assert_eq!(config.stress.iterations, 1000);
}

#[test]
fn test_parse_toml_config() {
    let toml_content = r#"
[shared_state]
frequency_threshold = 8
critical_data = ["ledger"]
assume_concurrent = true

[lock_order]
lock_names = ["_guard"]
follow_self_calls = false

[stress]
threads = 4
timeout_secs = 2.5

[exclude]
paths = ["generated/"]

[defaults]
format = "json"
severity = "high"
"#;

    let config: ProjectConfig = toml::from_str(toml_content).unwrap();

    assert_eq!(config.shared_state.frequency_threshold, 8);
    assert_eq!(config.shared_state.critical_data, vec!["ledger"]);
    assert!(config.shared_state.assume_concurrent);
    assert_eq!(config.lock_order.lock_names, vec!["_guard"]);
    assert!(!config.lock_order.follow_self_calls);
    assert_eq!(config.stress.threads, 4);
    assert_eq!(config.stress.iterations, 1000);
    assert!((config.stress.timeout_secs - 2.5).abs() < f64::EPSILON);
    assert_eq!(config.exclude.paths, vec!["generated/"]);
    assert_eq!(config.defaults.format, Some("json".to_string()));
    assert_eq!(config.defaults.severity, Some("high".to_string()));
}

#[test]
fn test_example_config_parses() {
    let config: ProjectConfig = toml::from_str(EXAMPLE_CONFIG).unwrap();
    assert_eq!(config.stress.iterations, 1000);
    assert!(config.lock_order.follow_self_calls);
}

#[test]
fn test_effective_patterns() {
    let config = ExcludeConfig {
        paths: vec!["generated/".to_string(), "**/venv/**".to_string()],
        skip_defaults: false,
    };
    let patterns = config.effective_patterns();
    assert!(patterns.contains(&"generated/".to_string()));
    assert_eq!(
        patterns.iter().filter(|p| p.as_str() == "**/venv/**").count(),
        1
    );

    let only_user = ExcludeConfig {
        paths: vec!["generated/".to_string()],
        skip_defaults: true,
    };
    assert_eq!(only_user.effective_patterns(), vec!["generated/"]);
}

#[test]
fn test_load_from_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("repotoire.toml"),
        "[stress]\nthreads = 3\n",
    )
    .unwrap();

    let config = load_project_config(dir.path());
    assert_eq!(config.stress.threads, 3);
}

#[test]
fn test_invalid_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("repotoire.toml"), "[stress\nthreads = ").unwrap();

    let config = load_project_config(dir.path());
    assert_eq!(config.stress.threads, 10);
}

#[test]
fn test_json_config() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join(".repotoirerc.json"),
        r#"{"shared_state": {"frequency_threshold": 2}}"#,
    )
    .unwrap();

    let config = load_project_config(dir.path());
    assert_eq!(config.shared_state.frequency_threshold, 2);
}
