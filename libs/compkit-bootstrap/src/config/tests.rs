use super::*;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_default_config() {
    let config = AppConfig::default();

    assert_eq!(config.home_dir, ".");
    assert_eq!(config.manager.construction_timeout, None);
    assert_eq!(config.manager.teardown_grace, Duration::from_secs(10));

    let logging = config.logging.as_ref().unwrap();
    let default = logging.get("default").unwrap();
    assert_eq!(default.console_level, "info");
    assert_eq!(default.file, "logs/compkit.log");

    assert!(config.components.is_empty());
}

#[test]
fn test_yaml_serialization() {
    let config = AppConfig::default();
    let yaml = config.to_yaml().expect("Failed to serialize to YAML");

    assert!(yaml.contains("manager:"));
    assert!(yaml.contains("teardown_grace: 10s"));
    assert!(yaml.contains("logging:"));
    assert!(yaml.contains("components:"));
}

#[test]
fn test_layered_loading_yaml_only() {
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let config_path = temp_dir.path().join("test-config.yaml");

    let yaml_content = format!(
        r#"
home_dir: "{}"
manager:
  construction_timeout: 30s
  teardown_grace: 2s
components:
  statistics-storage: {{}}
  heartbeat:
    load-enabled: false
    interval: 250ms
"#,
        temp_dir.path().join("home").display()
    );

    fs::write(&config_path, yaml_content).expect("Failed to write config file");

    let config = AppConfig::load_layered(&config_path).expect("Failed to load config");

    assert!(Path::new(&config.home_dir).is_absolute());
    assert!(Path::new(&config.home_dir).exists());
    assert_eq!(
        config.manager.construction_timeout,
        Some(Duration::from_secs(30))
    );
    assert_eq!(config.manager.teardown_grace, Duration::from_secs(2));
    assert!(config.logging.is_none(), "logging stays None unless provided");

    let heartbeat = config.components.get("heartbeat").unwrap();
    assert_eq!(heartbeat["load-enabled"], serde_json::json!(false));
    assert_eq!(heartbeat["interval"], serde_json::json!("250ms"));
    assert!(config.components.contains_key("statistics-storage"));
}

#[test]
fn test_unknown_top_level_key_is_rejected() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("bad.yaml");
    fs::write(&config_path, "servers:\n  port: 1\n").unwrap();

    let err = AppConfig::load_layered(&config_path).unwrap_err();
    assert!(format!("{err:#}").contains("figment"));
}

#[test]
fn test_component_files_override_inline_blocks() {
    let temp_dir = tempdir().unwrap();
    let comps = temp_dir.path().join("components.d");
    fs::create_dir_all(&comps).unwrap();
    fs::write(comps.join("heartbeat.yaml"), "interval: 5s\n").unwrap();
    fs::write(comps.join("notes.txt"), "ignored").unwrap();

    let config_path = temp_dir.path().join("cfg.yaml");
    fs::write(
        &config_path,
        format!(
            "home_dir: \"{}\"\ncomponents_dir: components.d\ncomponents:\n  heartbeat:\n    interval: 1s\n",
            temp_dir.path().display()
        ),
    )
    .unwrap();

    let config = AppConfig::load_layered(&config_path).unwrap();
    assert_eq!(
        config.components["heartbeat"]["interval"],
        serde_json::json!("5s")
    );
    assert!(!config.components.contains_key("notes"));
}

#[test]
fn test_cli_overrides() {
    let mut config = AppConfig::default();
    let args = CliArgs {
        construction_timeout: Some(Duration::from_millis(1500)),
        verbose: 2,
        ..CliArgs::default()
    };

    config.apply_cli_overrides(&args);

    assert_eq!(
        config.manager.construction_timeout,
        Some(Duration::from_millis(1500))
    );
    let default = &config.logging.as_ref().unwrap()["default"];
    assert_eq!(default.console_level, "trace");
}

#[test]
fn test_load_or_default_without_path() {
    let config = AppConfig::load_or_default::<&Path>(None).unwrap();
    assert!(Path::new(&config.home_dir).is_absolute());
    assert!(config.logging.is_some());
}
