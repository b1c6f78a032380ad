//! Tests for configuration loading from files and the process environment

use serial_test::serial;
use std::io::Write;
use tagtrail_common::config::{
    load_toml_config, Overrides, Settings, ENV_DAILY_AGGREGATION, ENV_POWER_USER_THRESHOLD,
};
use tagtrail_common::Error;

#[test]
fn test_load_explicit_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
root_folder = "/var/lib/tagtrail"
daily_aggregation_enabled = true
power_user_threshold = 75

[claim]
last_tag_events = 10
"#
    )
    .unwrap();

    let toml = load_toml_config(Some(file.path())).unwrap();
    assert_eq!(toml.power_user_threshold, Some(75));
    assert_eq!(toml.daily_aggregation_enabled, Some(true));
    assert_eq!(toml.claim.last_tag_events, 10);
    assert_eq!(toml.claim.ip_ua_events, 100);
}

#[test]
fn test_missing_explicit_config_file_is_error() {
    let dir = tempfile::TempDir::new().unwrap();
    let result = load_toml_config(Some(&dir.path().join("absent.toml")));
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
#[serial]
fn test_environment_overrides_toml() {
    std::env::set_var(ENV_POWER_USER_THRESHOLD, "12");
    std::env::set_var(ENV_DAILY_AGGREGATION, "true");

    let toml = tagtrail_common::config::parse_toml_config(
        "power_user_threshold = 99\ndaily_aggregation_enabled = false",
    )
    .unwrap();
    let settings = Settings::resolve(&Overrides::default(), toml);

    std::env::remove_var(ENV_POWER_USER_THRESHOLD);
    std::env::remove_var(ENV_DAILY_AGGREGATION);

    assert_eq!(settings.power_user_threshold, 12);
    assert!(settings.daily_aggregation_enabled);
}

#[test]
#[serial]
fn test_cli_overrides_environment() {
    std::env::set_var(ENV_POWER_USER_THRESHOLD, "12");

    let overrides = Overrides {
        power_user_threshold: Some(3),
        daily_aggregation_enabled: Some(false),
        ..Default::default()
    };
    let settings = Settings::resolve(&overrides, Default::default());

    std::env::remove_var(ENV_POWER_USER_THRESHOLD);

    assert_eq!(settings.power_user_threshold, 3);
    assert!(!settings.daily_aggregation_enabled);
}
