//! Tests for polboot configuration loading and defaults.

use std::path::PathBuf;

use polboot::boot::ConfigMode;
use polboot::config::{load_config, Config};

#[test]
fn parse_complete_config() {
    let toml_content = r#"
[enforce]
mode = "enforcing"

[policy]
store = "/etc/selinux/targeted/policy/policy"
local_definitions = true
users_dir = "/etc/selinux/targeted/users"
booleans = "/etc/selinux/targeted/booleans"

[kernel]
mount_point = "/selinux"
cmdline = "/proc/cmdline"
osrelease = "/proc/sys/kernel/osrelease"
"#;

    let dir = tempfile::tempdir().expect("tempdir");
    let config_path = dir.path().join("polboot.toml");
    std::fs::write(&config_path, toml_content).expect("write");

    let config = load_config(&config_path).expect("parse config");

    assert_eq!(config.enforce.mode, Some(ConfigMode::Enforcing));
    assert_eq!(
        config.policy.store,
        PathBuf::from("/etc/selinux/targeted/policy/policy")
    );
    assert!(config.policy.local_definitions);
    assert_eq!(
        config.policy.users_dir,
        PathBuf::from("/etc/selinux/targeted/users")
    );
    assert_eq!(
        config.policy.booleans,
        PathBuf::from("/etc/selinux/targeted/booleans")
    );
    assert_eq!(config.kernel.mount_point, PathBuf::from("/selinux"));
    assert_eq!(config.kernel.cmdline, PathBuf::from("/proc/cmdline"));
}

#[test]
fn parse_minimal_config_uses_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config_path = dir.path().join("polboot.toml");
    std::fs::write(&config_path, "").expect("write");

    let config = load_config(&config_path).expect("parse empty config");

    assert!(config.enforce.mode.is_none());
    assert_eq!(
        config.policy.store,
        PathBuf::from("/etc/selinux/policy/policy")
    );
    assert!(!config.policy.local_definitions);
    assert_eq!(
        config.kernel.mount_point,
        PathBuf::from("/sys/fs/selinux")
    );
    assert_eq!(config.kernel.cmdline, PathBuf::from("/proc/cmdline"));
    assert_eq!(
        config.kernel.osrelease,
        PathBuf::from("/proc/sys/kernel/osrelease")
    );
}

#[test]
fn parse_with_missing_sections_uses_defaults() {
    let config: Config = toml::from_str(
        r#"
        [enforce]
        mode = "permissive"
        "#,
    )
    .expect("parse partial config");

    assert_eq!(config.enforce.mode, Some(ConfigMode::Permissive));
    assert_eq!(
        config.policy.store,
        PathBuf::from("/etc/selinux/policy/policy")
    );
    assert_eq!(
        config.kernel.mount_point,
        PathBuf::from("/sys/fs/selinux")
    );
}

#[test]
fn parse_disabled_mode() {
    let config: Config = toml::from_str(
        r#"
        [enforce]
        mode = "disabled"
        "#,
    )
    .expect("parse config");
    assert_eq!(config.enforce.mode, Some(ConfigMode::Disabled));
}

#[test]
fn reject_unknown_mode() {
    let result: Result<Config, _> = toml::from_str(
        r#"
        [enforce]
        mode = "paranoid"
        "#,
    );
    assert!(result.is_err());
}

#[test]
fn parse_example_config_file() {
    let example = include_str!("../polboot.toml.example");
    let config: Config = toml::from_str(example).expect("parse example config");
    assert_eq!(config.enforce.mode, Some(ConfigMode::Enforcing));
    assert_eq!(
        config.policy.store,
        PathBuf::from("/etc/selinux/policy/policy")
    );
    assert!(!config.policy.local_definitions);
    config.validate().expect("example config validates");
}

#[test]
fn validate_rejects_relative_store() {
    let config: Config = toml::from_str(
        r#"
        [policy]
        store = "policy/policy"
        "#,
    )
    .expect("parse config");
    let result = config.validate();
    assert!(result.is_err());
    assert!(result
        .expect_err("should fail")
        .to_string()
        .contains("policy.store"));
}

#[test]
fn validate_rejects_relative_mount_point() {
    let config: Config = toml::from_str(
        r#"
        [kernel]
        mount_point = "selinux"
        "#,
    )
    .expect("parse config");
    assert!(config.validate().is_err());
}

#[test]
fn load_rejects_missing_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let result = load_config(&dir.path().join("absent.toml"));
    assert!(result.is_err());
}
