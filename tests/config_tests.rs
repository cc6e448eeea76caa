//! Unit tests for configuration validation and engine construction.

use camino::Utf8PathBuf;
use rstest::*;
use tempfile::TempDir;

use scalevol::{ConfigError, ConnectorKind, EngineError, ProvisioningEngine, ScaleConfig};

#[fixture]
fn valid_config() -> ScaleConfig {
    ScaleConfig {
        node_name: Some(String::from("node1")),
        ..ScaleConfig::local("gpfs0", "/var/lib/scalevol")
    }
}

/// Verifies that validation produces actionable errors mentioning both the
/// environment variable and configuration file for each required field.
#[test]
fn config_validation_produces_actionable_errors_for_all_fields() {
    fn assert_actionable(
        mut cfg: ScaleConfig,
        mutate: impl FnOnce(&mut ScaleConfig),
        env_var: &str,
        toml_key: &str,
    ) {
        mutate(&mut cfg);
        let error = cfg.validate().expect_err("validation should fail");
        let message = error.to_string();
        assert!(
            message.contains(env_var),
            "error should mention env var {env_var}: {message}"
        );
        assert!(
            message.contains("scalevol.toml"),
            "error should mention config file: {message}"
        );
        assert!(
            message.contains(toml_key),
            "error should mention TOML key {toml_key}: {message}"
        );
    }

    assert_actionable(
        valid_config(),
        |cfg| cfg.default_filesystem.clear(),
        "SCALEVOL_DEFAULT_FILESYSTEM",
        "default_filesystem",
    );
    assert_actionable(
        valid_config(),
        |cfg| cfg.backend.clear(),
        "SCALEVOL_BACKEND",
        "backend",
    );
    assert_actionable(
        valid_config(),
        |cfg| cfg.config_path.clear(),
        "SCALEVOL_CONFIG_PATH",
        "config_path",
    );
    assert_actionable(
        valid_config(),
        |cfg| {
            cfg.rest_endpoint = Some(String::from("https://gui.example:443"));
            cfg.rest_password = Some(String::from("secret"));
        },
        "SCALEVOL_REST_USER",
        "rest_user",
    );
}

#[rstest]
fn zero_timeout_is_rejected(valid_config: ScaleConfig) {
    let cfg = ScaleConfig {
        job_wait_timeout_secs: 0,
        ..valid_config
    };
    let err = cfg.validate().expect_err("zero timeout");
    assert!(matches!(err, ConfigError::Invalid(_)), "unexpected error: {err}");
}

#[rstest]
#[case(None, None, None, ConnectorKind::LocalCli)]
#[case(Some("https://gui:443"), Some("root"), Some("http://mgmt:9999"), ConnectorKind::RestV2)]
#[case(None, Some("root"), Some("http://mgmt:9999"), ConnectorKind::RemoteShell)]
#[case(None, None, Some("http://mgmt:9999"), ConnectorKind::RestV1)]
fn transport_precedence(
    valid_config: ScaleConfig,
    #[case] rest: Option<&str>,
    #[case] ssh_user: Option<&str>,
    #[case] rest_v1: Option<&str>,
    #[case] expected: ConnectorKind,
) {
    let cfg = ScaleConfig {
        rest_endpoint: rest.map(str::to_owned),
        rest_user: Some(String::from("admin")),
        rest_password: Some(String::from("secret")),
        ssh_user: ssh_user.map(str::to_owned),
        ssh_host: ssh_user.map(|_| String::from("gpfs-node")),
        rest_v1_endpoint: rest_v1.map(str::to_owned),
        ..valid_config
    };
    assert_eq!(ConnectorKind::select(&cfg), expected);
}

#[rstest]
fn engine_from_config_prepares_the_config_directory(valid_config: ScaleConfig) {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().join("state"))
        .unwrap_or_else(|path| panic!("temp dir should be utf8: {}", path.display()));
    let cfg = ScaleConfig {
        config_path: root.to_string(),
        ..valid_config
    };

    let engine = ProvisioningEngine::from_config(&cfg)
        .unwrap_or_else(|err| panic!("engine should build: {err}"));

    assert!(!engine.is_activated());
    assert!(root.join("volumes.db").exists());
}

#[rstest]
fn engine_from_config_rejects_invalid_configuration(valid_config: ScaleConfig) {
    let cfg = ScaleConfig {
        default_filesystem: String::new(),
        ..valid_config
    };

    let Err(err) = ProvisioningEngine::from_config(&cfg) else {
        panic!("expected configuration error");
    };
    assert!(
        matches!(err, EngineError::Config(ConfigError::MissingField(_))),
        "unexpected error: {err}"
    );
}
