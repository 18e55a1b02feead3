use facesync_avatar::{FacesyncConfig, ProviderKind};
use facesync_core::ConfigError;
use std::io::Write;

fn write_config(suffix: &str, content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_toml_file() {
    let file = write_config(
        ".toml",
        r#"
        [analysis]
        window_ms = 50
        gain = 2.5

        [avatar]
        default_provider = "beyond_presence"

        [[avatar.counselors]]
        counselor_id = "maya"
        avatar_id = "avatar-maya"
        display_name = "Maya"
        "#,
    );

    let config = FacesyncConfig::load(file.path()).unwrap();
    assert_eq!(config.analysis.window_ms, 50);
    assert_eq!(config.analysis.gain, 2.5);
    assert_eq!(config.avatar.default_provider, ProviderKind::BeyondPresence);
    assert_eq!(config.avatar.profile_for("maya").display_name, "Maya");
    // Untouched sections keep their defaults
    assert_eq!(config.expression.slice_ms, 100);
    assert_eq!(config.session.inactivity_secs, 300);
}

#[test]
fn test_load_yaml_and_json_files() {
    let yaml = write_config(".yaml", "expression:\n  jitter_amplitude: 0.0\n  jitter_seed: 11\n");
    let config = FacesyncConfig::load(yaml.path()).unwrap();
    assert_eq!(config.expression.jitter_amplitude, 0.0);
    assert_eq!(config.expression.jitter_seed, Some(11));

    let json = write_config(".json", r#"{"session": {"max_sessions": 8, "eviction_sweep": true}}"#);
    let config = FacesyncConfig::load(json.path()).unwrap();
    assert_eq!(config.session.max_sessions, 8);
    assert!(config.session.eviction_sweep);
}

#[test]
fn test_unknown_extension_detects_format() {
    let file = write_config(".conf", "[expression]\nslice_ms = 40\n");
    let config = FacesyncConfig::load(file.path()).unwrap();
    assert_eq!(config.expression.slice_ms, 40);
}

#[test]
fn test_invalid_values_are_validation_errors() {
    let file = write_config(".toml", "[analysis]\nwindow_ms = 0\n");
    assert!(matches!(FacesyncConfig::load(file.path()), Err(ConfigError::Validation(_))));

    let file = write_config(
        ".toml",
        r#"
        [[avatar.counselors]]
        counselor_id = "maya"
        avatar_id = "a"
        display_name = "Maya"

        [[avatar.counselors]]
        counselor_id = "maya"
        avatar_id = "b"
        display_name = "Maya again"
        "#,
    );
    assert!(matches!(FacesyncConfig::load(file.path()), Err(ConfigError::Validation(_))));
}

#[test]
fn test_malformed_and_missing_files() {
    let file = write_config(".json", "{ not json");
    assert!(matches!(FacesyncConfig::load(file.path()), Err(ConfigError::Parse(_))));

    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.toml");
    assert!(matches!(FacesyncConfig::load(&missing), Err(ConfigError::Io(_))));
}

#[test]
fn test_environment_overrides_file_values() {
    // The only test in this binary that touches FACESYNC_POLL_* variables
    let file = write_config(".toml", "[poll]\ninterval_ms = 1000\nmax_attempts = 10\n");

    std::env::set_var("FACESYNC_POLL_INTERVAL_MS", "250");
    std::env::set_var("FACESYNC_POLL_MAX_ATTEMPTS", "not-a-number");
    let config = FacesyncConfig::load(file.path());
    std::env::remove_var("FACESYNC_POLL_INTERVAL_MS");
    std::env::remove_var("FACESYNC_POLL_MAX_ATTEMPTS");

    let config = config.unwrap();
    assert_eq!(config.poll.interval_ms, 250);
    // Malformed values are ignored
    assert_eq!(config.poll.max_attempts, 10);
}
