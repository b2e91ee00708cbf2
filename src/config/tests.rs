//! Unit tests for configuration snapshots and templating.

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};

use super::*;

#[fixture]
fn settings() -> ReplicationSettings {
    ReplicationSettings {
        site_path: String::from("/srv/review"),
        ..ReplicationSettings::default()
    }
}

#[rstest]
fn defaults_match_documented_values() {
    let config = ReplicationConfig::default();
    assert!(!config.replicate_on_startup());
    assert!(!config.default_force_update());
    assert_eq!(config.distribution_interval(), Duration::ZERO);
    assert_eq!(config.max_refs_to_log(), 0);
    assert_eq!(config.max_refs_to_show(), 2);
    assert_eq!(config.ssh_command_timeout(), None);
    assert_eq!(config.ssh_connection_timeout(), Duration::from_secs(120));
    assert!(!config.use_legacy_credentials());
}

#[rstest]
fn command_timeout_is_expressed_in_seconds(settings: ReplicationSettings) {
    let config = ReplicationConfig::from_settings(ReplicationSettings {
        ssh_command_timeout: 30,
        ssh_connection_timeout: 1_500,
        ..settings
    });
    assert_eq!(config.ssh_command_timeout(), Some(Duration::from_secs(30)));
    assert_eq!(config.ssh_connection_timeout(), Duration::from_millis(1_500));
}

#[rstest]
#[case(None, "/srv/review/data/replication")]
#[case(Some(""), "/srv/review/data/replication")]
#[case(Some("events"), "/srv/review/events")]
#[case(Some("/var/lib/replication"), "/var/lib/replication")]
fn events_directory_resolves_against_site(
    settings: ReplicationSettings,
    #[case] configured: Option<&str>,
    #[case] expected: &str,
) {
    let config = ReplicationConfig::from_settings(ReplicationSettings {
        events_directory: configured.map(str::to_owned),
        ..settings
    });
    assert_eq!(config.events_directory(), Utf8PathBuf::from(expected));
}

#[rstest]
fn version_tracks_content(settings: ReplicationSettings) {
    let first = ReplicationConfig::from_settings(settings.clone());
    let same = ReplicationConfig::from_settings(settings.clone());
    let changed = ReplicationConfig::from_settings(ReplicationSettings {
        replicate_on_startup: true,
        ..settings
    });

    assert_eq!(first.version(), same.version());
    assert_ne!(first.version(), changed.version());
    assert_eq!(first.version().len(), 16);
}

#[rstest]
#[case("ssh_bin", ReplicationSettings { ssh_bin: String::from("  "), ..ReplicationSettings::default() })]
#[case("site_path", ReplicationSettings { site_path: String::new(), ..ReplicationSettings::default() })]
#[case(
    "ssh_identity_file",
    ReplicationSettings { ssh_identity_file: Some(String::from(" ")), ..ReplicationSettings::default() }
)]
fn validate_rejects_blank_fields(#[case] field: &str, #[case] invalid: ReplicationSettings) {
    let err = invalid.validate().expect_err("blank field should be rejected");
    assert_eq!(
        err,
        ConfigError::InvalidField {
            field: field.to_owned(),
        }
    );
}

#[rstest]
fn validate_accepts_defaults() {
    ReplicationSettings::default()
        .validate()
        .expect("defaults should validate");
}

#[rstest]
#[case("https://mirror/${name}.git", "app", false, Some("https://mirror/app.git"))]
#[case("${name}/${name}", "app", false, Some("app/${name}"))]
#[case("https://mirror/fixed.git", "app", true, Some("https://mirror/fixed.git"))]
#[case("https://mirror/fixed.git", "app", false, None)]
fn replace_name_substitutes_first_placeholder(
    #[case] template: &str,
    #[case] name: &str,
    #[case] optional: bool,
    #[case] expected: Option<&str>,
) {
    assert_eq!(
        replace_name(template, name, optional).as_deref(),
        expected
    );
}

#[rstest]
fn static_snapshot_provides_itself() {
    let config = Arc::new(ReplicationConfig::default());
    let provided = config.current();
    assert!(Arc::ptr_eq(&config, &provided));
}
