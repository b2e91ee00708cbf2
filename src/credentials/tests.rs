//! Tests for file-backed credential lookup.

use std::fs;

use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::config::ReplicationSettings;

struct SiteFixture {
    _tmp: TempDir,
    site: Utf8PathBuf,
}

impl SiteFixture {
    fn secure_path(&self) -> Utf8PathBuf {
        self.site.join(SECURE_CONFIG_FILE)
    }

    fn write_secure(&self, contents: &str) {
        let path = self.secure_path();
        let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
        fs::create_dir_all(parent).unwrap_or_else(|err| panic!("create etc dir: {err}"));
        fs::write(&path, contents).unwrap_or_else(|err| panic!("write secure.toml: {err}"));
    }

    fn config(&self) -> ReplicationConfig {
        ReplicationConfig::from_settings(ReplicationSettings {
            site_path: self.site.to_string(),
            ..ReplicationSettings::default()
        })
    }
}

#[fixture]
fn site() -> SiteFixture {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let site = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|err| panic!("temp path should be utf8: {}", err.display()));
    SiteFixture { _tmp: tmp, site }
}

#[rstest]
fn missing_file_yields_empty_credentials(site: SiteFixture) {
    let factory = FileCredentialsFactory::for_site(&site.config())
        .unwrap_or_else(|err| panic!("load credentials: {err}"));

    assert_eq!(factory.create("mirror"), Credentials::default());
    assert!(factory.validate("mirror"));
}

#[rstest]
#[case("")]
#[case("\n   \n")]
fn empty_file_yields_empty_credentials(site: SiteFixture, #[case] contents: &str) {
    site.write_secure(contents);
    let factory = FileCredentialsFactory::load(&site.secure_path())
        .unwrap_or_else(|err| panic!("load credentials: {err}"));

    assert_eq!(factory.create("mirror"), Credentials::default());
}

#[rstest]
fn configured_remote_returns_username_and_password(site: SiteFixture) {
    site.write_secure(
        "[remote.mirror]\nusername = \"replicator\"\npassword = \"s3cret\"\n\n\
         [remote.backup]\nusername = \"backup-only\"\n",
    );
    let factory = FileCredentialsFactory::for_site(&site.config())
        .unwrap_or_else(|err| panic!("load credentials: {err}"));

    assert_eq!(
        factory.create("mirror"),
        Credentials {
            username: String::from("replicator"),
            password: String::from("s3cret"),
        }
    );
    assert_eq!(
        factory.create("backup"),
        Credentials {
            username: String::from("backup-only"),
            password: String::new(),
        }
    );
    assert_eq!(factory.create("unknown"), Credentials::default());
}

#[rstest]
fn malformed_file_is_rejected(site: SiteFixture) {
    site.write_secure("[remote.mirror\nusername = ");

    let Err(err) = FileCredentialsFactory::load(&site.secure_path()) else {
        panic!("malformed credentials should fail to load");
    };
    let CredentialsError::Parse { path, .. } = err else {
        panic!("expected parse error");
    };
    assert_eq!(path, site.secure_path());
}

#[rstest]
fn non_table_remote_section_is_rejected(site: SiteFixture) {
    site.write_secure("remote = \"mirror\"\n");

    let Err(err) = FileCredentialsFactory::load(&site.secure_path()) else {
        panic!("invalid structure should fail to load");
    };
    assert!(matches!(err, CredentialsError::InvalidStructure { .. }));
}

#[rstest]
fn validate_flags_non_string_values(site: SiteFixture) {
    site.write_secure("[remote.mirror]\nusername = \"replicator\"\npassword = 42\n");
    let factory = FileCredentialsFactory::load(&site.secure_path())
        .unwrap_or_else(|err| panic!("load credentials: {err}"));

    assert!(!factory.validate("mirror"));
    assert_eq!(factory.create("mirror").password, "");
    assert!(factory.validate("other"));
}

#[rstest]
fn debug_output_hides_passwords() {
    let credentials = Credentials {
        username: String::from("replicator"),
        password: String::from("s3cret"),
    };
    let rendered = format!("{credentials:?}");
    assert!(rendered.contains("replicator"));
    assert!(!rendered.contains("s3cret"));
}
