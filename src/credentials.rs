/*!
 * Out-of-band credential storage, grounded in `dropbox_auth.py`'s flat
 * `.env`-style persistence of `app_key`/`app_secret`/`refresh_token`.
 *
 * OAuth acquisition (browser flow, authorization-code exchange) is the
 * external collaborator spec §6 scopes out; this module only defines the
 * storage contract and a flat key-value file implementation.
 */

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{MeridianError, Result};

/// One backend's credential bundle. Fields are provider-specific; absent
/// keys are simply not present in the map.
pub type CredentialSet = BTreeMap<String, String>;

pub trait CredentialStore: Send + Sync {
    fn load(&self, provider: &str) -> Result<CredentialSet>;
    fn save(&self, provider: &str, credentials: &CredentialSet) -> Result<()>;
}

/// Persists each provider's credentials as `KEY=value` lines in its own
/// file under a directory, mirroring the `.env` convention the Python
/// original uses for `DROPBOX_APP_KEY` / `DROPBOX_REFRESH_TOKEN` etc.
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, provider: &str) -> PathBuf {
        self.dir.join(format!("{provider}.env"))
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self, provider: &str) -> Result<CredentialSet> {
        let path = self.path_for(provider);
        if !path.exists() {
            return Ok(CredentialSet::new());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| MeridianError::Config(format!("failed to read credentials for {provider}: {e}")))?;

        Ok(parse_env_lines(&content))
    }

    fn save(&self, provider: &str, credentials: &CredentialSet) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| MeridianError::Config(format!("failed to create credentials directory: {e}")))?;

        let content = render_env_lines(credentials);
        let path = self.path_for(provider);
        std::fs::write(&path, content)
            .map_err(|e| MeridianError::Config(format!("failed to write credentials for {provider}: {e}")))?;

        set_owner_only_permissions(&path);
        Ok(())
    }
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = std::fs::metadata(path) {
        let mut permissions = metadata.permissions();
        permissions.set_mode(0o600);
        let _ = std::fs::set_permissions(path, permissions);
    }
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &Path) {}

fn parse_env_lines(content: &str) -> CredentialSet {
    let mut set = CredentialSet::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            set.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    set
}

fn render_env_lines(credentials: &CredentialSet) -> String {
    let mut out = String::new();
    for (key, value) in credentials {
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_empty_set() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());
        let creds = store.load("dropbox").unwrap();
        assert!(creds.is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());

        let mut creds = CredentialSet::new();
        creds.insert("app_key".to_string(), "abc123".to_string());
        creds.insert("refresh_token".to_string(), "rtok".to_string());
        store.save("dropbox", &creds).unwrap();

        let loaded = store.load("dropbox").unwrap();
        assert_eq!(loaded.get("app_key").unwrap(), "abc123");
        assert_eq!(loaded.get("refresh_token").unwrap(), "rtok");
    }

    #[test]
    fn blank_lines_and_comments_are_ignored() {
        let parsed = parse_env_lines("# comment\n\nAPP_KEY=value\n  \nREFRESH_TOKEN=tok\n");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed.get("APP_KEY").unwrap(), "value");
    }

    #[test]
    fn providers_are_stored_independently() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());

        let mut dropbox_creds = CredentialSet::new();
        dropbox_creds.insert("app_key".to_string(), "dbx".to_string());
        store.save("dropbox", &dropbox_creds).unwrap();

        let mut s3_creds = CredentialSet::new();
        s3_creds.insert("access_key".to_string(), "aws".to_string());
        store.save("s3", &s3_creds).unwrap();

        assert_eq!(store.load("dropbox").unwrap().get("app_key").unwrap(), "dbx");
        assert_eq!(store.load("s3").unwrap().get("access_key").unwrap(), "aws");
        assert!(store.load("gdrive").unwrap().is_empty());
    }
}
