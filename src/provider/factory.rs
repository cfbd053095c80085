//! Builds a [`Provider`] for a configured [`ProviderMode`], pulling
//! credentials from a [`CredentialStore`]. Simpler than the teacher's
//! `BackendRegistry`: this crate's backend set is fixed, so a plain match
//! is enough — no plugin registration is needed.

use std::sync::Arc;

use crate::config::{Config, ProviderMode};
use crate::credentials::CredentialStore;
use crate::error::{MeridianError, Result};
use crate::provider::local::LocalProvider;
use crate::provider::Provider;

fn credential_key(set: &std::collections::BTreeMap<String, String>, key: &str, provider: &str) -> Result<String> {
    set.get(key)
        .cloned()
        .ok_or_else(|| MeridianError::Authentication(format!("missing '{key}' credential for {provider}")))
}

/// Builds the provider for `mode`, consulting `config.local_path` for the
/// local backend and `credentials` for every remote one.
pub async fn build_provider(
    mode: ProviderMode,
    config: &Config,
    credentials: &dyn CredentialStore,
) -> Result<Arc<dyn Provider>> {
    match mode {
        ProviderMode::Local => {
            let root = config
                .local_path
                .clone()
                .ok_or_else(|| MeridianError::Config("local_path is not set".to_string()))?;
            Ok(Arc::new(LocalProvider::new(root)))
        }

        #[cfg(feature = "dropbox")]
        ProviderMode::Dropbox => {
            let creds = credentials.load("dropbox")?;
            let token = credential_key(&creds, "access_token", "dropbox")?;
            Ok(Arc::new(crate::provider::dropbox::DropboxProvider::new(token)))
        }
        #[cfg(not(feature = "dropbox"))]
        ProviderMode::Dropbox => Err(MeridianError::Unsupported {
            provider: "dropbox".to_string(),
            operation: "build_provider".to_string(),
        }),

        #[cfg(feature = "gdrive")]
        ProviderMode::Google => {
            let creds = credentials.load("gdrive")?;
            let token = credential_key(&creds, "access_token", "gdrive")?;
            Ok(Arc::new(crate::provider::gdrive::GoogleDriveProvider::new(token)))
        }
        #[cfg(not(feature = "gdrive"))]
        ProviderMode::Google => Err(MeridianError::Unsupported {
            provider: "gdrive".to_string(),
            operation: "build_provider".to_string(),
        }),

        #[cfg(feature = "s3")]
        ProviderMode::S3 => {
            let creds = credentials.load("s3")?;
            let bucket = credential_key(&creds, "bucket", "s3")?;
            Ok(Arc::new(crate::provider::s3::S3Provider::new(bucket).await))
        }
        #[cfg(not(feature = "s3"))]
        ProviderMode::S3 => Err(MeridianError::Unsupported {
            provider: "s3".to_string(),
            operation: "build_provider".to_string(),
        }),

        #[cfg(feature = "sftp")]
        ProviderMode::Sftp => {
            let creds = credentials.load("sftp")?;
            let host = credential_key(&creds, "host", "sftp")?;
            let port: u16 = creds.get("port").and_then(|p| p.parse().ok()).unwrap_or(22);
            let username = credential_key(&creds, "username", "sftp")?;
            let password = creds.get("password").cloned();
            let key_path = creds.get("key_path").map(std::path::PathBuf::from);

            tokio::task::spawn_blocking(move || {
                crate::provider::sftp::SftpProvider::connect(
                    &host,
                    port,
                    &username,
                    password.as_deref(),
                    key_path.as_deref(),
                )
            })
            .await
            .map_err(|e| MeridianError::Other(format!("sftp connect task panicked: {e}")))?
            .map(|provider| Arc::new(provider) as Arc<dyn Provider>)
            .map_err(Into::into)
        }
        #[cfg(not(feature = "sftp"))]
        ProviderMode::Sftp => Err(MeridianError::Unsupported {
            provider: "sftp".to_string(),
            operation: "build_provider".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{CredentialSet, FileCredentialStore};

    #[tokio::test]
    async fn local_mode_requires_local_path() {
        let mut config = Config::default();
        config.mode = ProviderMode::Local;
        config.local_path = None;
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());

        let result = build_provider(ProviderMode::Local, &config, &store).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn local_mode_builds_from_configured_path() {
        let mut config = Config::default();
        let root = tempfile::tempdir().unwrap();
        config.mode = ProviderMode::Local;
        config.local_path = Some(root.path().to_path_buf());
        let creds_dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(creds_dir.path());

        let provider = build_provider(ProviderMode::Local, &config, &store).await.unwrap();
        assert_eq!(provider.provider_name(), "local");
    }

    #[cfg(feature = "dropbox")]
    #[tokio::test]
    async fn dropbox_mode_without_credentials_fails() {
        let config = Config::default();
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());

        let result = build_provider(ProviderMode::Dropbox, &config, &store).await;
        assert!(result.is_err());
    }

    #[cfg(feature = "dropbox")]
    #[tokio::test]
    async fn dropbox_mode_builds_with_stored_token() {
        let config = Config::default();
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());
        let mut creds = CredentialSet::new();
        creds.insert("access_token".to_string(), "tok".to_string());
        store.save("dropbox", &creds).unwrap();

        let provider = build_provider(ProviderMode::Dropbox, &config, &store).await.unwrap();
        assert_eq!(provider.provider_name(), "dropbox");
    }
}
