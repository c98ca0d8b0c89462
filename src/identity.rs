//! Tunnel identity file.
//!
//! Accepts both the tunnel client's own credentials JSON (`TunnelID`,
//! `AccountTag`, `TunnelSecret`) and a small descriptor that points at a
//! credentials file (`tunnel_id`, `credentials_file`).

use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum IdentityError {
    #[error("tunnel identity file {0} does not exist")]
    Missing(PathBuf),
    #[error("tunnel identity file {path} could not be read: {source}")]
    Unreadable { path: PathBuf, source: io::Error },
    #[error("tunnel identity file {path} is malformed: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("tunnel identity file {0} has no tunnel id")]
    MissingTunnelId(PathBuf),
    #[error("tunnel identity file {0} references no credentials")]
    MissingCredentials(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct TunnelIdentity {
    #[serde(alias = "TunnelID", default)]
    pub(crate) tunnel_id: String,
    #[serde(alias = "credentials-file", default)]
    pub(crate) credentials_file: Option<PathBuf>,
    #[serde(alias = "AccountTag", default)]
    pub(crate) account_tag: Option<String>,
    #[serde(alias = "TunnelSecret", default)]
    pub(crate) tunnel_secret: Option<String>,
    #[serde(default)]
    pub(crate) hostname: Option<String>,
}

impl TunnelIdentity {
    fn has_credentials(&self) -> bool {
        self.credentials_file.is_some()
            || self
                .tunnel_secret
                .as_deref()
                .is_some_and(|secret| !secret.is_empty())
    }
}

pub(crate) async fn load_identity(path: &Path) -> Result<TunnelIdentity, IdentityError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(IdentityError::Missing(path.to_path_buf()));
        }
        Err(source) => {
            return Err(IdentityError::Unreadable {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    parse_identity(path, &raw)
}

fn parse_identity(path: &Path, raw: &str) -> Result<TunnelIdentity, IdentityError> {
    let identity: TunnelIdentity =
        serde_json::from_str(raw).map_err(|source| IdentityError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;
    if identity.tunnel_id.trim().is_empty() {
        return Err(IdentityError::MissingTunnelId(path.to_path_buf()));
    }
    if !identity.has_credentials() {
        return Err(IdentityError::MissingCredentials(path.to_path_buf()));
    }
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_client_credentials_format() {
        let raw = r#"{"AccountTag":"acc","TunnelSecret":"c2VjcmV0","TunnelID":"6ff42ae2-765d-4adf-8112-31c55c1551ef"}"#;
        let identity = parse_identity(Path::new("creds.json"), raw).unwrap();
        assert_eq!(identity.tunnel_id, "6ff42ae2-765d-4adf-8112-31c55c1551ef");
        assert_eq!(identity.account_tag.as_deref(), Some("acc"));
    }

    #[test]
    fn parses_descriptor_format() {
        let raw = r#"{"tunnel_id":"abc","credentials-file":"/etc/cloudflared/abc.json","hostname":"shell.example.com"}"#;
        let identity = parse_identity(Path::new("tunnel.json"), raw).unwrap();
        assert_eq!(identity.tunnel_id, "abc");
        assert_eq!(identity.hostname.as_deref(), Some("shell.example.com"));
    }

    #[test]
    fn rejects_missing_fields() {
        let path = Path::new("tunnel.json");
        assert!(matches!(
            parse_identity(path, r#"{"credentials_file":"/x"}"#),
            Err(IdentityError::MissingTunnelId(_))
        ));
        assert!(matches!(
            parse_identity(path, r#"{"tunnel_id":"abc"}"#),
            Err(IdentityError::MissingCredentials(_))
        ));
        assert!(matches!(
            parse_identity(path, "tunnel: abc"),
            Err(IdentityError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_identity(&dir.path().join("absent.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::Missing(_)));
    }
}
