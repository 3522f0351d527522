use super::provider::OAuthProvider;
use crate::error::OAuthError;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Which providers have credential files in the engine's auth directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AuthStatus {
    pub claude: bool,
    pub openai: bool,
    pub gemini: bool,
    pub qwen: bool,
    pub iflow: bool,
    pub vertex: bool,
    pub antigravity: bool,
}

impl AuthStatus {
    /// `(provider, linked)` for every provider, in a fixed order.
    pub fn providers(&self) -> [(&'static str, bool); 7] {
        [
            ("claude", self.claude),
            ("openai", self.openai),
            ("gemini", self.gemini),
            ("qwen", self.qwen),
            ("iflow", self.iflow),
            ("vertex", self.vertex),
            ("antigravity", self.antigravity),
        ]
    }

    fn mark(&mut self, file_name: &str) {
        let flag = match credential_owner(file_name) {
            Some("claude") => &mut self.claude,
            Some("openai") => &mut self.openai,
            Some("gemini") => &mut self.gemini,
            Some("qwen") => &mut self.qwen,
            Some("iflow") => &mut self.iflow,
            Some("vertex") => &mut self.vertex,
            Some("antigravity") => &mut self.antigravity,
            _ => return,
        };
        *flag = true;
    }
}

/// Provider a credential file in the auth directory belongs to.
fn credential_owner(file_name: &str) -> Option<&'static str> {
    let name = file_name.to_ascii_lowercase();
    if !name.ends_with(".json") {
        return None;
    }
    const PREFIXES: &[(&str, &str)] = &[
        ("claude-", "claude"),
        ("anthropic-", "claude"),
        ("codex-", "openai"),
        ("gemini-", "gemini"),
        ("qwen-", "qwen"),
        ("iflow-", "iflow"),
        ("vertex-", "vertex"),
        ("antigravity-", "antigravity"),
    ];
    PREFIXES
        .iter()
        .find(|(prefix, _)| name.starts_with(prefix))
        .map(|(_, provider)| *provider)
}

/// Scan `auth_dir` for credential files. A missing directory means nothing
/// is linked yet.
pub fn scan_auth_dir(auth_dir: &Path) -> AuthStatus {
    let mut status = AuthStatus::default();
    let Ok(entries) = std::fs::read_dir(auth_dir) else {
        return status;
    };
    for entry in entries.flatten() {
        status.mark(&entry.file_name().to_string_lossy());
    }
    status
}

/// Validate a Google service account file and copy it into `auth_dir` as
/// `vertex-{project_id}.json`. Returns the written path.
pub fn import_vertex_credential(source: &Path, auth_dir: &Path) -> Result<PathBuf, OAuthError> {
    let content = std::fs::read_to_string(source)?;
    let json: serde_json::Value = serde_json::from_str(&content)
        .map_err(|e| OAuthError::InvalidCredential(format!("invalid JSON: {e}")))?;

    if json["type"].as_str() != Some("service_account") {
        return Err(OAuthError::InvalidCredential(
            "'type' must be 'service_account'".into(),
        ));
    }
    let project_id = json["project_id"]
        .as_str()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| OAuthError::InvalidCredential("missing 'project_id'".into()))?;
    if project_id.contains(['/', '\\']) || project_id.contains("..") {
        return Err(OAuthError::InvalidCredential(format!(
            "project_id '{project_id}' is not a valid file name"
        )));
    }

    std::fs::create_dir_all(auth_dir)?;
    let dest = auth_dir.join(format!("vertex-{project_id}.json"));
    std::fs::write(&dest, &content)?;
    tracing::info!(project_id, path = %dest.display(), "vertex credential imported");
    Ok(dest)
}

/// Unlink `provider` by deleting its credential files from `auth_dir`.
/// Returns the status after the removal.
pub fn disconnect_provider(auth_dir: &Path, provider: &str) -> Result<AuthStatus, OAuthError> {
    let name = match OAuthProvider::parse(provider) {
        Ok(parsed) => parsed.to_string(),
        Err(OAuthError::CredentialImportOnly(name)) => name,
        Err(e) => return Err(e),
    };

    let entries = match std::fs::read_dir(auth_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(AuthStatus::default()),
        Err(e) => return Err(e.into()),
    };
    let mut removed = 0usize;
    for entry in entries.flatten() {
        let file_name = entry.file_name();
        if credential_owner(&file_name.to_string_lossy()) == Some(name.as_str()) {
            std::fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    tracing::info!(provider = %name, removed, "provider disconnected");
    Ok(scan_auth_dir(auth_dir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_recognizes_engine_file_names() {
        let tmp = tempfile::tempdir().unwrap();
        for name in [
            "claude-me@example.com.json",
            "codex-me@example.com.json",
            "Gemini-me-project.json",
            "vertex-proj.json",
            "qwen-notes.txt",
            "unrelated.json",
        ] {
            std::fs::write(tmp.path().join(name), "{}").unwrap();
        }

        let status = scan_auth_dir(tmp.path());
        assert_eq!(
            status,
            AuthStatus {
                claude: true,
                openai: true,
                gemini: true,
                vertex: true,
                ..AuthStatus::default()
            }
        );
    }

    #[test]
    fn scan_of_missing_dir_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(scan_auth_dir(&tmp.path().join("nope")), AuthStatus::default());
    }

    #[test]
    fn vertex_import_writes_project_file() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("sa.json");
        let body = r#"{"type":"service_account","project_id":"my-proj","private_key":"k"}"#;
        std::fs::write(&source, body).unwrap();
        let auth_dir = tmp.path().join("auth");

        let dest = import_vertex_credential(&source, &auth_dir).unwrap();

        assert_eq!(dest, auth_dir.join("vertex-my-proj.json"));
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), body);
        assert!(scan_auth_dir(&auth_dir).vertex);
    }

    #[test]
    fn vertex_import_rejects_bad_files() {
        let tmp = tempfile::tempdir().unwrap();
        let auth_dir = tmp.path().join("auth");
        let cases = [
            ("not json", "invalid JSON"),
            (r#"{"type":"authorized_user","project_id":"p"}"#, "service_account"),
            (r#"{"type":"service_account"}"#, "project_id"),
            (r#"{"type":"service_account","project_id":"../etc"}"#, "not a valid file name"),
        ];
        for (body, needle) in cases {
            let source = tmp.path().join("sa.json");
            std::fs::write(&source, body).unwrap();
            let err = import_vertex_credential(&source, &auth_dir).unwrap_err();
            assert!(
                matches!(&err, OAuthError::InvalidCredential(msg) if msg.contains(needle)),
                "{body}: {err}"
            );
        }
        assert!(!auth_dir.exists());

        let missing = import_vertex_credential(&tmp.path().join("absent.json"), &auth_dir);
        assert!(matches!(missing, Err(OAuthError::Io(_))));
    }

    #[test]
    fn disconnect_removes_only_that_providers_files() {
        let tmp = tempfile::tempdir().unwrap();
        for name in [
            "claude-me@example.com.json",
            "anthropic-work.json",
            "codex-me@example.com.json",
            "vertex-proj.json",
            "notes.txt",
        ] {
            std::fs::write(tmp.path().join(name), "{}").unwrap();
        }

        let status = disconnect_provider(tmp.path(), "anthropic").unwrap();
        assert!(!status.claude);
        assert!(status.openai);
        assert!(status.vertex);
        assert!(!tmp.path().join("anthropic-work.json").exists());
        assert!(tmp.path().join("notes.txt").exists());

        let status = disconnect_provider(tmp.path(), "vertex").unwrap();
        assert!(!status.vertex);
        assert!(status.openai);
    }

    #[test]
    fn disconnect_rejects_unknown_provider() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            disconnect_provider(tmp.path(), "myspace"),
            Err(OAuthError::UnsupportedProvider(_))
        ));
        assert_eq!(
            disconnect_provider(&tmp.path().join("missing"), "qwen").unwrap(),
            AuthStatus::default()
        );
    }
}
