use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};

const API_KEY_FIELD: &str = "api_key";

/// Durable home of the model credential: a flat string, nothing more.
pub trait CredentialStore: Send {
    fn load(&self) -> anyhow::Result<Option<String>>;
    fn save(&mut self, credential: &str) -> anyhow::Result<()>;
    fn clear(&mut self) -> anyhow::Result<()>;
}

/// `credentials.json` holding `{"api_key": "..."}`. Other keys in the file
/// are preserved.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> anyhow::Result<Option<String>> {
        let payload = read_json_object(&self.path).unwrap_or_default();
        Ok(payload
            .get(API_KEY_FIELD)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string))
    }

    fn save(&mut self, credential: &str) -> anyhow::Result<()> {
        let mut payload = read_json_object(&self.path).unwrap_or_default();
        payload.insert(
            API_KEY_FIELD.to_string(),
            Value::String(credential.to_string()),
        );
        write_json_object(&self.path, &payload)
    }

    fn clear(&mut self) -> anyhow::Result<()> {
        let Some(mut payload) = read_json_object(&self.path) else {
            return Ok(());
        };
        if payload.remove(API_KEY_FIELD).is_none() {
            return Ok(());
        }
        write_json_object(&self.path, &payload)
    }
}

/// Process-local store. Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialStore {
    slot: Arc<Mutex<Option<String>>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: &str) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(credential.to_string()))),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> anyhow::Result<Option<String>> {
        let slot = self
            .slot
            .lock()
            .map_err(|_| anyhow::anyhow!("credential store lock poisoned"))?;
        Ok(slot.clone())
    }

    fn save(&mut self, credential: &str) -> anyhow::Result<()> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| anyhow::anyhow!("credential store lock poisoned"))?;
        *slot = Some(credential.to_string());
        Ok(())
    }

    fn clear(&mut self) -> anyhow::Result<()> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| anyhow::anyhow!("credential store lock poisoned"))?;
        *slot = None;
        Ok(())
    }
}

/// First four characters followed by an ellipsis.
pub fn mask_credential(credential: &str) -> String {
    let visible: String = credential.chars().take(4).collect();
    format!("{visible}…")
}

fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    parsed.as_object().cloned()
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(
        path,
        serde_json::to_string_pretty(&Value::Object(payload.clone()))?,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{mask_credential, CredentialStore, FileCredentialStore, MemoryCredentialStore};

    #[test]
    fn file_store_roundtrip_and_clear() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("state").join("credentials.json");
        let mut store = FileCredentialStore::new(&path);
        assert_eq!(store.load()?, None);

        store.save("AIza-test")?;
        assert_eq!(store.load()?, Some("AIza-test".to_string()));
        assert_eq!(
            FileCredentialStore::new(&path).load()?,
            Some("AIza-test".to_string())
        );

        store.clear()?;
        assert_eq!(store.load()?, None);
        Ok(())
    }

    #[test]
    fn file_store_preserves_unrelated_keys() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("credentials.json");
        std::fs::write(&path, r#"{"note": "keep me", "api_key": "old"}"#)?;

        let mut store = FileCredentialStore::new(&path);
        store.save("new")?;
        store.clear()?;

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(parsed, json!({"note": "keep me"}));
        Ok(())
    }

    #[test]
    fn file_store_treats_corrupt_file_as_empty() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("credentials.json");
        std::fs::write(&path, "not json")?;
        let mut store = FileCredentialStore::new(&path);
        assert_eq!(store.load()?, None);
        store.clear()?;
        assert!(!temp.path().join("missing.json").exists());
        FileCredentialStore::new(temp.path().join("missing.json")).clear()?;
        Ok(())
    }

    #[test]
    fn memory_store_clones_share_slot() -> anyhow::Result<()> {
        let mut store = MemoryCredentialStore::new();
        let observer = store.clone();
        store.save("k")?;
        assert_eq!(observer.load()?, Some("k".to_string()));
        store.clear()?;
        assert_eq!(observer.load()?, None);
        assert_eq!(
            MemoryCredentialStore::with_credential("x").load()?,
            Some("x".to_string())
        );
        Ok(())
    }

    #[test]
    fn mask_shows_prefix_only() {
        assert_eq!(mask_credential("AIzaSyExample"), "AIza…");
        assert_eq!(mask_credential("ab"), "ab…");
    }
}
