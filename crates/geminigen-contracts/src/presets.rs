use std::path::{Path, PathBuf};

use anyhow::bail;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptPreset {
    #[serde(rename = "Name", alias = "name")]
    pub name: String,
    #[serde(rename = "Text", alias = "text")]
    pub text: String,
}

/// Flat list of prompt presets backed by a JSON array on disk.
///
/// Names are advisory: the list may hold duplicates when the file was edited
/// by hand, and lookups by name take the first match.
#[derive(Debug, Clone)]
pub struct PresetStore {
    path: PathBuf,
    presets: Vec<PromptPreset>,
}

impl PresetStore {
    /// Loads presets from `path`. A missing or unreadable file yields an empty list.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let presets = read_presets(&path).unwrap_or_default();
        Self { path, presets }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn list(&self) -> &[PromptPreset] {
        &self.presets
    }

    pub fn names(&self) -> Vec<String> {
        self.presets.iter().map(|preset| preset.name.clone()).collect()
    }

    pub fn get(&self, index: usize) -> Option<&PromptPreset> {
        self.presets.get(index)
    }

    pub fn find(&self, name: &str) -> Option<&PromptPreset> {
        self.presets.iter().find(|preset| preset.name == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.presets.iter().position(|preset| preset.name == name)
    }

    /// Stores `text` under `name`, overwriting the first preset with that
    /// exact name or appending a new one, then persists the list.
    pub fn save_current(&mut self, name: &str, text: &str) -> anyhow::Result<()> {
        if name.trim().is_empty() {
            bail!("preset name must not be blank");
        }
        match self.presets.iter_mut().find(|preset| preset.name == name) {
            Some(existing) => existing.text = text.to_string(),
            None => self.presets.push(PromptPreset {
                name: name.to_string(),
                text: text.to_string(),
            }),
        }
        self.flush()
    }

    /// Removes the preset at `index` and persists the list.
    pub fn delete(&mut self, index: usize) -> anyhow::Result<Option<PromptPreset>> {
        if index >= self.presets.len() {
            return Ok(None);
        }
        let removed = self.presets.remove(index);
        self.flush()?;
        Ok(Some(removed))
    }

    pub fn flush(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&self.presets)?)?;
        Ok(())
    }
}

fn read_presets(path: &Path) -> Option<Vec<PromptPreset>> {
    let raw = std::fs::read_to_string(path).ok()?;
    if raw.trim().is_empty() {
        return None;
    }
    serde_json::from_str(&raw).ok()
}

#[cfg(test)]
mod tests {
    use super::{PresetStore, PromptPreset};

    #[test]
    fn save_current_appends_then_overwrites_same_name() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("presets.json");
        let mut store = PresetStore::load(&path);

        store.save_current("banana", "a nano banana dish")?;
        store.save_current("city", "a neon city at night")?;
        store.save_current("banana", "a banana split")?;

        assert_eq!(store.names(), vec!["banana", "city"]);
        assert_eq!(
            store.find("banana").map(|preset| preset.text.as_str()),
            Some("a banana split")
        );

        let reloaded = PresetStore::load(&path);
        assert_eq!(reloaded.list(), store.list());
        Ok(())
    }

    #[test]
    fn blank_names_are_rejected() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut store = PresetStore::load(temp.path().join("presets.json"));
        assert!(store.save_current("   ", "text").is_err());
        assert!(store.list().is_empty());
        Ok(())
    }

    #[test]
    fn duplicate_names_survive_a_load() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("presets.json");
        std::fs::write(
            &path,
            r#"[{"Name":"dup","Text":"one"},{"Name":"dup","Text":"two"}]"#,
        )?;

        let mut store = PresetStore::load(&path);
        assert_eq!(store.list().len(), 2);
        assert_eq!(store.find("dup").map(|p| p.text.as_str()), Some("one"));

        store.save_current("dup", "three")?;
        assert_eq!(store.get(0).map(|p| p.text.as_str()), Some("three"));
        assert_eq!(store.get(1).map(|p| p.text.as_str()), Some("two"));
        Ok(())
    }

    #[test]
    fn delete_removes_by_index_and_persists() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("presets.json");
        let mut store = PresetStore::load(&path);
        store.save_current("a", "1")?;
        store.save_current("b", "2")?;

        let removed = store.delete(0)?;
        assert_eq!(
            removed,
            Some(PromptPreset {
                name: "a".to_string(),
                text: "1".to_string(),
            })
        );
        assert_eq!(store.delete(5)?, None);
        assert_eq!(PresetStore::load(&path).names(), vec!["b"]);
        Ok(())
    }

    #[test]
    fn garbage_file_loads_as_empty() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("presets.json");
        std::fs::write(&path, "not json")?;
        assert!(PresetStore::load(&path).list().is_empty());
        Ok(())
    }
}
