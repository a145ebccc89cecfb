use crate::filter::{Filter, FilterAction, Selector};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const FILTERS_FILE_NAME: &str = "filters.json";

#[derive(Debug, Error)]
pub enum FilterStoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// Filters every fresh install starts with: annotated frame-pipeline calls
/// render in their own color.
pub fn builtin_filters() -> Vec<Filter> {
    vec![Filter::new(Selector::annotation("frame"), FilterAction::inherit())]
}

/// Built-ins first, then stored entries whose selector is not a built-in's.
pub fn merge_with_builtins(stored: Vec<Filter>) -> Vec<Filter> {
    let mut merged = builtin_filters();
    let builtin_selectors: Vec<Selector> = merged.iter().map(|f| f.selector.clone()).collect();
    merged.extend(
        stored
            .into_iter()
            .filter(|filter| !builtin_selectors.contains(&filter.selector)),
    );
    merged
}

/// JSON file holding the operator's ordered filter list.
#[derive(Debug, Clone)]
pub struct FilterStore {
    path: PathBuf,
}

impl FilterStore {
    pub fn in_dir(config_dir: &Path) -> Self {
        Self {
            path: config_dir.join(FILTERS_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file yields the built-ins alone.
    pub fn load(&self) -> Result<Vec<Filter>, FilterStoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(builtin_filters()),
            Err(err) => return Err(err.into()),
        };
        let stored: Vec<Filter> = serde_json::from_str(&content)
            .map_err(|err| FilterStoreError::Serialization(err.to_string()))?;
        Ok(merge_with_builtins(stored))
    }

    pub fn save(&self, filters: &[Filter]) -> Result<(), FilterStoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_string_pretty(filters)
            .map_err(|err| FilterStoreError::Serialization(err.to_string()))?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, payload)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Color;

    #[test]
    fn missing_file_loads_builtins() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FilterStore::in_dir(dir.path());
        assert_eq!(store.load().expect("load"), builtin_filters());
    }

    #[test]
    fn save_then_load_keeps_custom_order_after_builtins() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FilterStore::in_dir(&dir.path().join("nested"));
        let mut disabled_builtin = builtin_filters().remove(0);
        disabled_builtin.enabled = false;
        let filters = vec![
            Filter::new(Selector::annotation("damage"), FilterAction::color(Color::RED)),
            disabled_builtin,
            Filter::new(Selector::annotation("quad"), FilterAction::skip()),
        ];
        store.save(&filters).expect("save");

        let loaded = store.load().expect("load");
        let annos: Vec<_> = loaded
            .iter()
            .map(|f| f.selector.anno.clone().unwrap_or_default())
            .collect();
        assert_eq!(annos, vec!["frame", "damage", "quad"]);
        // The stored copy of the built-in is replaced by the built-in itself.
        assert!(loaded[0].enabled);
        assert_eq!(loaded[1].action.color, Some(Color::RED));
        assert!(loaded[2].action.skip_draw);
    }

    #[test]
    fn persisted_shape_is_plain_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FilterStore::in_dir(dir.path());
        store
            .save(&[Filter::new(
                Selector::annotation("damage"),
                FilterAction::color(Color::RED),
            )])
            .expect("save");
        let raw = fs::read_to_string(store.path()).expect("read");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(value[0]["selector"]["anno"], "damage");
        assert_eq!(value[0]["action"]["color"], "#ff0000");
        assert_eq!(value[0]["enabled"], true);
    }

    #[test]
    fn corrupt_file_is_a_serialization_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FilterStore::in_dir(dir.path());
        fs::write(store.path(), "{not json").expect("write");
        assert!(matches!(
            store.load(),
            Err(FilterStoreError::Serialization(_))
        ));
    }
}
