use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Call-site descriptor reported by the producer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    #[serde(default, alias = "file", skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, alias = "func", skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    #[serde(default, alias = "anno", skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
}

impl Source {
    pub fn annotated(annotation: &str) -> Self {
        Self {
            annotation: Some(annotation.to_string()),
            ..Self::default()
        }
    }

    pub fn label(&self) -> String {
        let anno = self.annotation.as_deref().unwrap_or("-");
        match (&self.file_name, &self.function_name) {
            (Some(file), Some(func)) => format!("{anno} ({func} @ {file})"),
            (Some(file), None) => format!("{anno} ({file})"),
            (None, Some(func)) => format!("{anno} ({func})"),
            (None, None) => anno.to_string(),
        }
    }
}

/// Append-only, deduplicated table of sources addressed by index.
#[derive(Debug, Default)]
pub struct SourceTable {
    sources: Vec<Source>,
    index: HashMap<Source, usize>,
}

impl SourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, source: Source) -> usize {
        if let Some(existing) = self.index.get(&source) {
            return *existing;
        }
        let idx = self.sources.len();
        self.index.insert(source.clone(), idx);
        self.sources.push(source);
        idx
    }

    pub fn contains(&self, source: &Source) -> bool {
        self.index.contains_key(source)
    }

    pub fn get(&self, idx: usize) -> Option<&Source> {
        self.sources.get(idx)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Source)> {
        self.sources.iter().enumerate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_dedups_by_value() {
        let mut table = SourceTable::new();
        let a = table.register(Source::annotated("frame.damage"));
        let b = table.register(Source {
            file_name: Some("display.cc".to_string()),
            ..Source::annotated("frame.damage")
        });
        let again = table.register(Source::annotated("frame.damage"));
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(again, a);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn deserializes_long_and_short_field_names() {
        let long: Source =
            serde_json::from_str(r#"{"fileName":"a.cc","functionName":"Draw","annotation":"x"}"#)
                .expect("long names");
        let short: Source = serde_json::from_str(r#"{"file":"a.cc","func":"Draw","anno":"x"}"#)
            .expect("short names");
        assert_eq!(long, short);
    }
}
