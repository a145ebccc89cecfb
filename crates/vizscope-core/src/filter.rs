use crate::color::Color;
use crate::source::Source;
use crate::thread::ThreadState;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("filter both skips drawing and overrides color")]
    ContradictoryAction,
    #[error("filter index out of range: {index} >= {len}")]
    OutOfRange { index: usize, len: usize },
}

/// Substring selector; `None` (or empty) fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub func: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anno: Option<String>,
}

impl Selector {
    pub fn annotation(anno: &str) -> Self {
        Self {
            anno: Some(anno.to_string()),
            ..Self::default()
        }
    }

    pub fn matches(&self, source: &Source) -> bool {
        field_matches(self.file.as_deref(), source.file_name.as_deref())
            && field_matches(self.func.as_deref(), source.function_name.as_deref())
            && field_matches(self.anno.as_deref(), source.annotation.as_deref())
    }

    pub fn label(&self) -> String {
        let parts: Vec<String> = [("file", &self.file), ("func", &self.func), ("anno", &self.anno)]
            .into_iter()
            .filter_map(|(key, value)| {
                value
                    .as_deref()
                    .filter(|v| !v.is_empty())
                    .map(|v| format!("{key}~{v}"))
            })
            .collect();
        if parts.is_empty() {
            "*".to_string()
        } else {
            parts.join(" ")
        }
    }
}

fn field_matches(want: Option<&str>, have: Option<&str>) -> bool {
    match want {
        None => true,
        Some(want) if want.is_empty() => true,
        Some(want) => have.is_some_and(|have| have.contains(want)),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterAction {
    #[serde(default, skip_serializing_if = "is_false")]
    pub skip_draw: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Color>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpha: Option<f32>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl FilterAction {
    pub fn skip() -> Self {
        Self {
            skip_draw: true,
            ..Self::default()
        }
    }

    pub fn color(color: Color) -> Self {
        Self {
            color: Some(color),
            ..Self::default()
        }
    }

    pub fn inherit() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub selector: Selector,
    pub action: FilterAction,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Filter {
    pub fn new(selector: Selector, action: FilterAction) -> Self {
        Self {
            selector,
            action,
            enabled: true,
        }
    }

    pub fn validate(&self) -> Result<(), FilterError> {
        if self.action.skip_draw && self.action.color.is_some() {
            return Err(FilterError::ContradictoryAction);
        }
        Ok(())
    }
}

/// Ordered rule list; the first enabled match wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterEngine {
    filters: Vec<Filter>,
}

impl FilterEngine {
    pub fn new(filters: Vec<Filter>) -> Self {
        Self { filters }
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn match_source(&self, source: &Source) -> Option<&FilterAction> {
        self.filters
            .iter()
            .filter(|filter| filter.enabled)
            .find(|filter| filter.selector.matches(source))
            .map(|filter| &filter.action)
    }

    /// Inserts at `index`, clamped to the end of the list.
    pub fn insert(&mut self, filter: Filter, index: usize) -> Result<usize, FilterError> {
        filter.validate()?;
        let index = index.min(self.filters.len());
        self.filters.insert(index, filter);
        Ok(index)
    }

    pub fn push(&mut self, filter: Filter) -> Result<usize, FilterError> {
        self.insert(filter, usize::MAX)
    }

    pub fn replace(&mut self, index: usize, filter: Filter) -> Result<Filter, FilterError> {
        filter.validate()?;
        let len = self.filters.len();
        let slot = self
            .filters
            .get_mut(index)
            .ok_or(FilterError::OutOfRange { index, len })?;
        Ok(std::mem::replace(slot, filter))
    }

    pub fn remove(&mut self, index: usize) -> Option<Filter> {
        if index < self.filters.len() {
            Some(self.filters.remove(index))
        } else {
            None
        }
    }

    pub fn swap(&mut self, i: usize, j: usize) -> bool {
        if i >= self.filters.len() || j >= self.filters.len() {
            return false;
        }
        self.filters.swap(i, j);
        true
    }

    pub fn toggle(&mut self, index: usize) -> Option<bool> {
        let filter = self.filters.get_mut(index)?;
        filter.enabled = !filter.enabled;
        Some(filter.enabled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorOrigin {
    Thread,
    Filter,
    Caller,
    Declared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Hidden,
    Suppressed,
    Paint { color: Color, origin: ColorOrigin },
}

impl Decision {
    pub fn color(self) -> Option<Color> {
        match self {
            Decision::Paint { color, .. } => Some(color),
            _ => None,
        }
    }
}

/// Resolves how one draw call or log line is shown.
///
/// Disabled threads hide the item; a thread override replaces filter lookup
/// entirely; otherwise an item with no matching enabled filter is suppressed.
pub fn decide(
    thread: &ThreadState,
    filters: &FilterEngine,
    source: &Source,
    declared: Color,
    caller: Option<Color>,
) -> Decision {
    if !thread.enabled {
        return Decision::Hidden;
    }
    if thread.override_filtering {
        return Decision::Paint {
            color: thread.override_paint(),
            origin: ColorOrigin::Thread,
        };
    }
    let Some(action) = filters.match_source(source) else {
        return Decision::Suppressed;
    };
    if action.skip_draw {
        return Decision::Suppressed;
    }
    let (color, origin) = match (action.color, caller) {
        (Some(color), _) => (color, ColorOrigin::Filter),
        (None, Some(caller)) => (caller, ColorOrigin::Caller),
        (None, None) => (declared, ColorOrigin::Declared),
    };
    let color = match action.alpha {
        Some(alpha) => color.with_alpha_fraction(alpha),
        None => color,
    };
    Decision::Paint { color, origin }
}
