use crate::color::Color;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEMO_THREAD_ID: i64 = 0;
pub const DEMO_THREAD_NAME: &str = "demo";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadState {
    pub name: String,
    pub enabled: bool,
    pub override_filtering: bool,
    pub override_color: Color,
    pub override_alpha: f32,
}

impl ThreadState {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
            override_filtering: false,
            override_color: Color::BLACK,
            override_alpha: 1.0,
        }
    }

    pub fn override_paint(&self) -> Color {
        self.override_color.with_alpha_fraction(self.override_alpha)
    }
}

/// Process-wide thread state keyed by thread name.
///
/// Frames only remember which ids map to which names; enabled and override
/// values are read from here on every render, so edits apply retroactively
/// to every buffered frame.
#[derive(Debug, Default)]
pub struct ThreadRegistry {
    threads: Vec<ThreadState>,
    by_name: HashMap<String, usize>,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` with default state if unknown. Returns true when a
    /// new entry was created.
    pub fn ensure(&mut self, name: &str) -> bool {
        if self.by_name.contains_key(name) {
            return false;
        }
        self.by_name.insert(name.to_string(), self.threads.len());
        self.threads.push(ThreadState::new(name));
        true
    }

    pub fn get(&self, name: &str) -> Option<&ThreadState> {
        self.by_name.get(name).map(|idx| &self.threads[*idx])
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut ThreadState> {
        let idx = *self.by_name.get(name)?;
        self.threads.get_mut(idx)
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.get_mut(name) {
            Some(thread) => {
                thread.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn toggle_enabled(&mut self, name: &str) -> Option<bool> {
        let thread = self.get_mut(name)?;
        thread.enabled = !thread.enabled;
        Some(thread.enabled)
    }

    pub fn set_override(&mut self, name: &str, color: Color, alpha: f32, enabled: bool) -> bool {
        match self.get_mut(name) {
            Some(thread) => {
                thread.override_color = color;
                thread.override_alpha = alpha.clamp(0.0, 1.0);
                thread.override_filtering = enabled;
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ThreadState> {
        self.threads.iter()
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_is_idempotent_by_name() {
        let mut registry = ThreadRegistry::new();
        assert!(registry.ensure("VizCompositorThread"));
        assert!(!registry.ensure("VizCompositorThread"));
        assert!(registry.ensure("CrGpuMain"));
        let names: Vec<_> = registry.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["VizCompositorThread", "CrGpuMain"]);
    }

    #[test]
    fn mutations_on_unknown_threads_are_rejected() {
        let mut registry = ThreadRegistry::new();
        assert!(!registry.set_enabled("missing", false));
        assert!(!registry.set_override("missing", Color::RED, 1.0, true));
        assert_eq!(registry.toggle_enabled("missing"), None);
    }

    #[test]
    fn override_alpha_is_clamped() {
        let mut registry = ThreadRegistry::new();
        registry.ensure("main");
        assert!(registry.set_override("main", Color::RED, 3.0, true));
        let state = registry.get("main").expect("registered");
        assert!(state.override_filtering);
        assert_eq!(state.override_paint(), Color::RED);
    }
}
