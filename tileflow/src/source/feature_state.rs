//! Per-feature state kept outside the tile lifecycle.

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};

/// Key/value state for one feature.
pub type FeatureState = Map<String, Value>;

/// A coalesced change since the last [`FeatureStateStore::take_changes`].
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureStateChange {
    pub layer: String,
    pub feature_id: String,
    /// Full state after the change; `None` once the feature's state was removed.
    pub state: Option<FeatureState>,
}

/// Feature state keyed by `(source layer, feature id)`.
///
/// State is independent of tiles: reloading or evicting a tile does not
/// touch it, and a feature reappearing in a fresh tile sees the same state.
/// Updates are coalesced so the renderer only re-evaluates each feature once
/// per [`take_changes`](Self::take_changes).
#[derive(Debug, Default)]
pub struct FeatureStateStore {
    state: HashMap<String, HashMap<String, FeatureState>>,
    pending: BTreeMap<(String, String), Option<FeatureState>>,
}

impl FeatureStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `update` into the feature's state.
    pub fn set(&mut self, layer: &str, feature_id: &str, update: FeatureState) {
        let entry = self
            .state
            .entry(layer.to_string())
            .or_default()
            .entry(feature_id.to_string())
            .or_default();
        entry.extend(update);
        let snapshot = entry.clone();
        self.record(layer, feature_id, Some(snapshot));
    }

    /// Current state, empty if none was set.
    pub fn get(&self, layer: &str, feature_id: &str) -> FeatureState {
        self.state
            .get(layer)
            .and_then(|features| features.get(feature_id))
            .cloned()
            .unwrap_or_default()
    }

    /// Remove state.
    ///
    /// Without `feature_id`, clears every feature in `layer`. Without `key`,
    /// clears the whole feature; otherwise only that key. A key may only be
    /// given together with a feature id.
    pub fn remove(&mut self, layer: &str, feature_id: Option<&str>, key: Option<&str>) {
        let Some(features) = self.state.get_mut(layer) else {
            return;
        };
        match (feature_id, key) {
            (None, _) => {
                let ids: Vec<String> = features.keys().cloned().collect();
                self.state.remove(layer);
                for id in ids {
                    self.record(layer, &id, None);
                }
            }
            (Some(id), None) => {
                if features.remove(id).is_some() {
                    self.record(layer, id, None);
                }
            }
            (Some(id), Some(key)) => {
                let Some(state) = features.get_mut(id) else {
                    return;
                };
                if state.remove(key).is_none() {
                    return;
                }
                let snapshot = state.clone();
                self.record(layer, id, Some(snapshot));
            }
        }
    }

    /// Drain coalesced changes, ordered by layer then feature id.
    pub fn take_changes(&mut self) -> Vec<FeatureStateChange> {
        std::mem::take(&mut self.pending)
            .into_iter()
            .map(|((layer, feature_id), state)| FeatureStateChange {
                layer,
                feature_id,
                state,
            })
            .collect()
    }

    pub fn has_changes(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Number of features with state.
    pub fn len(&self) -> usize {
        self.state.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record(&mut self, layer: &str, feature_id: &str, state: Option<FeatureState>) {
        self.pending
            .insert((layer.to_string(), feature_id.to_string()), state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state(value: Value) -> FeatureState {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_set_merges() {
        let mut store = FeatureStateStore::new();
        store.set("roads", "42", state(json!({"hover": true})));
        store.set("roads", "42", state(json!({"selected": 1})));
        assert_eq!(
            Value::Object(store.get("roads", "42")),
            json!({"hover": true, "selected": 1})
        );
        assert!(store.get("roads", "7").is_empty());
    }

    #[test]
    fn test_changes_coalesce() {
        let mut store = FeatureStateStore::new();
        store.set("roads", "42", state(json!({"hover": true})));
        store.set("roads", "42", state(json!({"hover": false})));
        store.set("water", "1", state(json!({"x": 1})));

        let changes = store.take_changes();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].layer, "roads");
        assert_eq!(changes[0].state, Some(state(json!({"hover": false}))));
        assert!(!store.has_changes());
    }

    #[test]
    fn test_remove_key_feature_and_layer() {
        let mut store = FeatureStateStore::new();
        store.set("roads", "1", state(json!({"a": 1, "b": 2})));
        store.set("roads", "2", state(json!({"a": 1})));
        store.take_changes();

        store.remove("roads", Some("1"), Some("a"));
        assert_eq!(Value::Object(store.get("roads", "1")), json!({"b": 2}));

        store.remove("roads", Some("2"), None);
        assert!(store.get("roads", "2").is_empty());
        assert_eq!(store.len(), 1);

        store.remove("roads", None, None);
        assert!(store.is_empty());

        let changes = store.take_changes();
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.state.is_none()));
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let mut store = FeatureStateStore::new();
        store.remove("roads", Some("1"), Some("a"));
        store.remove("roads", None, None);
        assert!(!store.has_changes());
    }
}
