//! Recall registry for creating recall families by name.
//!
//! Tasks and persisted projects refer to recalls by string type; the registry
//! turns `(name, params)` into ports and template behaviors.

use super::{Recall, RecallFlags, RecallTarget};
use crate::error::{RecallError, RecallResult};
use crate::port::Port;
use crate::{AudioId, PortSet};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Recall parameters (simple key-value map)
pub type RecallParams = HashMap<String, ParamValue>;

/// Parameter value types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl ParamValue {
    /// Convert to f64 if possible
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Convert to i64 if possible
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_usize(&self) -> Option<usize> {
        self.as_i64().and_then(|i| usize::try_from(i).ok())
    }

    /// Convert to bool if possible
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Convert to string slice if possible
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl From<f64> for ParamValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<f32> for ParamValue {
    fn from(f: f32) -> Self {
        Self::Float(f as f64)
    }
}

impl From<i64> for ParamValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for ParamValue {
    fn from(i: i32) -> Self {
        Self::Int(i as i64)
    }
}

impl From<usize> for ParamValue {
    fn from(i: usize) -> Self {
        Self::Int(i as i64)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

/// Helper to get a required parameter
pub fn get_param<T>(
    params: &RecallParams,
    name: &str,
    convert: impl FnOnce(&ParamValue) -> Option<T>,
) -> RecallResult<T> {
    params
        .get(name)
        .ok_or_else(|| RecallError::MissingParameter(name.to_string()))
        .and_then(|v| {
            convert(v).ok_or_else(|| RecallError::InvalidParameter(name.to_string(), format!("{v:?}")))
        })
}

/// Helper to get an optional parameter with default
pub fn get_param_or<T>(
    params: &RecallParams,
    name: &str,
    default: T,
    convert: impl FnOnce(&ParamValue) -> Option<T>,
) -> T {
    params.get(name).and_then(convert).unwrap_or(default)
}

/// Constructs the ports and templates of one recall family.
///
/// The ports are created once per mapping and shared by the audio template,
/// every channel template and all their running instances.
pub trait RecallFactory: Send + Sync {
    fn name(&self) -> &str;

    fn ports(&self, params: &RecallParams) -> RecallResult<Vec<Port>>;

    fn flags(&self) -> RecallFlags {
        RecallFlags::default()
    }

    /// Audio-scope template, if the family has one.
    fn audio_recall(
        &self,
        _audio: AudioId,
        _ports: &Arc<PortSet>,
        _params: &RecallParams,
    ) -> RecallResult<Option<Box<dyn Recall>>> {
        Ok(None)
    }

    /// Channel-scope template for `target`, if the family has one.
    fn channel_recall(
        &self,
        _target: &RecallTarget,
        _ports: &Arc<PortSet>,
        _params: &RecallParams,
    ) -> RecallResult<Option<Box<dyn Recall>>> {
        Ok(None)
    }
}

/// Registry of recall factories, shared by clones.
#[derive(Clone, Default)]
pub struct RecallRegistry {
    factories: Arc<RwLock<HashMap<String, Arc<dyn RecallFactory>>>>,
}

impl RecallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under its own name, replacing any previous one.
    pub fn register(&self, factory: impl RecallFactory + 'static) {
        let name = factory.name().to_string();
        self.factories.write().insert(name, Arc::new(factory));
    }

    pub fn get(&self, name: &str) -> RecallResult<Arc<dyn RecallFactory>> {
        self.factories
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RecallError::UnknownType(name.to_string()))
    }

    /// List all registered recall types
    pub fn list_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_type(&self, name: &str) -> bool {
        self.factories.read().contains_key(name)
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.factories.write().remove(name).is_some()
    }
}

impl core::fmt::Debug for RecallRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RecallRegistry")
            .field("types", &self.list_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params;

    struct Gain;

    impl RecallFactory for Gain {
        fn name(&self) -> &str {
            "gain"
        }

        fn ports(&self, params: &RecallParams) -> RecallResult<Vec<Port>> {
            let gain = get_param(params, "gain", |v| v.as_f64())?;
            Ok(vec![Port::float("gain", gain)])
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = RecallRegistry::new();
        registry.register(Gain);
        assert!(registry.has_type("gain"));
        assert_eq!(registry.list_types(), vec!["gain".to_string()]);

        let factory = registry.get("gain").unwrap();
        let ports = factory.ports(&params! { "gain" => 0.5 }).unwrap();
        assert_eq!(ports[0].get(), 0.5);
    }

    #[test]
    fn test_unknown_type() {
        let registry = RecallRegistry::new();
        assert!(matches!(
            registry.get("missing"),
            Err(RecallError::UnknownType(name)) if name == "missing"
        ));
    }

    #[test]
    fn test_param_helpers() {
        let params = params! { "rate" => 2, "label" => "x" };
        assert_eq!(get_param(&params, "rate", |v| v.as_f64()).unwrap(), 2.0);
        assert_eq!(
            get_param(&params, "depth", |v| v.as_f64()),
            Err(RecallError::MissingParameter("depth".into()))
        );
        assert!(matches!(
            get_param(&params, "label", |v| v.as_f64()),
            Err(RecallError::InvalidParameter(..))
        ));
        assert_eq!(get_param_or(&params, "depth", 0.25, |v| v.as_f64()), 0.25);
    }

    #[test]
    fn test_shared_between_clones() {
        let registry = RecallRegistry::new();
        let clone = registry.clone();
        clone.register(Gain);
        assert!(registry.has_type("gain"));
        assert!(registry.unregister("gain"));
        assert!(!clone.has_type("gain"));
    }
}
