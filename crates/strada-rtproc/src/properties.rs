//! Typed property maps: the cross-module control vocabulary.
//!
//! Commands and return values travel between the control plane and the
//! modules as string-keyed maps of tagged values. `get` is strict: a
//! missing key fails with [`ProcError::NotFound`], a key holding another
//! type with [`ProcError::TypeMismatch`]. `set` overwrites.

use std::collections::BTreeMap;

use crate::error::{ProcError, Result};

/// A tagged property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// 32-bit signed integer.
    Int32(i32),
    /// 32-bit float.
    Float32(f32),
    /// UTF-8 string.
    Str(String),
    /// Homogeneous vector of int32.
    Int32Vec(Vec<i32>),
    /// Homogeneous vector of float32.
    Float32Vec(Vec<f32>),
    /// Homogeneous vector of strings.
    StrVec(Vec<String>),
}

impl PropertyValue {
    fn type_name(&self) -> &'static str {
        match self {
            PropertyValue::Int32(_) => "int32",
            PropertyValue::Float32(_) => "float32",
            PropertyValue::Str(_) => "string",
            PropertyValue::Int32Vec(_) => "int32[]",
            PropertyValue::Float32Vec(_) => "float32[]",
            PropertyValue::StrVec(_) => "string[]",
        }
    }
}

/// Conversion between Rust types and [`PropertyValue`] tags.
///
/// Implemented for exactly the six supported types; anything else is not a
/// property type.
pub trait PropertyType: Sized {
    /// Wraps the value in its tag.
    fn into_value(self) -> PropertyValue;
    /// Extracts the value if the tag matches.
    fn from_value(value: &PropertyValue) -> Option<Self>;
}

macro_rules! impl_property_type {
    ($ty:ty, $variant:ident) => {
        impl PropertyType for $ty {
            fn into_value(self) -> PropertyValue {
                PropertyValue::$variant(self)
            }
            fn from_value(value: &PropertyValue) -> Option<Self> {
                match value {
                    PropertyValue::$variant(inner) => Some(inner.clone()),
                    _ => None,
                }
            }
        }
    };
}

impl_property_type!(i32, Int32);
impl_property_type!(f32, Float32);
impl_property_type!(String, Str);
impl_property_type!(Vec<i32>, Int32Vec);
impl_property_type!(Vec<f32>, Float32Vec);
impl_property_type!(Vec<String>, StrVec);

/// String-keyed map of tagged values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
    entries: BTreeMap<String, PropertyValue>,
}

impl Properties {
    /// Creates an empty property map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`, overwriting any previous entry.
    pub fn set<T: PropertyType>(&mut self, key: impl Into<String>, value: T) {
        self.entries.insert(key.into(), value.into_value());
    }

    /// Retrieves the value stored under `key`.
    ///
    /// # Errors
    ///
    /// [`ProcError::NotFound`] if the key is absent,
    /// [`ProcError::TypeMismatch`] if the stored type differs from `T`.
    pub fn get<T: PropertyType>(&self, key: &str) -> Result<T> {
        let value = self
            .entries
            .get(key)
            .ok_or_else(|| ProcError::NotFound(key.into()))?;
        T::from_value(value).ok_or_else(|| ProcError::TypeMismatch(key.into()))
    }

    /// True if an entry exists under `key`, regardless of type.
    pub fn has_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// All keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every entry.
    pub fn clear_all(&mut self) {
        self.entries.clear();
    }

    /// Logs all entries at debug level under the given label.
    pub fn dump(&self, label: &str) {
        for (key, value) in &self.entries {
            tracing::debug!(label, key = %key, kind = value.type_name(), value = ?value, "property");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_all_types() {
        let mut props = Properties::new();
        props.set("i", 42i32);
        props.set("f", 1.5f32);
        props.set("s", String::from("on"));
        props.set("iv", vec![1i32, 2, 3]);
        props.set("fv", vec![0.5f32, 0.25]);
        props.set("sv", vec![String::from("a"), String::from("b")]);

        assert_eq!(props.get::<i32>("i").unwrap(), 42);
        assert_eq!(props.get::<f32>("f").unwrap(), 1.5);
        assert_eq!(props.get::<String>("s").unwrap(), "on");
        assert_eq!(props.get::<Vec<i32>>("iv").unwrap(), vec![1, 2, 3]);
        assert_eq!(props.get::<Vec<f32>>("fv").unwrap(), vec![0.5, 0.25]);
        assert_eq!(props.get::<Vec<String>>("sv").unwrap().len(), 2);
    }

    #[test]
    fn missing_key_is_not_found() {
        let props = Properties::new();
        assert!(matches!(props.get::<i32>("absent"), Err(ProcError::NotFound(_))));
    }

    #[test]
    fn wrong_type_is_mismatch() {
        let mut props = Properties::new();
        props.set("volume", -200i32);
        assert!(matches!(
            props.get::<String>("volume"),
            Err(ProcError::TypeMismatch(_))
        ));
        // The entry itself is intact.
        assert_eq!(props.get::<i32>("volume").unwrap(), -200);
    }

    #[test]
    fn set_overwrites_across_types() {
        let mut props = Properties::new();
        props.set("key", 1i32);
        props.set("key", String::from("now a string"));
        assert!(matches!(props.get::<i32>("key"), Err(ProcError::TypeMismatch(_))));
        assert_eq!(props.get::<String>("key").unwrap(), "now a string");
    }

    #[test]
    fn clear_all_empties_the_map() {
        let mut props = Properties::new();
        props.set("a", 1i32);
        props.set("b", 2i32);
        assert_eq!(props.len(), 2);
        props.clear_all();
        assert!(props.is_empty());
    }
}
