use std::{fmt::Debug, num::{ParseFloatError, ParseIntError}, ops::Index};

use derive_more::Display;

use super::super::types::{GameString, HashMap, MapId};

/// An error that occurred while converting a [ScriptValue] into a typed
/// field. Carries enough context for a loader to name the offending key.
#[derive(Debug, Display)]
pub enum ConversionError {
    /// The value exists but has the wrong shape
    #[display("value of '{_0}' has an invalid type")]
    InvalidType(String),
    /// The value could not be parsed into the requested type
    #[display("value '{_0}' is invalid")]
    InvalidValue(String),
    /// A required key is absent
    #[display("required field '{_0}' is missing")]
    MissingField(String),
}

impl std::error::Error for ConversionError {}

impl From<ParseIntError> for ConversionError {
    fn from(e: ParseIntError) -> Self {
        ConversionError::InvalidValue(e.to_string())
    }
}

impl From<ParseFloatError> for ConversionError {
    fn from(e: ParseFloatError) -> Self {
        ConversionError::InvalidValue(e.to_string())
    }
}

/// A value that comes from a game script file.
/// Everything is textual at this level; typed access goes through the
/// `as_*` conversions so loaders can decide what a field means.
#[derive(PartialEq, Clone, Debug)]
pub enum ScriptValue {
    /// A scalar, quoted or not
    String(GameString),
    /// A nested block
    Object(ScriptObject),
}

impl ScriptValue {
    /// Get the value as a string, stripping nothing
    pub fn as_string(&self) -> Result<GameString, ConversionError> {
        match self {
            ScriptValue::String(s) => Ok(s.clone()),
            ScriptValue::Object(o) => Err(ConversionError::InvalidType(o.name().to_owned())),
        }
    }

    /// Get the value as an entity id
    pub fn as_id(&self) -> Result<MapId, ConversionError> {
        Ok(self.as_string()?.trim().parse::<MapId>()?)
    }

    pub fn as_integer(&self) -> Result<i64, ConversionError> {
        Ok(self.as_string()?.trim().parse::<i64>()?)
    }

    pub fn as_number(&self) -> Result<f64, ConversionError> {
        Ok(self.as_string()?.trim().parse::<f64>()?)
    }

    /// Get the value as a boolean. The script format spells these `yes`
    /// and `no`.
    pub fn as_boolean(&self) -> Result<bool, ConversionError> {
        let s = self.as_string()?;
        match s.as_ref() {
            "yes" => Ok(true),
            "no" => Ok(false),
            other => Err(ConversionError::InvalidValue(other.to_owned())),
        }
    }

    /// Get the value as a nested block
    pub fn as_object(&self) -> Result<&ScriptObject, ConversionError> {
        match self {
            ScriptValue::Object(o) => Ok(o),
            ScriptValue::String(s) => Err(ConversionError::InvalidType(s.to_string())),
        }
    }
}

/// A block that stores values under keys.
pub type ScriptMap = ScriptBlock<HashMap<String, ScriptValue>>;
/// A block that stores values positionally.
pub type ScriptArray = ScriptBlock<Vec<ScriptValue>>;

/// A nested block from a script file, either keyed or positional.
#[derive(PartialEq, Clone)]
pub enum ScriptObject {
    Map(ScriptMap),
    Array(ScriptArray),
}

impl ScriptObject {
    pub fn name(&self) -> &str {
        match self {
            ScriptObject::Map(m) => m.name(),
            ScriptObject::Array(a) => a.name(),
        }
    }

    pub fn as_map(&self) -> Result<&ScriptMap, ConversionError> {
        match self {
            ScriptObject::Map(m) => Ok(m),
            ScriptObject::Array(a) => Err(ConversionError::InvalidType(a.name().to_owned())),
        }
    }

    pub fn as_array(&self) -> Result<&ScriptArray, ConversionError> {
        match self {
            ScriptObject::Array(a) => Ok(a),
            ScriptObject::Map(m) => Err(ConversionError::InvalidType(m.name().to_owned())),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ScriptObject::Map(m) => m.is_empty(),
            ScriptObject::Array(a) => a.is_empty(),
        }
    }
}

impl Debug for ScriptObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScriptObject::Map(o) => write!(f, "Map({},{:?})", o.name, o.inner),
            ScriptObject::Array(o) => write!(f, "Array({},{:?})", o.name, o.inner),
        }
    }
}

/// A trait describing a collection that can back a [ScriptBlock].
/// This is really just a way to abstract over [HashMap] and [Vec].
pub trait ScriptCollection: Debug {
    fn new() -> Self;
    fn is_empty(&self) -> bool;
}

impl ScriptCollection for HashMap<String, ScriptValue> {
    fn new() -> Self {
        HashMap::default()
    }

    fn is_empty(&self) -> bool {
        self.is_empty()
    }
}

impl ScriptCollection for Vec<ScriptValue> {
    fn new() -> Self {
        Vec::new()
    }

    fn is_empty(&self) -> bool {
        self.is_empty()
    }
}

/// A named block holding parsed script values.
/// The name is the key the block appeared under, which isn't unique.
#[derive(PartialEq, Clone)]
pub struct ScriptBlock<T: ScriptCollection> {
    inner: T,
    name: String,
}

impl<T: ScriptCollection> ScriptBlock<T> {
    pub fn from_name(name: String) -> Self {
        ScriptBlock {
            inner: T::new(),
            name,
        }
    }

    pub fn new() -> Self {
        ScriptBlock {
            inner: T::new(),
            name: String::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl ScriptMap {
    pub fn get(&self, key: &str) -> Option<&ScriptValue> {
        self.inner.get(key)
    }

    /// Get a required string field
    pub fn get_string(&self, key: &str) -> Result<GameString, ConversionError> {
        self.require(key)?.as_string()
    }

    /// Get a required id field
    pub fn get_id(&self, key: &str) -> Result<MapId, ConversionError> {
        self.require(key)?.as_id()
    }

    pub fn get_integer(&self, key: &str) -> Result<i64, ConversionError> {
        self.require(key)?.as_integer()
    }

    pub fn get_number(&self, key: &str) -> Result<f64, ConversionError> {
        self.require(key)?.as_number()
    }

    /// Get an optional boolean field, absent meaning `no`
    pub fn get_boolean(&self, key: &str) -> Result<bool, ConversionError> {
        match self.get(key) {
            Some(v) => v.as_boolean(),
            None => Ok(false),
        }
    }

    /// Get a required nested block
    pub fn get_object(&self, key: &str) -> Result<&ScriptObject, ConversionError> {
        self.require(key)?.as_object()
    }

    fn require(&self, key: &str) -> Result<&ScriptValue, ConversionError> {
        self.get(key)
            .ok_or_else(|| ConversionError::MissingField(key.to_owned()))
    }

    /// Collect every block stored under `key`, transparently unwrapping
    /// the array the multi-key promotion in [Self::insert] produces.
    /// A missing key yields an empty vector.
    pub fn get_blocks(&self, key: &str) -> Vec<&ScriptMap> {
        let mut res = Vec::new();
        match self.get(key) {
            Some(ScriptValue::Object(ScriptObject::Map(m))) => res.push(m),
            Some(ScriptValue::Object(ScriptObject::Array(arr))) => {
                for val in arr {
                    if let ScriptValue::Object(ScriptObject::Map(m)) = val {
                        res.push(m);
                    }
                }
            }
            _ => {}
        }
        res
    }

    /// Collect every positional block stored under `key`. A single
    /// `key = { a b }` yields that one array; repeated keys yield each
    /// repetition thanks to the multi-key wrapper.
    pub fn get_arrays(&self, key: &str) -> Vec<&ScriptArray> {
        match self.get(key) {
            Some(ScriptValue::Object(ScriptObject::Array(arr))) => {
                if arr.name().is_empty() {
                    arr.iter()
                        .filter_map(|v| match v {
                            ScriptValue::Object(ScriptObject::Array(a)) => Some(a),
                            _ => None,
                        })
                        .collect()
                } else {
                    vec![arr]
                }
            }
            _ => Vec::new(),
        }
    }

    /// Collect every scalar stored under `key`, transparently unwrapping
    /// multi-key arrays. A missing key yields an empty vector.
    pub fn get_strings(&self, key: &str) -> Vec<GameString> {
        let mut res = Vec::new();
        match self.get(key) {
            Some(ScriptValue::String(s)) => res.push(s.clone()),
            Some(ScriptValue::Object(ScriptObject::Array(arr))) => {
                for val in arr {
                    if let ScriptValue::String(s) = val {
                        res.push(s.clone());
                    }
                }
            }
            _ => {}
        }
        res
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.inner.keys()
    }

    pub fn remove(&mut self, key: &str) -> Option<ScriptValue> {
        self.inner.remove(key)
    }

    pub(super) fn values_mut(&mut self) -> impl Iterator<Item = &mut ScriptValue> {
        self.inner.values_mut()
    }

    /// Insert a new value into the block.
    /// If the key already exists, the old and the new value are stored in
    /// a wrapper array under that key. Held values are never discarded,
    /// which is how the multi-key feature of the script format is
    /// implemented. Wrapper arrays are unnamed, which keeps them apart
    /// from value arrays: those always carry their key as the name.
    pub fn insert(&mut self, key: String, value: ScriptValue) {
        let stored = self.inner.get_mut(&key);
        match stored {
            Some(val) => match val {
                ScriptValue::Object(ScriptObject::Array(arr)) if arr.name().is_empty() => {
                    arr.push(value);
                }
                _ => {
                    let mut arr = ScriptArray::new();
                    arr.push(val.clone());
                    arr.push(value);
                    self.inner
                        .insert(key, ScriptValue::Object(ScriptObject::Array(arr)));
                }
            },
            None => {
                self.inner.insert(key, value);
            }
        }
    }
}

impl<'a> IntoIterator for &'a ScriptMap {
    type Item = (&'a String, &'a ScriptValue);
    type IntoIter = std::collections::hash_map::Iter<'a, String, ScriptValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.iter()
    }
}

impl ScriptArray {
    pub fn get_index(&self, index: usize) -> Option<&ScriptValue> {
        self.inner.get(index)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn push(&mut self, value: ScriptValue) {
        self.inner.push(value);
    }

    pub fn iter(&self) -> std::slice::Iter<ScriptValue> {
        self.inner.iter()
    }

    pub(super) fn values_mut(&mut self) -> impl Iterator<Item = &mut ScriptValue> {
        self.inner.iter_mut()
    }
}

impl Index<usize> for ScriptArray {
    type Output = ScriptValue;

    fn index(&self, index: usize) -> &Self::Output {
        &self.inner[index]
    }
}

impl<'a> IntoIterator for &'a ScriptArray {
    type Item = &'a ScriptValue;
    type IntoIter = std::slice::Iter<'a, ScriptValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.iter()
    }
}

impl<T: ScriptCollection> Debug for ScriptBlock<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ScriptBlock({},{:?})", self.name, self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_multi_key_insert() {
        let mut obj = ScriptMap::from_name("test".to_owned());
        let val: GameString = Arc::from("value");
        obj.insert("key".to_owned(), ScriptValue::String(val.clone()));
        assert_eq!(obj.get_string("key").unwrap(), val);
        let val2: GameString = Arc::from("value2");
        obj.insert("key".to_owned(), ScriptValue::String(val2));
        let arr = obj.get_object("key").unwrap().as_array().unwrap();
        assert_eq!(arr.len(), 2);
        assert_eq!(obj.get_strings("key").len(), 2);
    }

    #[test]
    fn test_boolean() {
        let mut obj = ScriptMap::new();
        obj.insert(
            "coastal".to_owned(),
            ScriptValue::String(Arc::from("yes")),
        );
        assert!(obj.get_boolean("coastal").unwrap());
        assert!(!obj.get_boolean("absent").unwrap());
        obj.insert("bad".to_owned(), ScriptValue::String(Arc::from("maybe")));
        assert!(obj.get_boolean("bad").is_err());
    }

    #[test]
    fn test_missing_field() {
        let obj = ScriptMap::new();
        assert!(matches!(
            obj.get_id("id"),
            Err(ConversionError::MissingField(_))
        ));
    }
}
