//! Permissive JSON field access.
//!
//! Notification payloads are heterogeneous and loosely versioned. Every
//! accessor here returns `None` or a default on a missing or wrong-typed
//! field instead of failing.

// ============================================================================
// Imports
// ============================================================================

use serde_json::{Map, Value};

// ============================================================================
// ValueExt
// ============================================================================

/// Fallible accessors for [`serde_json::Value`] objects.
pub trait ValueExt {
    /// Returns the string at `key`, if present and a string.
    fn str_field(&self, key: &str) -> Option<&str>;

    /// Returns the string at `key`, or an empty string.
    fn string_or_default(&self, key: &str) -> String {
        self.str_field(key).unwrap_or_default().to_string()
    }

    /// Returns the unsigned integer at `key`.
    fn u64_field(&self, key: &str) -> Option<u64>;

    /// Returns the signed integer at `key`.
    fn i64_field(&self, key: &str) -> Option<i64>;

    /// Returns the boolean at `key`.
    fn bool_field(&self, key: &str) -> Option<bool>;

    /// Returns the object at `key`.
    fn object_field(&self, key: &str) -> Option<&Map<String, Value>>;

    /// Returns the array at `key`.
    fn array_field(&self, key: &str) -> Option<&Vec<Value>>;

    /// Follows a chain of object keys.
    ///
    /// `value.path(&["turn", "id"])` is `value["turn"]["id"]`.
    fn path(&self, keys: &[&str]) -> Option<&Value>;

    /// Returns the first string found among `keys`.
    fn first_str(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|key| self.str_field(key))
    }
}

impl ValueExt for Value {
    #[inline]
    fn str_field(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    #[inline]
    fn u64_field(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(Value::as_u64)
    }

    #[inline]
    fn i64_field(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    #[inline]
    fn bool_field(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    #[inline]
    fn object_field(&self, key: &str) -> Option<&Map<String, Value>> {
        self.get(key).and_then(Value::as_object)
    }

    #[inline]
    fn array_field(&self, key: &str) -> Option<&Vec<Value>> {
        self.get(key).and_then(Value::as_array)
    }

    fn path(&self, keys: &[&str]) -> Option<&Value> {
        keys.iter().try_fold(self, |current, key| current.get(*key))
    }
}

// ============================================================================
// Tests
// ============================================================================
