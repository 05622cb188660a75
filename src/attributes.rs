use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use opentelemetry::{Key, KeyValue, Value};
use rustc_hash::FxHasher;

/// A unique set of attributes that can be used as aggregation cell identifiers.
///
/// Attribute sets are value types: equality is purely structural, and the
/// hash of the canonical (sorted, de-duplicated) form is computed once at
/// construction so repeated map lookups stay cheap.
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct AttributeSet(Vec<KeyValue>, u64);

impl From<&[KeyValue]> for AttributeSet {
    fn from(values: &[KeyValue]) -> Self {
        AttributeSet::new(values.to_vec())
    }
}

fn hash_of(values: &[KeyValue]) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write_usize(values.len());
    for kv in values {
        kv.hash(&mut hasher);
    }
    hasher.finish()
}

impl AttributeSet {
    fn new(mut values: Vec<KeyValue>) -> Self {
        // The sort is stable, so a run of equal keys stays in recording
        // order and its final element is the latest write.
        values.sort_by(|a, b| a.key.cmp(&b.key));

        let mut canonical: Vec<KeyValue> = Vec::with_capacity(values.len());
        for kv in values {
            match canonical.last_mut() {
                // Later writes to a duplicate key win.
                Some(prev) if prev.key == kv.key => *prev = kv,
                _ => canonical.push(kv),
            }
        }

        let hash = hash_of(&canonical);
        AttributeSet(canonical, hash)
    }

    /// Build a set from `values`, keeping only keys in `allowed`.
    ///
    /// Keys outside the filter are dropped before the canonical form is
    /// hashed, so two inputs differing only in filtered keys produce equal
    /// sets.
    pub fn with_filter(values: &[KeyValue], allowed: &HashSet<Key>) -> Self {
        AttributeSet::new(
            values
                .iter()
                .filter(|kv| allowed.contains(&kv.key))
                .cloned()
                .collect(),
        )
    }

    /// Iterate over key / value pairs in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Value)> {
        self.0.iter().map(|kv| (&kv.key, &kv.value))
    }

    /// True if the set holds no attributes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of attributes in the set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// The canonical attribute list.
    pub fn as_slice(&self) -> &[KeyValue] {
        &self.0
    }
}

impl Hash for AttributeSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_does_not_matter() {
        let a = AttributeSet::from(&[KeyValue::new("a", 1), KeyValue::new("b", 2)][..]);
        let b = AttributeSet::from(&[KeyValue::new("b", 2), KeyValue::new("a", 1)][..]);
        assert_eq!(a, b);
        assert_eq!(hash_of(a.as_slice()), hash_of(b.as_slice()));
    }

    #[test]
    fn last_duplicate_wins() {
        let set = AttributeSet::from(&[KeyValue::new("a", 1), KeyValue::new("a", 2)][..]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.as_slice()[0].value, Value::I64(2));
    }

    #[test]
    fn filter_drops_unlisted_keys() {
        let allowed: HashSet<Key> = [Key::new("k")].into_iter().collect();
        let a = AttributeSet::with_filter(
            &[KeyValue::new("k", "x"), KeyValue::new("other", "p")],
            &allowed,
        );
        let b = AttributeSet::with_filter(
            &[KeyValue::new("k", "x"), KeyValue::new("other", "q")],
            &allowed,
        );
        assert_eq!(a, b);
        assert_eq!(a.len(), 1);
    }

    #[test]
    fn empty_set() {
        let set = AttributeSet::from(&[][..]);
        assert!(set.is_empty());
        assert_eq!(set.len(), 0);
    }
}
