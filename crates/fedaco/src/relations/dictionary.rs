//! Key collection and result matching shared by the eager loaders.

use super::RelationValue;
use crate::error::OrmResult;
use crate::orm::Model;
use crate::value::{DictKey, Value};
use std::collections::{HashMap, HashSet};

/// Related models bucketed by the key that points back at their parent.
pub(crate) type Dictionary = HashMap<DictKey, Vec<Model>>;

/// Distinct non-null values of `key` across `models`, in first-seen order.
pub(crate) fn collect_keys(models: &[Model], key: &str) -> OrmResult<Vec<Value>> {
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for model in models {
        let Some(value) = model.get_raw(key) else {
            continue;
        };
        if let Some(dict_key) = DictKey::from_value(value)?
            && seen.insert(dict_key)
        {
            keys.push(value.clone());
        }
    }
    Ok(keys)
}

/// Bucket `results` by the value `key_of` extracts from each.
pub(crate) fn build_by<F>(results: Vec<Model>, key_of: F) -> OrmResult<Dictionary>
where
    F: Fn(&Model) -> Option<Value>,
{
    let mut dictionary: Dictionary = HashMap::new();
    for model in results {
        let Some(value) = key_of(&model) else {
            continue;
        };
        if let Some(key) = DictKey::from_value(&value)? {
            dictionary.entry(key).or_default().push(model);
        }
    }
    Ok(dictionary)
}

/// Bucket `results` by their `key` attribute.
pub(crate) fn build(results: Vec<Model>, key: &str) -> OrmResult<Dictionary> {
    build_by(results, |model| model.get_raw(key).cloned())
}

/// Attach each parent's bucket, looked up by the parent's `local_key` value.
/// Parents without a bucket keep the value set by `init_relation`.
pub(crate) fn match_parents(
    models: &mut [Model],
    dictionary: &Dictionary,
    local_key: &str,
    name: &str,
    many: bool,
) -> OrmResult<()> {
    for model in models.iter_mut() {
        let Some(value) = model.get_raw(local_key) else {
            continue;
        };
        let Some(key) = DictKey::from_value(value)? else {
            continue;
        };
        let Some(bucket) = dictionary.get(&key) else {
            continue;
        };
        let relation = if many {
            RelationValue::Many(bucket.clone())
        } else {
            match bucket.first() {
                Some(first) => RelationValue::one(Some(first.clone())),
                None => continue,
            }
        };
        model.set_relation(name, relation);
    }
    Ok(())
}
