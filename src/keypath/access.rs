//! Document accessors.
//!
//! Reads and rewrites `serde_json` documents at a [`KeyPath`]. Wildcard
//! steps fan out over every element of the array they address.

use serde_json::Value as JsonValue;

use super::{KeyPath, PathStep, WILDCARD_INDEX};

/// Resolves a concrete path to a single value. Wildcard paths address more
/// than one location and always return `None` here; use
/// [`for_each_value_mut`] for those.
pub fn get_value<'a>(doc: &'a JsonValue, path: &KeyPath) -> Option<&'a JsonValue> {
    let mut current = doc;
    for step in path.steps() {
        current = match step {
            PathStep::Name(name) => current.as_object()?.get(name)?,
            PathStep::Index(WILDCARD_INDEX) => return None,
            PathStep::Index(index) => current.as_array()?.get(usize::try_from(*index).ok()?)?,
        };
    }
    Some(current)
}

/// Applies `f` to every value the path addresses.
pub fn for_each_value_mut(doc: &mut JsonValue, path: &KeyPath, f: &mut dyn FnMut(&mut JsonValue)) {
    descend_mut(doc, path.steps(), f);
}

/// Writes `value` at every location the path addresses, creating missing
/// intermediate objects for name steps. Returns the number of writes.
pub fn set_value(doc: &mut JsonValue, path: &KeyPath, value: JsonValue) -> usize {
    let Some(last) = path.last() else { return 0 };
    let parent_steps = &path.steps()[..path.len() - 1];
    let mut written = 0;
    descend_or_create(doc, parent_steps, &mut |parent| match last {
        PathStep::Name(name) => {
            if parent.is_null() {
                *parent = JsonValue::Object(Default::default());
            }
            if let Some(obj) = parent.as_object_mut() {
                obj.insert(name.clone(), value.clone());
                written += 1;
            }
        }
        PathStep::Index(WILDCARD_INDEX) => {
            if let Some(items) = parent.as_array_mut() {
                for item in items {
                    *item = value.clone();
                    written += 1;
                }
            }
        }
        PathStep::Index(index) => {
            if let Some(slot) = usize::try_from(*index)
                .ok()
                .and_then(|i| parent.as_array_mut().and_then(|a| a.get_mut(i)))
            {
                *slot = value.clone();
                written += 1;
            }
        }
    });
    written
}

/// Removes and returns the value at a concrete path.
pub fn take_value(doc: &mut JsonValue, path: &KeyPath) -> Option<JsonValue> {
    take_at(doc, path.steps())
}

/// Deletes every value the path addresses. Returns the number of deletions.
pub fn remove_value(doc: &mut JsonValue, path: &KeyPath) -> usize {
    let Some(last) = path.last() else { return 0 };
    let parent_steps = &path.steps()[..path.len() - 1];
    let mut removed = 0;
    descend_mut(doc, parent_steps, &mut |parent| match last {
        PathStep::Name(name) => {
            if let Some(obj) = parent.as_object_mut() {
                if obj.remove(name).is_some() {
                    removed += 1;
                }
            }
        }
        PathStep::Index(WILDCARD_INDEX) => {
            if let Some(items) = parent.as_array_mut() {
                removed += items.len();
                items.clear();
            }
        }
        PathStep::Index(index) => {
            if let Some(i) = usize::try_from(*index).ok() {
                if let Some(items) = parent.as_array_mut() {
                    if i < items.len() {
                        items.remove(i);
                        removed += 1;
                    }
                }
            }
        }
    });
    removed
}

/// Moves the value at `from` to `to` in place.
///
/// The paths may share a wildcard-bearing prefix; the divergent tails must
/// be concrete, which the rename locality rules guarantee. Returns the
/// number of values moved (one per matched array element).
pub fn move_value(doc: &mut JsonValue, from: &KeyPath, to: &KeyPath) -> usize {
    let common = from
        .steps()
        .iter()
        .zip(to.steps())
        .take_while(|(a, b)| *a == *b)
        .count();
    let from_tail = &from.steps()[common..];
    let to_tail = &to.steps()[common..];
    let mut moved = 0;
    descend_mut(doc, &from.steps()[..common], &mut |subtree| {
        if let Some(value) = take_at(subtree, from_tail) {
            if set_at(subtree, to_tail, value) {
                moved += 1;
            }
        }
    });
    moved
}

fn descend_mut(value: &mut JsonValue, steps: &[PathStep], f: &mut dyn FnMut(&mut JsonValue)) {
    let Some((step, rest)) = steps.split_first() else {
        f(value);
        return;
    };
    match step {
        PathStep::Name(name) => {
            if let Some(child) = value.as_object_mut().and_then(|o| o.get_mut(name)) {
                descend_mut(child, rest, f);
            }
        }
        PathStep::Index(WILDCARD_INDEX) => {
            if let Some(items) = value.as_array_mut() {
                for item in items {
                    descend_mut(item, rest, f);
                }
            }
        }
        PathStep::Index(index) => {
            if let Some(child) = usize::try_from(*index)
                .ok()
                .and_then(|i| value.as_array_mut().and_then(|a| a.get_mut(i)))
            {
                descend_mut(child, rest, f);
            }
        }
    }
}

fn descend_or_create(value: &mut JsonValue, steps: &[PathStep], f: &mut dyn FnMut(&mut JsonValue)) {
    let Some((step, rest)) = steps.split_first() else {
        f(value);
        return;
    };
    match step {
        PathStep::Name(name) => {
            if value.is_null() {
                *value = JsonValue::Object(Default::default());
            }
            if let Some(obj) = value.as_object_mut() {
                let child = obj.entry(name.clone()).or_insert(JsonValue::Null);
                descend_or_create(child, rest, f);
            }
        }
        PathStep::Index(WILDCARD_INDEX) => {
            if let Some(items) = value.as_array_mut() {
                for item in items {
                    descend_or_create(item, rest, f);
                }
            }
        }
        PathStep::Index(index) => {
            if let Some(child) = usize::try_from(*index)
                .ok()
                .and_then(|i| value.as_array_mut().and_then(|a| a.get_mut(i)))
            {
                descend_or_create(child, rest, f);
            }
        }
    }
}

fn take_at(value: &mut JsonValue, steps: &[PathStep]) -> Option<JsonValue> {
    let (step, rest) = steps.split_first()?;
    match step {
        PathStep::Name(name) => {
            let obj = value.as_object_mut()?;
            if rest.is_empty() {
                obj.remove(name)
            } else {
                take_at(obj.get_mut(name)?, rest)
            }
        }
        PathStep::Index(WILDCARD_INDEX) => None,
        PathStep::Index(index) => {
            let i = usize::try_from(*index).ok()?;
            let items = value.as_array_mut()?;
            if rest.is_empty() {
                if i < items.len() {
                    Some(items.remove(i))
                } else {
                    None
                }
            } else {
                take_at(items.get_mut(i)?, rest)
            }
        }
    }
}

fn set_at(value: &mut JsonValue, steps: &[PathStep], new: JsonValue) -> bool {
    match steps.split_first() {
        None => {
            *value = new;
            true
        }
        Some((PathStep::Name(name), rest)) => {
            if value.is_null() {
                *value = JsonValue::Object(Default::default());
            }
            match value.as_object_mut() {
                Some(obj) => {
                    let child = obj.entry(name.clone()).or_insert(JsonValue::Null);
                    set_at(child, rest, new)
                }
                None => false,
            }
        }
        Some((PathStep::Index(index), rest)) => {
            if *index == WILDCARD_INDEX {
                return false;
            }
            match usize::try_from(*index)
                .ok()
                .and_then(|i| value.as_array_mut().and_then(|a| a.get_mut(i)))
            {
                Some(child) => set_at(child, rest, new),
                None => false,
            }
        }
    }
}
