//! Dot-notation lookups over decoded JSON.
//!
//! A path is a list of segments separated by `.`:
//! - an object key (`usage`, `usageMetadata`)
//! - an array index (`choices.0.message`)
//! - `*`, which fans out over every element of an array (`content.*.text`)
//!
//! The empty path addresses the root. `null` is treated as absent everywhere,
//! so `{"usage": null}` has no `usage`.

use serde_json::Value;

/// Every non-null value addressed by `path`, in document order.
pub fn collect<'a>(json: &'a Value, path: &str) -> Vec<&'a Value> {
    let segments: Vec<&str> = if path.is_empty() {
        Vec::new()
    } else {
        path.split('.').collect()
    };
    let mut out = Vec::new();
    walk(json, &segments, &mut out);
    out
}

fn walk<'a>(current: &'a Value, segments: &[&str], out: &mut Vec<&'a Value>) {
    let Some((head, rest)) = segments.split_first() else {
        if !current.is_null() {
            out.push(current);
        }
        return;
    };

    match (*head, current) {
        ("*", Value::Array(items)) => {
            for item in items {
                walk(item, rest, out);
            }
        }
        (key, Value::Array(items)) => {
            if let Some(item) = key.parse::<usize>().ok().and_then(|i| items.get(i)) {
                walk(item, rest, out);
            }
        }
        (key, Value::Object(map)) => {
            if let Some(next) = map.get(key) {
                walk(next, rest, out);
            }
        }
        _ => {}
    }
}

/// First non-null value addressed by `path`.
pub fn lookup<'a>(json: &'a Value, path: &str) -> Option<&'a Value> {
    collect(json, path).into_iter().next()
}

/// Whether `path` addresses at least one non-null value.
pub fn exists(json: &Value, path: &str) -> bool {
    lookup(json, path).is_some()
}

/// Non-negative integer at `path`. Integral floats (`12.0`) are accepted.
pub fn lookup_u64(json: &Value, path: &str) -> Option<u64> {
    let value = lookup(json, path)?;
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0)
            .map(|f| f as u64)
    })
}

/// Non-empty string at `path`.
pub fn lookup_str<'a>(json: &'a Value, path: &str) -> Option<&'a str> {
    lookup(json, path)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// First non-empty string found by trying `paths` in order.
pub fn first_str(json: &Value, paths: &[String]) -> Option<String> {
    paths
        .iter()
        .find_map(|p| lookup_str(json, p))
        .map(str::to_string)
}

/// Concatenation of every string addressed by `path`, or `None` if there is none.
///
/// Empty strings count as present so that a `""` delta is distinguishable from
/// a chunk that carries no text at all.
pub fn join_strings(json: &Value, path: &str) -> Option<String> {
    let mut found = false;
    let mut joined = String::new();
    for value in collect(json, path) {
        if let Some(s) = value.as_str() {
            found = true;
            joined.push_str(s);
        }
    }
    found.then_some(joined)
}

/// `join_strings` over the first of `paths` that yields anything.
pub fn first_joined(json: &Value, paths: &[String]) -> Option<String> {
    paths.iter().find_map(|p| join_strings(json, p))
}
