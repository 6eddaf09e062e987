//! Structural change detection for drawing payloads.
//!
//! Raw hash comparison produces false positives: the host canvas bumps version
//! counters and render seeds on every frame, so every snapshot would look
//! "modified" even with no user edit. The detector computes a path-qualified
//! structural diff and discards operations whose final path segment is in a
//! fixed ignore-list, reporting a change only when a meaningful operation
//! remains.

use serde_json::Value;

/// Payload fields that mutate without semantic effect: monotonic version
/// counters and per-render nonces of the host canvas format.
pub const IGNORED_FIELDS: &[&str] = &["version", "versionNonce", "updated", "seed"];

/// A single structural difference between two payload snapshots.
///
/// Paths are slash-separated, with array indices as numeric segments
/// (e.g. `elements/3/strokeColor`).
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeOp {
    /// A value present in the next snapshot but not the previous one
    Added {
        /// Path to the added value
        path: String,
        /// The added value
        value: Value,
    },
    /// A value present in the previous snapshot but not the next one
    Removed {
        /// Path to the removed value
        path: String,
        /// The removed value
        value: Value,
    },
    /// A value present in both snapshots with different content
    Replaced {
        /// Path to the changed value
        path: String,
        /// Value in the previous snapshot
        from: Value,
        /// Value in the next snapshot
        to: Value,
    },
}

impl ChangeOp {
    /// Get the path this operation affects
    pub fn path(&self) -> &str {
        match self {
            ChangeOp::Added { path, .. } => path,
            ChangeOp::Removed { path, .. } => path,
            ChangeOp::Replaced { path, .. } => path,
        }
    }

    /// Whether this operation only touches an ignore-listed field
    pub fn is_ignored(&self) -> bool {
        let last = self.path().rsplit('/').next().unwrap_or_default();
        IGNORED_FIELDS.contains(&last)
    }
}

/// Compute the full structural diff between two payload snapshots.
pub fn diff_ops(previous: &Value, next: &Value) -> Vec<ChangeOp> {
    let mut ops = Vec::new();
    walk("", previous, next, &mut ops);
    ops
}

/// Compute the structural diff with ignore-listed operations filtered out.
pub fn significant_ops(previous: &Value, next: &Value) -> Vec<ChangeOp> {
    diff_ops(previous, next)
        .into_iter()
        .filter(|op| !op.is_ignored())
        .collect()
}

/// Whether the payload changed in any way that matters.
pub fn has_changed(previous: &Value, next: &Value) -> bool {
    !significant_ops(previous, next).is_empty()
}

/// Change detection over raw JSON text.
///
/// Unreadable payloads are treated as changed so data is never silently
/// dropped on a parse failure.
pub fn has_changed_raw(previous: &str, next: &str) -> bool {
    match (
        serde_json::from_str::<Value>(previous),
        serde_json::from_str::<Value>(next),
    ) {
        (Ok(prev), Ok(next)) => has_changed(&prev, &next),
        _ => {
            log::warn!("could not parse payload snapshot, treating as changed");
            true
        }
    }
}

fn join(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{}/{}", path, segment)
    }
}

fn walk(path: &str, previous: &Value, next: &Value, ops: &mut Vec<ChangeOp>) {
    match (previous, next) {
        (Value::Object(prev), Value::Object(new)) => {
            for (key, prev_value) in prev {
                let child = join(path, key);
                match new.get(key) {
                    Some(new_value) => walk(&child, prev_value, new_value, ops),
                    None => ops.push(ChangeOp::Removed {
                        path: child,
                        value: prev_value.clone(),
                    }),
                }
            }
            for (key, new_value) in new {
                if !prev.contains_key(key) {
                    ops.push(ChangeOp::Added {
                        path: join(path, key),
                        value: new_value.clone(),
                    });
                }
            }
        }
        (Value::Array(prev), Value::Array(new)) => {
            let shared = prev.len().min(new.len());
            for (idx, (prev_value, new_value)) in
                prev.iter().zip(new.iter()).take(shared).enumerate()
            {
                walk(&join(path, &idx.to_string()), prev_value, new_value, ops);
            }
            for (idx, prev_value) in prev.iter().enumerate().skip(shared) {
                ops.push(ChangeOp::Removed {
                    path: join(path, &idx.to_string()),
                    value: prev_value.clone(),
                });
            }
            for (idx, new_value) in new.iter().enumerate().skip(shared) {
                ops.push(ChangeOp::Added {
                    path: join(path, &idx.to_string()),
                    value: new_value.clone(),
                });
            }
        }
        _ => {
            if previous != next {
                ops.push(ChangeOp::Replaced {
                    path: path.to_string(),
                    from: previous.clone(),
                    to: next.clone(),
                });
            }
        }
    }
}
