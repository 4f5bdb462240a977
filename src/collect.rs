//! Output consumers: draining an event stream into a
//! summary, and the standalone deep-merge used to build its `data`.

use std::collections::HashMap;

use futures::{Stream, StreamExt};
use serde_json::{Map, Value};

use crate::model::{Event, Path, PathSegment};

/// The result of draining an event stream to completion.
#[derive(Debug, Clone)]
pub struct Summary {
    /// Conjunction of `result.success?` across every terminalized path.
    pub success: bool,
    /// Deep-merged data, see [`merge_results`].
    pub data: Map<String, Value>,
    /// Every event observed, in arrival order.
    pub sources: Vec<Event>,
}

/// Drains `stream` to completion, recording every event and computing the
/// overall [`Summary`].
pub async fn collect<S>(mut stream: S) -> Summary
where
    S: Stream<Item = Event> + Unpin,
{
    let mut sources = Vec::new();
    let mut terminal_success: HashMap<Path, bool> = HashMap::new();

    while let Some(event) = stream.next().await {
        if !event.result.retrying {
            terminal_success.insert(event.path.clone(), event.result.success);
        }
        sources.push(event);
    }

    let success = terminal_success.values().all(|success| *success);
    let data = merge_results(&sources);
    Summary { success, data, sources }
}

/// Deep-merges every successful event's `data` into a combined tree,
/// ordered by ascending path length so parents are written before
/// children — a child's write at the same location wins, covering
/// retry/refresh history where a path realizes more than once.
pub fn merge_results(events: &[Event]) -> Map<String, Value> {
    let mut ordered: Vec<&Event> = events.iter().filter(|e| e.result.success).collect();
    ordered.sort_by_key(|e| e.path.len());

    let mut root = Value::Object(Map::new());
    for event in ordered {
        if let Some(data) = &event.result.data {
            insert_path(&mut root, event.path.segments(), data.clone());
        }
    }

    match root {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn insert_path(root: &mut Value, segments: &[PathSegment], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        set_leaf(root, head, value);
        return;
    }
    let child = ensure_child(root, head, &rest[0]);
    insert_path(child, rest, value);
}

fn set_leaf(container: &mut Value, segment: &PathSegment, value: Value) {
    match segment {
        PathSegment::Key(key) => {
            if !container.is_object() {
                *container = Value::Object(Map::new());
            }
            container.as_object_mut().expect("just coerced to object").insert(key.clone(), value);
        }
        PathSegment::Index(i) => {
            if !container.is_array() {
                *container = Value::Array(Vec::new());
            }
            let arr = container.as_array_mut().expect("just coerced to array");
            if arr.len() <= *i {
                arr.resize(*i + 1, Value::Null);
            }
            arr[*i] = value;
        }
    }
}

fn ensure_child<'a>(container: &'a mut Value, segment: &PathSegment, next: &PathSegment) -> &'a mut Value {
    let empty = || if matches!(next, PathSegment::Index(_)) { Value::Array(Vec::new()) } else { Value::Object(Map::new()) };

    match segment {
        PathSegment::Key(key) => {
            if !container.is_object() {
                *container = Value::Object(Map::new());
            }
            container.as_object_mut().expect("just coerced to object").entry(key.clone()).or_insert_with(empty)
        }
        PathSegment::Index(i) => {
            if !container.is_array() {
                *container = Value::Array(Vec::new());
            }
            let arr = container.as_array_mut().expect("just coerced to array");
            if arr.len() <= *i {
                arr.resize_with(*i + 1, || Value::Null);
            }
            if arr[*i].is_null() {
                arr[*i] = empty();
            }
            &mut arr[*i]
        }
    }
}
