//! Collection / begets / `prescriptions` expansion.
//!
//! Pure functions that turn a parent's realized data into child
//! descriptors. The orchestrator inserts the returned `(Path,
//! SourceDescriptor)` pairs into the prescription, sets `partial?` on the
//! parent, and re-resolves so `resolver::augment_collections` folds the
//! children into the parent's `deps`.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::model::{FetchResult, ParamValue, Params, Path, PathSegment, Prescription, SourceDescriptor, SourceId};

/// Spawns children for a `coll_of = template_path` parent from its
/// realized sequence or map data.
pub fn expand_collection(
    parent_path: &Path,
    template_path: &Path,
    data: &Value,
    prescription: &Prescription,
) -> Vec<(Path, SourceDescriptor)> {
    let Some(template) = prescription.get(template_path) else {
        return Vec::new();
    };

    collection_entries(data)
        .into_iter()
        .map(|(segment, item)| {
            let child_path = parent_path.child(segment);
            let mut child = clone_template(template, template_path);
            child.member_of = Some(parent_path.clone());
            child.original_params = Some(template.params.clone());
            child.params = substitute_parent_value(&template.params, parent_path, &item);
            (child_path, child)
        })
        .collect()
}

fn collection_entries(data: &Value) -> Vec<(PathSegment, Value)> {
    match data {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (PathSegment::Index(i), v.clone()))
            .collect(),
        Value::Object(map) => map.iter().map(|(k, v)| (PathSegment::Key(k.clone()), v.clone())).collect(),
        _ => Vec::new(),
    }
}

/// Spawns named children for a `begets = { k -> template_path }` parent.
///
/// If the template's params depend on the parent's own path, substitute
/// the parent's result in place of that dependency; otherwise pass the
/// parent's entire data under the parent's own path key.
pub fn expand_begets(
    parent_path: &Path,
    begets: &HashMap<String, Path>,
    parent_data: &Value,
    prescription: &Prescription,
) -> Vec<(Path, SourceDescriptor)> {
    begets
        .iter()
        .filter_map(|(key, template_path)| {
            let template = prescription.get(template_path)?;
            let child_path = parent_path.child(key.as_str());
            let mut child = clone_template(template, template_path);
            child.member_of = Some(parent_path.clone());
            child.original_params = Some(template.params.clone());
            child.params = if template.params.dep_sources().contains(parent_path) {
                substitute_parent_value(&template.params, parent_path, parent_data)
            } else {
                let mut m = HashMap::new();
                m.insert(parent_path.to_string(), ParamValue::literal(parent_data.clone()));
                Params::Map(m)
            };
            Some((child_path, child))
        })
        .collect()
}

/// Splices a result's `prescriptions` compatibility field in as begets-like
/// children of `parent_path` — the sole code path that ever consumes
/// `prescriptions`, so it never diverges from ordinary expansion.
pub fn splice_prescriptions(parent_path: &Path, result: &FetchResult) -> Vec<(Path, SourceDescriptor)> {
    result
        .prescriptions
        .iter()
        .map(|(path, descriptor)| {
            let mut child = descriptor.clone();
            child.member_of = Some(parent_path.clone());
            (path.clone(), child)
        })
        .collect()
}

/// Replaces any reference to `parent_path` inside `params` with `value`
/// (or a field of it, per the reference's `sub_path`), leaving every other
/// entry untouched.
fn substitute_parent_value(params: &Params, parent_path: &Path, value: &Value) -> Params {
    match params {
        Params::Whole(r) if &r.source == parent_path => match r.navigate(value) {
            Some(Value::Object(map)) => {
                Params::Map(map.iter().map(|(k, v)| (k.clone(), ParamValue::literal(v.clone()))).collect())
            }
            Some(other) => {
                let mut m = HashMap::new();
                m.insert("value".to_string(), ParamValue::literal(other.clone()));
                Params::Map(m)
            }
            None => Params::Map(HashMap::new()),
        },
        Params::Whole(r) => Params::Whole(r.clone()),
        Params::Map(m) => {
            let mut out = HashMap::new();
            for (key, v) in m {
                match v {
                    ParamValue::DepRef(r) if &r.source == parent_path => {
                        let navigated = r.navigate(value).cloned().unwrap_or(Value::Null);
                        out.insert(key.clone(), ParamValue::literal(navigated));
                    }
                    other => {
                        out.insert(key.clone(), other.clone());
                    }
                }
            }
            Params::Map(out)
        }
    }
}

/// Clones a template descriptor's fetch behavior for a freshly spawned
/// child, resetting every resolver-derived field.
fn clone_template(template: &SourceDescriptor, template_path: &Path) -> SourceDescriptor {
    SourceDescriptor {
        id: SourceId::generate(),
        fetch: template.fetch.clone(),
        params: template.params.clone(),
        retries: template.retries,
        retry_delays: template.retry_delays.clone(),
        timeout_ms: template.timeout_ms,
        conform: template.conform.clone(),
        cache_deps: template.cache_deps.clone(),
        cache_params: template.cache_params.clone(),
        coll_of: template.coll_of.clone(),
        begets: template.begets.clone(),
        original_params: None,
        deps: HashSet::new(),
        resolved_cache_deps: HashSet::new(),
        member_of: None,
        template_path: Some(template_path.clone()),
        refreshing: false,
    }
}
