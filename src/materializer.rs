//! Parameter materialization.
//!
//! Substitutes resolved dependency values into a descriptor's params
//! before dispatch. Never mutates `loaded`; pure function of
//! `(original params, loaded)`.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::model::{DepRef, Loaded, Params};

/// The result of attempting to materialize a descriptor's params.
#[derive(Debug, Clone)]
pub enum Materialized {
    /// Every dependency referenced was available; here is the fully
    /// resolved params map.
    Ready(Map<String, Value>),
    /// At least one dependency referenced is not yet in `loaded`; the
    /// source remains non-ready and unscheduled.
    Pending,
}

impl Materialized {
    pub fn is_ready(&self) -> bool {
        matches!(self, Materialized::Ready(_))
    }
}

fn resolve_dep_ref(r: &DepRef, loaded: &Loaded) -> Option<Value> {
    let source_result = loaded.get(&r.source)?;
    let data = source_result.data.as_ref()?;
    r.navigate(data).cloned()
}

/// Materializes every parameter of `params` against `loaded`.
pub fn materialize(params: &Params, loaded: &Loaded) -> Materialized {
    match params {
        Params::Whole(r) => match resolve_dep_ref(r, loaded) {
            Some(Value::Object(map)) => Materialized::Ready(map),
            Some(other) => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                Materialized::Ready(map)
            }
            None => Materialized::Pending,
        },
        Params::Map(m) => {
            let mut out = Map::new();
            for (key, value) in m {
                match value {
                    crate::model::ParamValue::Literal(v) => {
                        out.insert(key.clone(), v.clone());
                    }
                    crate::model::ParamValue::DepRef(r) => match resolve_dep_ref(r, loaded) {
                        Some(v) => {
                            out.insert(key.clone(), v);
                        }
                        None => return Materialized::Pending,
                    },
                }
            }
            Materialized::Ready(out)
        }
    }
}

/// Materializes only the subset of `params` named by `keys` (used by the
/// cache adapter's cache-dep scoping). Literal values outside `keys` that
/// aren't dependency refs are still safe to ignore — the cache key only
/// needs `cache_params`.
pub fn materialize_subset(params: &Params, keys: &HashSet<String>, loaded: &Loaded) -> Materialized {
    match params {
        Params::Whole(r) => materialize(&Params::Whole(r.clone()), loaded),
        Params::Map(m) => {
            let mut out = Map::new();
            for key in keys {
                let Some(value) = m.get(key) else { continue };
                match value {
                    crate::model::ParamValue::Literal(v) => {
                        out.insert(key.clone(), v.clone());
                    }
                    crate::model::ParamValue::DepRef(r) => match resolve_dep_ref(r, loaded) {
                        Some(v) => {
                            out.insert(key.clone(), v);
                        }
                        None => return Materialized::Pending,
                    },
                }
            }
            Materialized::Ready(out)
        }
    }
}

/// Whether every dependency a descriptor's (full) `params` references is
/// present as a *success* in `loaded` — the regular-fetch readiness test.
/// A partial result (a collection/begets parent mid-expansion) doesn't
/// count as satisfied.
pub fn deps_satisfied(deps: &HashSet<crate::model::Path>, loaded: &Loaded) -> bool {
    deps.iter()
        .all(|d| loaded.get(d).is_some_and(|r| r.success && !r.partial))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FetchResult, ParamValue, Path};

    #[test]
    fn whole_params_takes_entire_result() {
        let mut loaded = Loaded::new();
        loaded.insert(Path::new("A"), FetchResult::success(serde_json::json!({"id": 1})));

        let params = Params::Whole(DepRef::to(Path::new("A")));
        match materialize(&params, &loaded) {
            Materialized::Ready(m) => assert_eq!(m.get("id"), Some(&serde_json::json!(1))),
            Materialized::Pending => panic!("expected ready"),
        }
    }

    #[test]
    fn missing_dep_leaves_pending() {
        let loaded = Loaded::new();
        let mut m = std::collections::HashMap::new();
        m.insert("id".to_string(), ParamValue::dep(Path::new("A")));
        let params = Params::Map(m);

        assert!(!materialize(&params, &loaded).is_ready());
    }

    #[test]
    fn nested_sub_path_navigates_data() {
        let mut loaded = Loaded::new();
        loaded.insert(
            Path::new("Auth"),
            FetchResult::success(serde_json::json!({"token": {"access": "abc"}})),
        );
        let mut m = std::collections::HashMap::new();
        m.insert(
            "token".to_string(),
            ParamValue::DepRef(DepRef::into_field(
                Path::new("Auth"),
                vec!["token".to_string(), "access".to_string()],
            )),
        );
        match materialize(&Params::Map(m), &loaded) {
            Materialized::Ready(out) => {
                assert_eq!(out.get("token"), Some(&serde_json::json!("abc")));
            }
            Materialized::Pending => panic!("expected ready"),
        }
    }
}
