//! Dependency resolution.
//!
//! Populates each targeted descriptor's `deps` (and, separately,
//! `resolved_cache_deps`) by walking its `params`. Missing dependencies are
//! not an error in `resolve_deps`/`resolve_cache_deps` themselves — they
//! may be satisfied by `initial_params` and are simply never dispatched
//! if they aren't. [`validate_prescription`] is the one place a truly
//! missing dependency (neither the prescription nor `initial_params`) is
//! flagged, offline and ahead of a `select` call.

use std::collections::{HashSet, VecDeque};

use petgraph::algo::kosaraju_scc;
use petgraph::graph::DiGraph;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::model::{DepRef, Params, Path, Prescription};

/// Resolves `deps` for every path reachable from `focus` (or every path in
/// the prescription if `focus` is `None`).
pub fn resolve_deps(prescription: &mut Prescription, focus: Option<&[Path]>) -> Result<()> {
    resolve_generic(prescription, focus, |d| &d.params, |d, deps| d.deps = deps)?;
    augment_collections(prescription);
    Ok(())
}

/// The cache-dependency analogue of [`resolve_deps`]: walks only the
/// parameter keys named in each descriptor's `cache_deps`.
pub fn resolve_cache_deps(prescription: &mut Prescription, focus: Option<&[Path]>) -> Result<()> {
    let targets = initial_targets(prescription, focus);
    for path in targets {
        let Some(descriptor) = prescription.get(&path) else {
            continue;
        };
        let Some(keys) = descriptor.cache_deps.clone() else {
            continue;
        };
        let deps = match &descriptor.params {
            Params::Whole(r) => {
                if keys.is_empty() {
                    HashSet::new()
                } else {
                    validate_dep_ref(r, &path)?;
                    HashSet::from([r.source.clone()])
                }
            }
            Params::Map(m) => {
                let mut deps = HashSet::new();
                for key in &keys {
                    if let Some(crate::model::ParamValue::DepRef(r)) = m.get(key) {
                        validate_dep_ref(r, &path)?;
                        deps.insert(r.source.clone());
                    }
                }
                deps
            }
        };
        if let Some(descriptor) = prescription.get_mut(&path) {
            descriptor.resolved_cache_deps = deps;
        }
    }
    Ok(())
}

fn validate_dep_ref(r: &DepRef, owner: &Path) -> Result<()> {
    if r.source.is_empty() {
        return Err(Error::MalformedDepRef(owner.clone()));
    }
    Ok(())
}

fn initial_targets(prescription: &Prescription, focus: Option<&[Path]>) -> Vec<Path> {
    match focus {
        Some(paths) => paths.to_vec(),
        None => prescription.keys().cloned().collect(),
    }
}

fn resolve_generic(
    prescription: &mut Prescription,
    focus: Option<&[Path]>,
    params_of: impl Fn(&crate::model::SourceDescriptor) -> &Params,
    mut set_deps: impl FnMut(&mut crate::model::SourceDescriptor, HashSet<Path>),
) -> Result<()> {
    let mut queue: VecDeque<Path> = initial_targets(prescription, focus).into_iter().collect();
    let mut seen: HashSet<Path> = HashSet::new();

    while let Some(path) = queue.pop_front() {
        if !seen.insert(path.clone()) {
            continue;
        }
        let Some(descriptor) = prescription.get(&path) else {
            continue;
        };
        let params = params_of(descriptor);
        let mut deps = HashSet::new();
        match params {
            Params::Whole(r) => {
                validate_dep_ref(r, &path)?;
                deps.insert(r.source.clone());
            }
            Params::Map(m) => {
                for value in m.values() {
                    if let Some(r) = value.as_dep_ref() {
                        validate_dep_ref(r, &path)?;
                        deps.insert(r.source.clone());
                    }
                }
            }
        }

        for dep in &deps {
            if prescription.contains_key(dep) && !seen.contains(dep) {
                queue.push_back(dep.clone());
            }
        }

        if let Some(descriptor) = prescription.get_mut(&path) {
            set_deps(descriptor, deps);
        }
    }

    Ok(())
}

/// Second pass: makes every collection/begets parent a join point over its
/// known children by folding their paths into its `deps`.
fn augment_collections(prescription: &mut Prescription) {
    let mut children_by_parent: HashMap<Path, Vec<Path>> = HashMap::new();
    for (path, descriptor) in prescription.iter() {
        if let Some(parent) = &descriptor.member_of {
            children_by_parent
                .entry(parent.clone())
                .or_default()
                .push(path.clone());
        }
    }

    for (parent, children) in children_by_parent {
        if let Some(descriptor) = prescription.get_mut(&parent) {
            for child in children {
                descriptor.deps.insert(child);
            }
        }
    }
}

/// Offline cycle/shadowing/missing-dep validation. Never run by the live
/// engine — a cyclic prescription simply never makes forward progress
/// there, and its sources terminate with stub failures instead.
pub fn validate_prescription(
    prescription: &Prescription,
    initial_params: &crate::model::Loaded,
) -> Result<()> {
    for path in initial_params.keys() {
        if prescription.contains_key(path) {
            return Err(Error::SourceShadowing(path.clone()));
        }
    }

    let mut graph = DiGraph::<Path, ()>::new();
    let mut indices = HashMap::new();
    for path in prescription.keys() {
        let idx = graph.add_node(path.clone());
        indices.insert(path.clone(), idx);
    }

    for (path, descriptor) in prescription.iter() {
        let deps = descriptor.params.dep_sources();
        let Some(&from_idx) = indices.get(path) else {
            continue;
        };
        for dep in deps {
            if let Some(&to_idx) = indices.get(&dep) {
                graph.add_edge(from_idx, to_idx, ());
            } else if !initial_params.contains_key(&dep) {
                return Err(Error::MissingDep(dep));
            }
        }
    }

    for component in kosaraju_scc(&graph) {
        if component.len() > 1 {
            let cycle_paths: Vec<Path> = component.into_iter().map(|idx| graph[idx].clone()).collect();
            return Err(Error::CyclicDependency(cycle_paths));
        }
        // A single-node component with a self-loop is also a cycle.
        let idx = component[0];
        if graph.find_edge(idx, idx).is_some() {
            return Err(Error::CyclicDependency(vec![graph[idx].clone()]));
        }
    }

    Ok(())
}
