//! Driver: seeds, pass chaining, deallocation tracking and optional slicing.

use crate::config::{SliceDirection, SlicerConfig};
use crate::errors::Diagnostic;
use crate::instrument::track_deallocations;
use crate::mark::{touches_secret, MarkContext, Pass, WalkAndMark};
use crate::report::Report;
use crate::slicer::{ModuleRemoval, Slicer};
use cloak_ir::{Direction, EdgeKind, NodeId, ProgramBundle, SliceId};
use indexmap::IndexSet;
use std::str::FromStr;
use tracing::info;

/// What the slice is computed with respect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Criterion {
    /// Everything secret-annotated globals flow into.
    Secret,
    /// The entry function's exit.
    Ret,
    /// Every call to the named function, plus the configured assumption intrinsics.
    Call(String),
    Nodes(Vec<NodeId>),
}

impl Criterion {
    pub fn direction(&self) -> SliceDirection {
        match self {
            Criterion::Secret => SliceDirection::Forward,
            _ => SliceDirection::Backward,
        }
    }
}

impl FromStr for Criterion {
    type Err = Diagnostic;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Err(Diagnostic::usage("empty slicing criterion")),
            "secret" => Ok(Criterion::Secret),
            "ret" => Ok(Criterion::Ret),
            other => {
                let name = other.strip_prefix("call:").unwrap_or(other);
                if name.is_empty() {
                    return Err(Diagnostic::usage("call criterion without a function name"));
                }
                Ok(Criterion::Call(name.to_string()))
            }
        }
    }
}

/// Seed nodes for `criterion`, in discovery order without duplicates.
pub fn seeds(bundle: &ProgramBundle, config: &SlicerConfig, criterion: &Criterion) -> Vec<NodeId> {
    let graph = &bundle.graph;
    let mut found = IndexSet::new();

    match criterion {
        Criterion::Secret => {
            for node in graph.nodes.values() {
                let Some(inst) = node.inst().and_then(|i| bundle.module.insts.get(&i)) else {
                    continue;
                };
                let secret = inst
                    .accessed_address()
                    .map_or(false, |address| touches_secret(&bundle.module, &bundle.points_to, config, address));
                if !secret {
                    continue;
                }
                for kind in [EdgeKind::Data, EdgeKind::Use] {
                    found.extend(node.edges(kind, Direction::Forward).iter().copied());
                }
            }
        }
        Criterion::Ret => {
            let exit = graph
                .entry_graph
                .and_then(|g| graph.graphs.get(&g))
                .and_then(|g| g.exit);
            found.extend(exit);
        }
        Criterion::Call(name) => {
            let names: Vec<&str> = std::iter::once(name.as_str())
                .chain(config.assume_intrinsics.iter().map(String::as_str))
                .collect();
            for node in graph.nodes.values() {
                let Some(inst) = node.inst() else {
                    continue;
                };
                let hit = bundle
                    .module
                    .callee_name(inst)
                    .map_or(false, |callee| names.contains(&callee));
                if hit {
                    found.insert(node.id);
                }
            }
        }
        Criterion::Nodes(nodes) => {
            found.extend(nodes.iter().copied().filter(|n| graph.nodes.contains_key(n)));
        }
    }

    found.into_iter().collect()
}

/// Harden `bundle` against secret-dependent cache behaviour.
///
/// Runs discovery, the loop pre-pass and access instrumentation from every secret seed, then
/// unregisters freed heap buffers. The module is rewritten in place.
pub fn instrument(bundle: &mut ProgramBundle, config: &SlicerConfig) -> Report {
    let mut report = Report::default();
    let seeds = seeds(bundle, config, &Criterion::Secret);
    report.seeds = seeds.clone();
    if seeds.is_empty() {
        report.push_diagnostic(Diagnostic::usage(format!(
            "no access to a global annotated `{}`",
            config.secret_annotation
        )));
        return report;
    }

    let slice = SliceId::first();
    report.slice = Some(slice);
    let walker = WalkAndMark::new(config.direction.unwrap_or(SliceDirection::Forward));

    let ProgramBundle {
        module,
        graph,
        points_to,
    } = bundle;
    let mut cx = MarkContext {
        module,
        graph,
        oracle: points_to,
        config,
        report: &mut report,
    };

    let mut buffers = 0;
    for pass in Pass::ALL {
        buffers = walker.mark(&mut cx, &seeds, slice, pass, buffers);
    }
    let released = track_deallocations(&mut cx);

    report.next_buffer_id = buffers;
    info!(
        transactions = report.transactions.len(),
        preloads = report.preloads.len(),
        buffers,
        released,
        "instrumentation finished"
    );
    report
}

/// Mark what `criterion` depends on (or what depends on it) and, unless `mark_only`, delete
/// everything else from the graph and the module.
pub fn slice(
    bundle: &mut ProgramBundle,
    config: &SlicerConfig,
    criterion: &Criterion,
    mark_only: bool,
) -> Report {
    let mut report = Report::default();
    let seeds = seeds(bundle, config, criterion);
    report.seeds = seeds.clone();
    if seeds.is_empty() {
        report.push_diagnostic(Diagnostic::usage(format!(
            "no node matches the criterion {criterion:?}"
        )));
        return report;
    }

    let slice = SliceId::first();
    report.slice = Some(slice);
    let walker = WalkAndMark::new(config.direction.unwrap_or_else(|| criterion.direction()));
    {
        let ProgramBundle {
            module,
            graph,
            points_to,
        } = &mut *bundle;
        let mut cx = MarkContext {
            module,
            graph,
            oracle: points_to,
            config,
            report: &mut report,
        };
        walker.mark(&mut cx, &seeds, slice, Pass::Discover, 0);
    }

    if mark_only {
        return report;
    }
    let Some(root) = bundle.graph.entry_graph else {
        report.push_diagnostic(Diagnostic::usage("program has no entry function"));
        return report;
    };
    let mut slicer = Slicer::new(ModuleRemoval::new(&mut bundle.module));
    report.statistics = Some(slicer.slice(&mut bundle.graph, root, slice));
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_criteria() {
        assert_eq!("secret".parse::<Criterion>().unwrap(), Criterion::Secret);
        assert_eq!("ret".parse::<Criterion>().unwrap(), Criterion::Ret);
        assert_eq!(
            "call:klee_assume".parse::<Criterion>().unwrap(),
            Criterion::Call("klee_assume".to_string())
        );
        assert_eq!(
            "check".parse::<Criterion>().unwrap(),
            Criterion::Call("check".to_string())
        );
        assert!("".parse::<Criterion>().is_err());
        assert!("call:".parse::<Criterion>().is_err());
    }

    #[test]
    fn test_directions() {
        assert_eq!(Criterion::Secret.direction(), SliceDirection::Forward);
        assert_eq!(Criterion::Ret.direction(), SliceDirection::Backward);
    }

    #[test]
    fn test_empty_seed_set_is_a_usage_error() {
        let mut bundle = ProgramBundle::default();
        let report = instrument(&mut bundle, &SlicerConfig::default());
        assert!(report.slice.is_none());
        assert!(matches!(
            report.diagnostics.as_slice(),
            [Diagnostic::UsageError { .. }]
        ));
    }
}
