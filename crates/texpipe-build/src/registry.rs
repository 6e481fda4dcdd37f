//! The builder/runner factory.
//!
//! Descriptors name an `implementation`; the registry maps those names to
//! constructor functions. Entries whose implementation is unknown, whose
//! runner is missing, or whose chain could loop back on itself are logged and
//! left out.

use crate::builder::{Builder, ChainBuilder, TexBuilder};
use crate::context::Toolbox;
use crate::descriptor::{BuilderDescription, Catalog, RunnerDescription};
use crate::error::BuildError;
use crate::parsers::{biber, bibtex, dvips, ghostscript, latex, makeindex};
use crate::prefs::keys;
use crate::runner::{ExternalRunner, ProgramRunner};
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub type RunnerConstructor = fn(RunnerDescription) -> Arc<dyn ProgramRunner>;
pub type BuilderConstructor = fn(BuilderDescription) -> Box<dyn Builder>;

/// Implementation id of builders that put a sub-builder in front of their runner.
pub const CHAIN_IMPLEMENTATION: &str = "chain";

fn latex_runner(desc: RunnerDescription) -> Arc<dyn ProgramRunner> {
    Arc::new(ExternalRunner::new(desc, latex::parse_latex))
}

fn bibtex_runner(desc: RunnerDescription) -> Arc<dyn ProgramRunner> {
    // Exit code 1 means warnings only.
    Arc::new(ExternalRunner::new(desc, bibtex::parse_bibtex).tolerating(&[1]))
}

fn biber_runner(desc: RunnerDescription) -> Arc<dyn ProgramRunner> {
    Arc::new(ExternalRunner::new(desc, biber::parse_biber))
}

fn makeindex_runner(desc: RunnerDescription) -> Arc<dyn ProgramRunner> {
    Arc::new(ExternalRunner::new(desc, makeindex::parse_makeindex))
}

fn dvips_runner(desc: RunnerDescription) -> Arc<dyn ProgramRunner> {
    Arc::new(ExternalRunner::new(desc, dvips::parse_dvips))
}

fn ghostscript_runner(desc: RunnerDescription) -> Arc<dyn ProgramRunner> {
    Arc::new(ExternalRunner::new(desc, ghostscript::parse_ghostscript))
}

fn tex_builder(desc: BuilderDescription) -> Box<dyn Builder> {
    Box::new(TexBuilder::new(desc))
}

fn chain_builder(desc: BuilderDescription) -> Box<dyn Builder> {
    Box::new(ChainBuilder::new(desc))
}

pub fn standard_runners() -> HashMap<String, RunnerConstructor> {
    let table: [(&str, RunnerConstructor); 6] = [
        ("latex", latex_runner),
        ("bibtex", bibtex_runner),
        ("biber", biber_runner),
        ("makeindex", makeindex_runner),
        ("dvips", dvips_runner),
        ("ghostscript", ghostscript_runner),
    ];
    table.into_iter().map(|(id, f)| (id.to_string(), f)).collect()
}

pub fn standard_builders() -> HashMap<String, BuilderConstructor> {
    let table: [(&str, BuilderConstructor); 2] =
        [("tex", tex_builder), (CHAIN_IMPLEMENTATION, chain_builder)];
    table.into_iter().map(|(id, f)| (id.to_string(), f)).collect()
}

pub struct Registry {
    runners: Vec<RunnerDescription>,
    builders: Vec<BuilderDescription>,
    runner_impls: HashMap<String, RunnerConstructor>,
    builder_impls: HashMap<String, BuilderConstructor>,
}

impl Registry {
    pub fn new(catalog: Catalog) -> Self {
        Self::with_implementations(catalog, standard_runners(), standard_builders())
    }

    /// The bundled catalogue with the standard implementations.
    pub fn standard() -> Result<Self, BuildError> {
        Ok(Self::new(Catalog::bundled()?))
    }

    pub fn with_implementations(
        catalog: Catalog,
        runner_impls: HashMap<String, RunnerConstructor>,
        builder_impls: HashMap<String, BuilderConstructor>,
    ) -> Self {
        let (runners, builders) = catalog.into_parts();

        let runners: Vec<RunnerDescription> = runners
            .into_iter()
            .filter(|r| {
                let known = runner_impls.contains_key(&r.implementation);
                if !known {
                    warn!(
                        "Runner `{}`: unknown implementation `{}`",
                        r.id, r.implementation
                    );
                }
                known
            })
            .collect();

        let mut builders: Vec<BuilderDescription> = builders
            .into_iter()
            .filter(|b| {
                if !builder_impls.contains_key(&b.implementation) {
                    warn!(
                        "Builder `{}`: unknown implementation `{}`",
                        b.id, b.implementation
                    );
                    false
                } else if !runners.iter().any(|r| r.id == b.runner) {
                    warn!("Builder `{}`: unknown runner `{}`", b.id, b.runner);
                    false
                } else {
                    true
                }
            })
            .collect();

        let cyclic = chain_cycles(&builders, &runners);
        builders.retain(|b| {
            if cyclic.contains(&b.id) {
                warn!("Builder `{}`: chain resolves back onto itself", b.id);
            }
            !cyclic.contains(&b.id)
        });

        Self {
            runners,
            builders,
            runner_impls,
            builder_impls,
        }
    }

    pub fn runners(&self) -> &[RunnerDescription] {
        &self.runners
    }

    pub fn builders(&self) -> &[BuilderDescription] {
        &self.builders
    }

    pub fn runner_description(&self, id: &str) -> Option<&RunnerDescription> {
        self.runners.iter().find(|r| r.id == id)
    }

    pub fn builder_description(&self, id: &str) -> Option<&BuilderDescription> {
        self.builders.iter().find(|b| b.id == id)
    }

    /// Builders producing `format`, in catalogue order.
    pub fn builders_for_output(&self, format: &str) -> Vec<&BuilderDescription> {
        self.builders
            .iter()
            .filter(|b| b.output_format == format)
            .collect()
    }

    pub fn create_runner(&self, id: &str) -> Result<Arc<dyn ProgramRunner>, BuildError> {
        let desc = self
            .runner_description(id)
            .ok_or_else(|| BuildError::Configuration(format!("unknown runner `{}`", id)))?;
        let construct = self.runner_impls.get(&desc.implementation).ok_or_else(|| {
            BuildError::Configuration(format!("unknown implementation `{}`", desc.implementation))
        })?;
        Ok(construct(desc.clone()))
    }

    pub fn create_builder(&self, id: &str) -> Result<Box<dyn Builder>, BuildError> {
        let desc = self
            .builder_description(id)
            .ok_or_else(|| BuildError::Configuration(format!("unknown builder `{}`", id)))?;
        let construct = self.builder_impls.get(&desc.implementation).ok_or_else(|| {
            BuildError::Configuration(format!("unknown implementation `{}`", desc.implementation))
        })?;
        Ok(construct(desc.clone()))
    }

    /// The first valid builder producing `format`.
    ///
    /// `preferred`, or else the `builder.<format>` preference, is tried
    /// before the others. When nothing validates, the first candidate's
    /// error is returned.
    pub fn resolve(
        &self,
        format: &str,
        preferred: Option<&str>,
        tools: &Toolbox,
    ) -> Result<Box<dyn Builder>, BuildError> {
        let mut candidates = self.builders_for_output(format);
        let preferred = preferred
            .map(str::to_string)
            .or_else(|| tools.prefs.get_non_empty(&keys::preferred_builder(format)));
        if let Some(id) = preferred {
            match candidates.iter().position(|b| b.id == id) {
                Some(pos) => {
                    let chosen = candidates.remove(pos);
                    candidates.insert(0, chosen);
                }
                None => warn!("Preferred builder `{}` does not produce `{}`", id, format),
            }
        }

        let mut first_error = None;
        for desc in candidates {
            let mut builder = self.create_builder(&desc.id)?;
            match builder.validate(tools) {
                Ok(()) => {
                    debug!("Resolved `{}` to builder `{}`", format, desc.id);
                    return Ok(builder);
                }
                Err(e) => {
                    debug!("Builder `{}` unavailable: {}", desc.id, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        Err(first_error.unwrap_or_else(|| BuildError::NoBuilder {
            format: format.to_string(),
        }))
    }
}

/// Ids of chain builders that can reach themselves through sub-builder
/// resolution. A chain builder depends on every builder producing its
/// runner's input format.
fn chain_cycles(builders: &[BuilderDescription], runners: &[RunnerDescription]) -> HashSet<String> {
    let mut adj: HashMap<&str, Vec<&str>> = HashMap::new();
    for builder in builders {
        if builder.implementation != CHAIN_IMPLEMENTATION {
            continue;
        }
        let Some(runner) = runners.iter().find(|r| r.id == builder.runner) else {
            continue;
        };
        let next = builders
            .iter()
            .filter(|b| b.output_format == runner.input_format)
            .map(|b| b.id.as_str())
            .collect();
        adj.insert(builder.id.as_str(), next);
    }

    // 0 = unvisited, 1 = on the stack, 2 = done
    fn visit<'a>(
        current: &'a str,
        adj: &HashMap<&'a str, Vec<&'a str>>,
        state: &mut HashMap<&'a str, u8>,
        stack: &mut Vec<&'a str>,
        cyclic: &mut HashSet<String>,
    ) {
        match state.get(current) {
            Some(1) => {
                // Back edge: everything from `current` up the stack loops.
                if let Some(start) = stack.iter().position(|id| *id == current) {
                    cyclic.extend(stack[start..].iter().map(|id| id.to_string()));
                }
                return;
            }
            Some(2) => return,
            _ => {}
        }
        state.insert(current, 1);
        stack.push(current);
        if let Some(neighbors) = adj.get(current) {
            for neighbor in neighbors {
                visit(neighbor, adj, state, stack, cyclic);
            }
        }
        stack.pop();
        state.insert(current, 2);
    }

    let mut state = HashMap::new();
    let mut stack = Vec::new();
    let mut cyclic = HashSet::new();
    for builder in builders {
        visit(&builder.id, &adj, &mut state, &mut stack, &mut cyclic);
    }
    cyclic
}

#[cfg(test)]
mod tests;
