// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Phases: named pairings of sources and targets run as one unit.

use crate::adapter::{Source, Target};
use crate::error::{EngineError, Result};
use std::fmt;
use std::sync::Arc;

/// One unit of pipeline configuration, executed atomically.
///
/// Immutable once built. Source and target order is kept.
#[derive(Clone)]
pub struct Phase {
    name: String,
    sources: Vec<Arc<dyn Source>>,
    targets: Vec<Arc<dyn Target>>,
}

impl Phase {
    pub fn new(
        name: impl Into<String>,
        sources: Vec<Arc<dyn Source>>,
        targets: Vec<Arc<dyn Target>>,
    ) -> Self {
        Self {
            name: name.into(),
            sources,
            targets,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sources(&self) -> &[Arc<dyn Source>] {
        &self.sources
    }

    pub fn targets(&self) -> &[Arc<dyn Target>] {
        &self.targets
    }

    /// Ids of every source, in configured order.
    pub fn source_ids(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.id().to_string()).collect()
    }
}

impl fmt::Debug for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Phase")
            .field("name", &self.name)
            .field("sources", &self.source_ids())
            .field(
                "targets",
                &self.targets.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Keep only the phases named in `filter`, in configured order.
///
/// Every name in `filter` must match a configured phase.
pub fn select_phases<'a>(phases: &'a [Phase], filter: Option<&[String]>) -> Result<Vec<&'a Phase>> {
    let Some(names) = filter else {
        return Ok(phases.iter().collect());
    };

    for name in names {
        if !phases.iter().any(|p| p.name() == name) {
            return Err(EngineError::Config(format!("unknown phase {:?}", name)));
        }
    }

    Ok(phases
        .iter()
        .filter(|p| names.iter().any(|n| n == p.name()))
        .collect())
}
