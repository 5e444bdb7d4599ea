//! Cross-reference resolution against a known key set.

use std::collections::HashSet;

use tracing::warn;

/// Resolves raw identifiers from a feed against the set of keys known to
/// the target schema, applying a static typo-correction table first.
///
/// Source registers carry hand-typed identifiers (a merger record naming a
/// predecessor charity, a postcode row naming a geography code) and some of
/// them are simply wrong in the published data. The correction table maps
/// the known-bad spellings; anything still unknown after correction is
/// logged once per run and resolves to nothing, never failing the run.
pub struct ReferenceResolver {
    name: &'static str,
    corrections: &'static [(&'static str, &'static str)],
    missed: HashSet<String>,
}

impl ReferenceResolver {
    pub fn new(
        name: &'static str,
        corrections: &'static [(&'static str, &'static str)],
    ) -> Self {
        Self {
            name,
            corrections,
            missed: HashSet::new(),
        }
    }

    /// Resolve one raw identifier against the run's known-key set.
    pub fn resolve(&mut self, known: &HashSet<String>, raw: &str) -> Option<String> {
        let corrected = self
            .corrections
            .iter()
            .find(|(from, _)| *from == raw)
            .map(|(_, to)| *to)
            .unwrap_or(raw);
        if known.contains(corrected) {
            return Some(corrected.to_string());
        }
        if self.missed.insert(corrected.to_string()) {
            warn!(
                reference = self.name,
                value = corrected,
                "unresolved reference, keeping null"
            );
        }
        None
    }

    /// Distinct identifiers that failed to resolve so far this run.
    pub fn misses(&self) -> usize {
        self.missed.len()
    }
}
