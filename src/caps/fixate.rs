//! Fixation: choosing one concrete format out of a caps intersection.
//!
//! The tie-break policy is a [`FixationStrategy`] so that pipelines can swap
//! it and tests can pin it down.

use std::fmt;

use super::{Caps, FieldValue, Structure, Value};

/// Extra information available when a link is fixated.
#[derive(Clone, Copy, Debug, Default)]
pub struct FixationHints<'a> {
    /// Caps already negotiated elsewhere on the two elements being linked,
    /// e.g. the rate an upstream link has settled on.
    pub graph: Option<&'a Caps>,
    /// The consumer's preferred format.
    pub ideal: Option<&'a Caps>,
}

/// Reduces caps to a single fixed structure.
pub trait FixationStrategy: Send + Sync + fmt::Debug {
    /// Fixate `caps`. Returns `None` when `caps` is empty.
    ///
    /// ANY caps are returned unchanged: an unformatted stream needs no
    /// fixation.
    fn fixate(&self, caps: &Caps, hints: &FixationHints<'_>) -> Option<Caps>;
}

/// Ignores hints: range minimum, first list entry, first structure.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultFixation;

impl FixationStrategy for DefaultFixation {
    fn fixate(&self, caps: &Caps, _hints: &FixationHints<'_>) -> Option<Caps> {
        if caps.is_any() {
            return Some(caps.clone());
        }
        let first = caps.structure(0)?;
        fixate_structure(first, |_, value| value.default_value())
    }
}

/// The default policy.
///
/// For each unfixed field of the first structure, in declaration order:
/// 1. a value already negotiated in the graph, if the field accepts it;
/// 2. otherwise the accepted value nearest to the consumer's ideal;
/// 3. otherwise the template default (range minimum, first list entry).
#[derive(Clone, Copy, Debug, Default)]
pub struct PreferredFixation;

impl FixationStrategy for PreferredFixation {
    fn fixate(&self, caps: &Caps, hints: &FixationHints<'_>) -> Option<Caps> {
        if caps.is_any() {
            return Some(caps.clone());
        }
        let first = caps.structure(0)?;
        fixate_structure(first, |field, value| {
            let from_graph = hints
                .graph
                .and_then(|g| hinted_value(g, first.name(), field))
                .filter(|v| value.accepts(v));
            if from_graph.is_some() {
                return from_graph;
            }
            hints
                .ideal
                .and_then(|ideal| hinted_value(ideal, first.name(), field))
                .and_then(|v| value.nearest(&v))
                .or_else(|| value.default_value())
        })
    }
}

/// The first value a hint caps offers for `field` in a structure named `name`.
fn hinted_value(hint: &Caps, name: &str, field: &str) -> Option<Value> {
    hint.structures()
        .filter(|s| s.name() == name)
        .find_map(|s| s.get(field).and_then(FieldValue::default_value))
}

fn fixate_structure(
    structure: &Structure,
    mut choose: impl FnMut(&str, &FieldValue) -> Option<Value>,
) -> Option<Caps> {
    let mut fixed = Structure::new(structure.name());
    for (name, value) in structure.fields() {
        let chosen = match value {
            FieldValue::Fixed(v) => v.clone(),
            other => choose(name, other)?,
        };
        fixed.set(name, chosen);
    }
    Some(Caps::new(fixed))
}
