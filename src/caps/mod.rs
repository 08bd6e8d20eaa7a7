//! Capabilities: the set of formats a pad can produce or accept.
//!
//! [`Caps`] is an ordered list of alternative [`Structure`]s. Each structure
//! is a media type name plus fields whose values may be fixed, a range, or a
//! list; this is what turns negotiation into a search instead of an equality
//! check. Two sentinels exist: ANY (unconstrained) and EMPTY (impossible).
//!
//! ```rust
//! use trellis::caps::{Caps, FieldValue};
//!
//! let src = Caps::builder("audio/x-raw").field("rate", 8000..=48000).build();
//! let sink = Caps::builder("audio/x-raw").field("rate", FieldValue::range(44100, 44100)).build();
//!
//! let common = src.intersect(&sink);
//! assert!(common.is_fixed());
//! assert_eq!(common.structure(0).and_then(|s| s.get_int("rate")), Some(44100));
//! ```

mod fixate;
mod structure;
mod value;

pub use fixate::{DefaultFixation, FixationHints, FixationStrategy, PreferredFixation};
pub use structure::Structure;
pub use value::{FieldValue, Fraction, Value};

use std::fmt;

use smallvec::SmallVec;

/// An ordered set of alternative format structures.
///
/// Earlier structures are preferred over later ones.
#[derive(Clone, Debug, PartialEq)]
pub struct Caps {
    any: bool,
    structures: SmallVec<[Structure; 2]>,
}

impl Caps {
    /// Caps accepting anything.
    pub fn new_any() -> Self {
        Self {
            any: true,
            structures: SmallVec::new(),
        }
    }

    /// Caps accepting nothing.
    pub fn new_empty() -> Self {
        Self {
            any: false,
            structures: SmallVec::new(),
        }
    }

    /// Caps with a single structure.
    pub fn new(structure: Structure) -> Self {
        let mut structures = SmallVec::new();
        structures.push(structure);
        Self {
            any: false,
            structures,
        }
    }

    /// Caps from several alternatives, most preferred first.
    pub fn from_structures(structures: impl IntoIterator<Item = Structure>) -> Self {
        Self {
            any: false,
            structures: structures.into_iter().collect(),
        }
    }

    /// Start building single-structure caps.
    pub fn builder(name: impl Into<String>) -> CapsBuilder {
        CapsBuilder {
            structure: Structure::new(name),
        }
    }

    /// Unconstrained.
    #[inline]
    pub fn is_any(&self) -> bool {
        self.any
    }

    /// Impossible: no format satisfies it.
    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.any && self.structures.is_empty()
    }

    /// Exactly one structure whose fields are all fixed.
    pub fn is_fixed(&self) -> bool {
        !self.any && self.structures.len() == 1 && self.structures[0].is_fixed()
    }

    /// Number of alternatives.
    pub fn len(&self) -> usize {
        self.structures.len()
    }

    /// Alternative at `index`.
    pub fn structure(&self, index: usize) -> Option<&Structure> {
        self.structures.get(index)
    }

    /// All alternatives in preference order.
    pub fn structures(&self) -> impl Iterator<Item = &Structure> {
        self.structures.iter()
    }

    /// Append an alternative.
    pub fn append_structure(&mut self, structure: Structure) {
        if !self.any {
            self.structures.push(structure);
        }
    }

    /// Intersect two caps.
    ///
    /// The result keeps the preference order of `self`. ANY is the identity;
    /// ANY ∩ ANY stays ANY.
    pub fn intersect(&self, other: &Caps) -> Caps {
        if self.any {
            return other.clone();
        }
        if other.any {
            return self.clone();
        }
        let mut out = Caps::new_empty();
        for ours in &self.structures {
            for theirs in &other.structures {
                if let Some(s) = ours.intersect(theirs)
                    && !out.structures.contains(&s)
                {
                    out.structures.push(s);
                }
            }
        }
        out
    }

    /// Whether the intersection is non-empty.
    pub fn can_intersect(&self, other: &Caps) -> bool {
        if self.any || other.any {
            return !(self.is_empty() || other.is_empty());
        }
        self.structures
            .iter()
            .any(|a| other.structures.iter().any(|b| a.intersect(b).is_some()))
    }

    /// Whether every format in `self` is also in `superset`.
    pub fn is_subset(&self, superset: &Caps) -> bool {
        if superset.any {
            return true;
        }
        if self.any {
            return false;
        }
        self.structures
            .iter()
            .flat_map(Structure::expand)
            .all(|s| superset.structures.iter().any(|sup| s.is_subset(sup)))
    }

    /// Append the alternatives of `other` that `self` does not already cover.
    pub fn merge(&mut self, other: Caps) {
        if self.any {
            return;
        }
        if other.any {
            *self = Caps::new_any();
            return;
        }
        for s in other.structures {
            let covered = self.structures.iter().any(|ours| s.is_subset(ours));
            if !covered {
                self.structures.push(s);
            }
        }
    }

    /// Unroll every list field so that each structure describes a single
    /// combination of list values.
    pub fn normalize(&self) -> Caps {
        if self.any {
            return self.clone();
        }
        Caps::from_structures(self.structures.iter().flat_map(Structure::expand))
    }

    /// Keep only the first structure.
    pub fn truncate(&self) -> Caps {
        match self.structures.first() {
            Some(s) if !self.any => Caps::new(s.clone()),
            _ => self.clone(),
        }
    }
}

impl From<Structure> for Caps {
    fn from(structure: Structure) -> Self {
        Caps::new(structure)
    }
}

impl fmt::Display for Caps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.any {
            return write!(f, "ANY");
        }
        if self.structures.is_empty() {
            return write!(f, "EMPTY");
        }
        for (i, s) in self.structures.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{s}")?;
        }
        Ok(())
    }
}

/// Builder for single-structure [`Caps`].
#[derive(Debug)]
pub struct CapsBuilder {
    structure: Structure,
}

impl CapsBuilder {
    /// Add a field.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.structure.set(name, value);
        self
    }

    /// Finish.
    pub fn build(self) -> Caps {
        Caps::new(self.structure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio(rate: impl Into<FieldValue>) -> Caps {
        Caps::builder("audio/x-raw").field("rate", rate).build()
    }

    #[test]
    fn test_sentinels() {
        assert!(Caps::new_any().is_any());
        assert!(Caps::new_empty().is_empty());
        assert!(!Caps::new_any().is_empty());
        assert!(Caps::new_any().intersect(&Caps::new_any()).is_any());
        assert!(Caps::new_any().intersect(&Caps::new_empty()).is_empty());
        assert!(!Caps::new_any().can_intersect(&Caps::new_empty()));
    }

    #[test]
    fn test_any_is_identity() {
        let a = audio(44100);
        assert_eq!(Caps::new_any().intersect(&a), a);
        assert_eq!(a.intersect(&Caps::new_any()), a);
    }

    #[test]
    fn test_intersection_preserves_first_order() {
        let a = Caps::from_structures([
            Structure::new("audio/x-raw").field("format", "F32LE"),
            Structure::new("audio/x-raw").field("format", "S16LE"),
        ]);
        let b = Caps::from_structures([
            Structure::new("audio/x-raw").field("format", "S16LE"),
            Structure::new("audio/x-raw").field("format", "F32LE"),
        ]);
        let ab = a.intersect(&b);
        assert_eq!(ab.structure(0).and_then(|s| s.get_str("format")), Some("F32LE"));
        let ba = b.intersect(&a);
        assert_eq!(ba.structure(0).and_then(|s| s.get_str("format")), Some("S16LE"));
    }

    #[test]
    fn test_disjoint_is_empty() {
        assert!(audio(8000).intersect(&audio(16000)).is_empty());
        assert!(!audio(8000).can_intersect(&audio(16000)));
    }

    #[test]
    fn test_subset_and_merge() {
        let wide = audio(8000..=48000);
        let narrow = audio(FieldValue::list([8000, 16000]));
        assert!(narrow.is_subset(&wide));
        assert!(!wide.is_subset(&narrow));

        let mut merged = wide.clone();
        merged.merge(narrow);
        assert_eq!(merged.len(), 1);
        merged.merge(audio(96000));
        assert_eq!(merged.len(), 2);
        merged.merge(Caps::new_any());
        assert!(merged.is_any());
    }

    #[test]
    fn test_normalize() {
        let caps = audio(FieldValue::list([8000, 16000, 32000]));
        let norm = caps.normalize();
        assert_eq!(norm.len(), 3);
        assert!(norm.structures().all(Structure::is_fixed));
    }

    #[test]
    fn test_display() {
        let caps = Caps::from_structures([
            Structure::new("audio/x-raw").field("rate", 8000..=48000),
            Structure::new("audio/x-alaw"),
        ]);
        assert_eq!(caps.to_string(), "audio/x-raw, rate=(int)[ 8000, 48000 ]; audio/x-alaw");
        assert_eq!(Caps::new_any().to_string(), "ANY");
        assert_eq!(Caps::new_empty().to_string(), "EMPTY");
    }
}
