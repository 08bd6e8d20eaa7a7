//! Named structures: one alternative format inside a [`Caps`](super::Caps).

use std::fmt;

use super::value::{FieldValue, Value};

/// A media type name plus an ordered set of constrained fields.
#[derive(Clone, Debug, PartialEq)]
pub struct Structure {
    name: String,
    fields: Vec<(String, FieldValue)>,
}

impl Structure {
    /// Create an empty structure.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Builder-style field setter.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Set (or replace) a field, keeping its original position.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, v)) => *v = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Remove a field.
    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        let idx = self.fields.iter().position(|(n, _)| n == name)?;
        Some(self.fields.remove(idx).1)
    }

    /// Media type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a field.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Fixed value of a field.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.get(name).and_then(FieldValue::as_fixed)
    }

    /// Fixed integer value of a field.
    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.value(name).and_then(Value::as_int)
    }

    /// Fixed string value of a field.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.value(name).and_then(Value::as_str)
    }

    /// Whether the structure has a field with that name.
    pub fn has_field(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Number of fields.
    pub fn n_fields(&self) -> usize {
        self.fields.len()
    }

    /// All fields fixed.
    pub fn is_fixed(&self) -> bool {
        self.fields.iter().all(|(_, v)| v.is_fixed())
    }

    /// Intersect two structures.
    ///
    /// Names must match. Fields present on both sides are intersected;
    /// a field present on only one side is unconstrained on the other and
    /// is carried over unchanged. Field order follows `self`, then the
    /// fields only `other` has.
    pub fn intersect(&self, other: &Structure) -> Option<Structure> {
        if self.name != other.name {
            return None;
        }
        let mut out = Structure::new(self.name.clone());
        for (name, value) in &self.fields {
            let merged = match other.get(name) {
                Some(theirs) => value.intersect(theirs)?,
                None => value.clone(),
            };
            out.fields.push((name.clone(), merged));
        }
        for (name, value) in &other.fields {
            if !self.has_field(name) {
                out.fields.push((name.clone(), value.clone()));
            }
        }
        Some(out)
    }

    /// Whether every format described by `self` is also described by `superset`.
    pub fn is_subset(&self, superset: &Structure) -> bool {
        self.name == superset.name
            && superset.fields.iter().all(|(name, theirs)| {
                self.get(name).is_some_and(|ours| ours.is_subset(theirs))
            })
    }

    /// Unroll list fields into one structure per combination.
    pub(crate) fn expand(&self) -> Vec<Structure> {
        let mut out = vec![Structure::new(self.name.clone())];
        for (name, value) in &self.fields {
            let alternatives = value.alternatives();
            let mut next = Vec::with_capacity(out.len() * alternatives.len());
            for partial in &out {
                for alt in &alternatives {
                    let mut s = partial.clone();
                    s.fields.push((name.clone(), alt.clone()));
                    next.push(s);
                }
            }
            out = next;
        }
        out
    }
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for (name, value) in &self.fields {
            write!(f, ", {name}={value}")?;
        }
        Ok(())
    }
}
