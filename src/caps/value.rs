//! Typed field values and the per-field intersection rules.

use std::cmp::Ordering;
use std::fmt;
use std::ops::RangeInclusive;

/// A rational number, used for frame rates and aspect ratios.
///
/// Equality and ordering compare the rational value, so `1/2 == 2/4`.
#[derive(Clone, Copy, Debug)]
pub struct Fraction {
    num: i32,
    den: i32,
}

impl Fraction {
    /// Create a fraction. The sign is carried by the numerator; a zero
    /// denominator is stored as 1.
    pub fn new(num: i32, den: i32) -> Self {
        match den.cmp(&0) {
            Ordering::Less => Self {
                num: num.saturating_neg(),
                den: den.saturating_neg(),
            },
            Ordering::Equal => Self { num, den: 1 },
            Ordering::Greater => Self { num, den },
        }
    }

    /// Numerator.
    pub fn numer(&self) -> i32 {
        self.num
    }

    /// Denominator (always positive).
    pub fn denom(&self) -> i32 {
        self.den
    }

    fn as_f64(&self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }
}

impl PartialEq for Fraction {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Fraction {}

impl PartialOrd for Fraction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Fraction {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = i64::from(self.num) * i64::from(other.den);
        let rhs = i64::from(other.num) * i64::from(self.den);
        lhs.cmp(&rhs)
    }
}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// A single scalar value in a caps field.
#[derive(Clone, Debug)]
pub enum Value {
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// Boolean.
    Bool(bool),
    /// String (formats, layouts, stream names).
    Str(String),
    /// Rational number.
    Fraction(Fraction),
    /// Four-character code.
    Fourcc([u8; 4]),
}

impl Value {
    /// Build a fourcc value.
    pub fn fourcc(code: &[u8; 4]) -> Self {
        Value::Fourcc(*code)
    }

    /// Type name used in the textual caps representation.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "boolean",
            Value::Str(_) => "string",
            Value::Fraction(_) => "fraction",
            Value::Fourcc(_) => "fourcc",
        }
    }

    /// Whether values of this type may form a range.
    pub fn is_orderable(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_) | Value::Fraction(_))
    }

    /// Integer payload, if this is an int.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// String payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Numeric distance to another value of the same numeric type.
    fn distance(&self, other: &Value) -> Option<f64> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.abs_diff(*b) as f64),
            (Value::Float(a), Value::Float(b)) => Some((a - b).abs()),
            (Value::Fraction(a), Value::Fraction(b)) => Some((a.as_f64() - b.as_f64()).abs()),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.partial_cmp(other) == Some(Ordering::Equal)
    }
}

impl PartialOrd for Value {
    /// Values of different types are unordered.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Fraction(a), Value::Fraction(b)) => Some(a.cmp(b)),
            (Value::Fourcc(a), Value::Fourcc(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v}"),
            Value::Fraction(v) => write!(f, "{v}"),
            Value::Fourcc(v) => write!(f, "{}", String::from_utf8_lossy(v)),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => |$v:ident| $body:expr),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from($v: $ty) -> Self {
                    $body
                }
            }

            impl From<$ty> for FieldValue {
                fn from($v: $ty) -> Self {
                    FieldValue::Fixed($body)
                }
            }
        )*
    };
}

value_from! {
    i32 => |v| Value::Int(i64::from(v)),
    i64 => |v| Value::Int(v),
    f64 => |v| Value::Float(v),
    bool => |v| Value::Bool(v),
    &str => |v| Value::Str(v.to_owned()),
    String => |v| Value::Str(v),
    Fraction => |v| Value::Fraction(v),
}

/// The constraint a caps field places on its value.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    /// Exactly one value.
    Fixed(Value),
    /// Inclusive range over an orderable type.
    Range {
        /// Lower bound.
        min: Value,
        /// Upper bound.
        max: Value,
    },
    /// Alternatives, ordered by preference.
    List(Vec<Value>),
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        FieldValue::Fixed(value)
    }
}

impl From<RangeInclusive<i32>> for FieldValue {
    fn from(range: RangeInclusive<i32>) -> Self {
        let (min, max) = range.into_inner();
        FieldValue::range(min, max)
    }
}

impl From<RangeInclusive<i64>> for FieldValue {
    fn from(range: RangeInclusive<i64>) -> Self {
        let (min, max) = range.into_inner();
        FieldValue::range(min, max)
    }
}

impl From<RangeInclusive<f64>> for FieldValue {
    fn from(range: RangeInclusive<f64>) -> Self {
        let (min, max) = range.into_inner();
        FieldValue::range(min, max)
    }
}

impl From<RangeInclusive<Fraction>> for FieldValue {
    fn from(range: RangeInclusive<Fraction>) -> Self {
        let (min, max) = range.into_inner();
        FieldValue::range(min, max)
    }
}

fn within(v: &Value, min: &Value, max: &Value) -> bool {
    matches!(v.partial_cmp(min), Some(Ordering::Greater | Ordering::Equal))
        && matches!(v.partial_cmp(max), Some(Ordering::Less | Ordering::Equal))
}

fn collapse(mut values: Vec<Value>) -> Option<FieldValue> {
    match values.len() {
        0 => None,
        1 => values.pop().map(FieldValue::Fixed),
        _ => Some(FieldValue::List(values)),
    }
}

impl FieldValue {
    /// A range. Kept as written, even when `min == max`.
    pub fn range(min: impl Into<Value>, max: impl Into<Value>) -> Self {
        FieldValue::Range {
            min: min.into(),
            max: max.into(),
        }
    }

    /// A list of alternatives.
    pub fn list<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Self {
        FieldValue::List(values.into_iter().map(Into::into).collect())
    }

    /// Whether this constraint names exactly one value.
    pub fn is_fixed(&self) -> bool {
        matches!(self, FieldValue::Fixed(_))
    }

    /// The value, when fixed.
    pub fn as_fixed(&self) -> Option<&Value> {
        match self {
            FieldValue::Fixed(v) => Some(v),
            _ => None,
        }
    }

    /// Check if a value satisfies this constraint.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldValue::Fixed(v) => v == value,
            FieldValue::Range { min, max } => within(value, min, max),
            FieldValue::List(values) => values.contains(value),
        }
    }

    /// Intersect two constraints.
    ///
    /// Lists keep the order of `self` where `self` contributes the list.
    /// Returns `None` if nothing satisfies both.
    pub fn intersect(&self, other: &FieldValue) -> Option<FieldValue> {
        use FieldValue::*;
        match (self, other) {
            (Fixed(a), Fixed(b)) => (a == b).then(|| Fixed(a.clone())),

            (Fixed(v), Range { min, max }) | (Range { min, max }, Fixed(v)) => {
                within(v, min, max).then(|| Fixed(v.clone()))
            }

            (Fixed(v), List(list)) | (List(list), Fixed(v)) => {
                list.contains(v).then(|| Fixed(v.clone()))
            }

            (
                Range {
                    min: min1,
                    max: max1,
                },
                Range {
                    min: min2,
                    max: max2,
                },
            ) => {
                let new_min = match min1.partial_cmp(min2)? {
                    Ordering::Less => min2,
                    _ => min1,
                };
                let new_max = match max1.partial_cmp(max2)? {
                    Ordering::Greater => max2,
                    _ => max1,
                };
                match new_min.partial_cmp(new_max)? {
                    Ordering::Greater => None,
                    Ordering::Equal => Some(Fixed(new_min.clone())),
                    Ordering::Less => Some(Range {
                        min: new_min.clone(),
                        max: new_max.clone(),
                    }),
                }
            }

            (Range { min, max }, List(list)) | (List(list), Range { min, max }) => collapse(
                list.iter()
                    .filter(|v| within(v, min, max))
                    .cloned()
                    .collect(),
            ),

            (List(first), List(second)) => collapse(
                first
                    .iter()
                    .filter(|v| second.contains(v))
                    .cloned()
                    .collect(),
            ),
        }
    }

    /// Whether every value accepted by `self` is accepted by `other`.
    pub fn is_subset(&self, other: &FieldValue) -> bool {
        match (self, other) {
            (FieldValue::Fixed(v), _) => other.accepts(v),
            (FieldValue::List(values), _) => values.iter().all(|v| other.accepts(v)),
            (FieldValue::Range { min, max }, FieldValue::Range { min: omin, max: omax }) => {
                within(min, omin, omax) && within(max, omin, omax)
            }
            (FieldValue::Range { min, max }, FieldValue::Fixed(v)) => min == v && max == v,
            (FieldValue::Range { .. }, FieldValue::List(_)) => false,
        }
    }

    /// The value chosen when nothing else guides fixation: the range
    /// minimum or the first list entry.
    pub fn default_value(&self) -> Option<Value> {
        match self {
            FieldValue::Fixed(v) => Some(v.clone()),
            FieldValue::Range { min, .. } => Some(min.clone()),
            FieldValue::List(values) => values.first().cloned(),
        }
    }

    /// The accepted value closest to `ideal`.
    ///
    /// Ranges clamp; lists pick the nearest entry, first one on ties.
    /// Returns `None` when `ideal` has an incomparable type.
    pub fn nearest(&self, ideal: &Value) -> Option<Value> {
        match self {
            FieldValue::Fixed(v) => Some(v.clone()),
            FieldValue::Range { min, max } => match (ideal.partial_cmp(min)?, ideal.partial_cmp(max)?) {
                (Ordering::Less, _) => Some(min.clone()),
                (_, Ordering::Greater) => Some(max.clone()),
                _ => Some(ideal.clone()),
            },
            FieldValue::List(values) => {
                if values.contains(ideal) {
                    return Some(ideal.clone());
                }
                let mut best: Option<(&Value, f64)> = None;
                for v in values {
                    if let Some(d) = v.distance(ideal)
                        && best.is_none_or(|(_, bd)| d < bd)
                    {
                        best = Some((v, d));
                    }
                }
                best.map(|(v, _)| v.clone())
            }
        }
    }

    /// Expand into one fixed value per alternative.
    pub(crate) fn alternatives(&self) -> Vec<FieldValue> {
        match self {
            FieldValue::List(values) => values.iter().cloned().map(FieldValue::Fixed).collect(),
            other => vec![other.clone()],
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Fixed(v) => v.type_name(),
            FieldValue::Range { min, .. } => min.type_name(),
            FieldValue::List(values) => values.first().map_or("string", Value::type_name),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.type_name())?;
        match self {
            FieldValue::Fixed(v) => write!(f, "{v}"),
            FieldValue::Range { min, max } => write!(f, "[ {min}, {max} ]"),
            FieldValue::List(values) => {
                write!(f, "{{ ")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, " }}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction_compares_by_value() {
        assert_eq!(Fraction::new(1, 2), Fraction::new(2, 4));
        assert!(Fraction::new(30, 1) > Fraction::new(30000, 1001));
        assert_eq!(Fraction::new(1, -2).numer(), -1);
    }

    #[test]
    fn test_mixed_types_never_intersect() {
        let a = FieldValue::from(44100);
        let b = FieldValue::from("44100");
        assert_eq!(a.intersect(&b), None);
        assert_eq!(FieldValue::from(1..=10).intersect(&FieldValue::from(1.0..=2.0)), None);
    }

    #[test]
    fn test_range_intersection_collapses_to_point() {
        let wide = FieldValue::from(8000..=48000);
        let point = FieldValue::range(44100, 44100);
        assert_eq!(wide.intersect(&point), Some(FieldValue::from(44100)));
        assert_eq!(point.intersect(&wide), Some(FieldValue::from(44100)));
    }

    #[test]
    fn test_range_overlap() {
        let a = FieldValue::from(0..=100);
        let b = FieldValue::from(50..=200);
        assert_eq!(a.intersect(&b), Some(FieldValue::range(50, 100)));
        assert_eq!(a.intersect(&FieldValue::from(101..=102)), None);
    }

    #[test]
    fn test_list_intersection_keeps_first_order() {
        let a = FieldValue::list(["S16LE", "F32LE", "U8"]);
        let b = FieldValue::list(["U8", "S16LE"]);
        assert_eq!(a.intersect(&b), Some(FieldValue::list(["S16LE", "U8"])));
        assert_eq!(b.intersect(&a), Some(FieldValue::list(["U8", "S16LE"])));
    }

    #[test]
    fn test_list_range_filter() {
        let list = FieldValue::list([8000, 22050, 96000]);
        let range = FieldValue::from(16000..=48000);
        assert_eq!(list.intersect(&range), Some(FieldValue::from(22050)));
    }

    #[test]
    fn test_subset() {
        assert!(FieldValue::from(5).is_subset(&FieldValue::from(0..=10)));
        assert!(FieldValue::from(2..=3).is_subset(&FieldValue::from(0..=10)));
        assert!(!FieldValue::from(2..=30).is_subset(&FieldValue::from(0..=10)));
        assert!(FieldValue::list([1, 2]).is_subset(&FieldValue::from(0..=10)));
    }

    #[test]
    fn test_nearest() {
        let range = FieldValue::from(8000..=48000);
        assert_eq!(range.nearest(&Value::Int(96000)), Some(Value::Int(48000)));
        assert_eq!(range.nearest(&Value::Int(22050)), Some(Value::Int(22050)));

        let list = FieldValue::list([8000, 32000, 48000]);
        assert_eq!(list.nearest(&Value::Int(44100)), Some(Value::Int(48000)));
        assert_eq!(list.nearest(&Value::Str("x".into())), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(FieldValue::from(8000..=48000).to_string(), "(int)[ 8000, 48000 ]");
        assert_eq!(FieldValue::list(["a", "b"]).to_string(), "(string){ a, b }");
        assert_eq!(FieldValue::from(Fraction::new(30, 1)).to_string(), "(fraction)30/1");
    }
}
