use std::fmt;

use crate::error::{GraphError, Result};

/// Interned string identifier. Id 0 is reserved for the empty string and
/// doubles as "untagged" when used as a node or edge tag.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct StringId(pub u16);

/// Node identifier: the 1-based slot ordinal in the node table.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct NodeId(pub u64);

/// Edge identifier: the 1-based slot ordinal in the edge table.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct EdgeId(pub u64);

impl StringId {
    /// Whether this id denotes the empty string / no tag.
    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for StringId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction selector for edge traversal.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Direction {
    /// Incoming edges first, then outgoing.
    Any,
    /// Edges whose source is the node.
    Outgoing,
    /// Edges whose destination is the node.
    Incoming,
}

/// Property value type discriminator.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[repr(u8)]
pub enum PropertyType {
    /// A property that exists but carries no value.
    NoValue = 1,
    /// Boolean value.
    Boolean,
    /// 64-bit signed integer, stored in 1..8 bytes.
    Integer,
    /// UTF-8 string; at most 13 bytes inline, longer via external backing.
    String,
    /// IEEE-754 double.
    Float,
    /// A UTC instant with a timezone offset for presentation.
    Time,
    /// Opaque bytes, always stored externally.
    Blob,
}

/// A point in time. Comparison and equality use the UTC instant only;
/// the timezone offset is carried for presentation.
#[derive(Copy, Clone, Debug)]
#[repr(C)]
pub struct Time {
    /// Microseconds since the Unix epoch, UTC.
    pub usec_utc: i64,
    /// Timezone offset from UTC in minutes, for display purposes.
    pub tz_min: i16,
}

impl Time {
    /// Builds a `Time` from an `OffsetDateTime`, preserving its offset.
    pub fn from_datetime(dt: time::OffsetDateTime) -> Self {
        Time {
            usec_utc: dt.unix_timestamp() * 1_000_000 + i64::from(dt.microsecond()),
            tz_min: dt.offset().whole_minutes(),
        }
    }

    /// Converts back to an `OffsetDateTime` in the stored offset.
    pub fn to_datetime(self) -> Result<time::OffsetDateTime> {
        let offset = time::UtcOffset::from_whole_seconds(i32::from(self.tz_min) * 60)
            .map_err(|_| GraphError::InvalidID("timezone offset out of range"))?;
        let utc = time::OffsetDateTime::from_unix_timestamp_nanos(
            i128::from(self.usec_utc) * 1_000,
        )
        .map_err(|_| GraphError::InvalidID("time value out of range"))?;
        Ok(utc.to_offset(offset))
    }
}

impl PartialEq for Time {
    fn eq(&self, other: &Self) -> bool {
        self.usec_utc == other.usec_utc
    }
}

impl Eq for Time {}

impl PartialOrd for Time {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Time {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.usec_utc.cmp(&other.usec_utc)
    }
}

/// A typed property value as seen by callers.
#[derive(Clone, Debug, PartialEq)]
pub enum Property {
    /// Present but valueless.
    NoValue,
    /// Boolean.
    Boolean(bool),
    /// Integer.
    Integer(i64),
    /// Float.
    Float(f64),
    /// Time instant.
    Time(Time),
    /// String.
    String(String),
    /// Opaque bytes.
    Blob(Vec<u8>),
}

impl Property {
    /// The type discriminator for this value.
    pub fn ptype(&self) -> PropertyType {
        match self {
            Property::NoValue => PropertyType::NoValue,
            Property::Boolean(_) => PropertyType::Boolean,
            Property::Integer(_) => PropertyType::Integer,
            Property::Float(_) => PropertyType::Float,
            Property::Time(_) => PropertyType::Time,
            Property::String(_) => PropertyType::String,
            Property::Blob(_) => PropertyType::Blob,
        }
    }

    /// Typed accessor; fails with `PropertyTypeMismatch` on the wrong type.
    pub fn bool_value(&self) -> Result<bool> {
        match self {
            Property::Boolean(v) => Ok(*v),
            _ => Err(GraphError::PropertyTypeMismatch),
        }
    }

    /// Typed accessor; fails with `PropertyTypeMismatch` on the wrong type.
    pub fn int_value(&self) -> Result<i64> {
        match self {
            Property::Integer(v) => Ok(*v),
            _ => Err(GraphError::PropertyTypeMismatch),
        }
    }

    /// Typed accessor; fails with `PropertyTypeMismatch` on the wrong type.
    pub fn float_value(&self) -> Result<f64> {
        match self {
            Property::Float(v) => Ok(*v),
            _ => Err(GraphError::PropertyTypeMismatch),
        }
    }

    /// Typed accessor; fails with `PropertyTypeMismatch` on the wrong type.
    pub fn time_value(&self) -> Result<Time> {
        match self {
            Property::Time(v) => Ok(*v),
            _ => Err(GraphError::PropertyTypeMismatch),
        }
    }

    /// Typed accessor; fails with `PropertyTypeMismatch` on the wrong type.
    pub fn string_value(&self) -> Result<&str> {
        match self {
            Property::String(v) => Ok(v),
            _ => Err(GraphError::PropertyTypeMismatch),
        }
    }

    /// Typed accessor; fails with `PropertyTypeMismatch` on the wrong type.
    pub fn blob_value(&self) -> Result<&[u8]> {
        match self {
            Property::Blob(v) => Ok(v),
            _ => Err(GraphError::PropertyTypeMismatch),
        }
    }

    /// Total order over same-typed values; values of different types are
    /// ordered by type discriminator so predicate filters stay deterministic.
    pub(crate) fn cmp_values(&self, other: &Property) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        match (self, other) {
            (Property::Boolean(a), Property::Boolean(b)) => a.cmp(b),
            (Property::Integer(a), Property::Integer(b)) => a.cmp(b),
            (Property::Float(a), Property::Float(b)) => a.total_cmp(b),
            (Property::Time(a), Property::Time(b)) => a.cmp(b),
            (Property::String(a), Property::String(b)) => a.cmp(b),
            (Property::Blob(a), Property::Blob(b)) => a.cmp(b),
            (Property::NoValue, Property::NoValue) => Ordering::Equal,
            _ => (self.ptype() as u8).cmp(&(other.ptype() as u8)),
        }
    }
}

/// Comparison operator for property predicates.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum PredicateOp {
    /// Match any value.
    DontCare,
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Closed range.
    GeLe,
    /// Min-closed, max-open range.
    GeLt,
    /// Min-open, max-closed range.
    GtLe,
    /// Open range.
    GtLt,
}

impl PredicateOp {
    pub(crate) fn is_range(self) -> bool {
        matches!(
            self,
            PredicateOp::GeLe | PredicateOp::GeLt | PredicateOp::GtLe | PredicateOp::GtLt
        )
    }
}

/// A predicate over one property id, used to select nodes or edges.
#[derive(Clone, Debug)]
pub struct PropertyPredicate {
    /// The property id to test.
    pub id: StringId,
    /// The comparison operator.
    pub op: PredicateOp,
    /// First operand (unused for `DontCare`).
    pub v1: Property,
    /// Second operand (range operators only).
    pub v2: Property,
}

impl PropertyPredicate {
    /// Predicate matching any entity carrying the property.
    pub fn exists(id: StringId) -> Self {
        PropertyPredicate {
            id,
            op: PredicateOp::DontCare,
            v1: Property::NoValue,
            v2: Property::NoValue,
        }
    }

    /// Single-operand predicate (`Eq`..`Le`).
    pub fn new(id: StringId, op: PredicateOp, v: Property) -> Self {
        debug_assert!(!op.is_range() && op != PredicateOp::DontCare);
        PropertyPredicate {
            id,
            op,
            v1: v,
            v2: Property::NoValue,
        }
    }

    /// Range predicate (`GeLe`..`GtLt`).
    pub fn range(id: StringId, op: PredicateOp, min: Property, max: Property) -> Self {
        debug_assert!(op.is_range());
        PropertyPredicate {
            id,
            op,
            v1: min,
            v2: max,
        }
    }

    /// Evaluates the predicate against a concrete value.
    pub(crate) fn matches(&self, value: &Property) -> bool {
        use std::cmp::Ordering::*;
        if self.op == PredicateOp::DontCare {
            return true;
        }
        if value.ptype() != self.v1.ptype() {
            return false;
        }
        let c1 = value.cmp_values(&self.v1);
        match self.op {
            PredicateOp::Eq => c1 == Equal,
            PredicateOp::Ne => c1 != Equal,
            PredicateOp::Gt => c1 == Greater,
            PredicateOp::Ge => c1 != Less,
            PredicateOp::Lt => c1 == Less,
            PredicateOp::Le => c1 != Greater,
            PredicateOp::GeLe => c1 != Less && value.cmp_values(&self.v2) != Greater,
            PredicateOp::GeLt => c1 != Less && value.cmp_values(&self.v2) == Less,
            PredicateOp::GtLe => c1 == Greater && value.cmp_values(&self.v2) != Greater,
            PredicateOp::GtLt => c1 == Greater && value.cmp_values(&self.v2) == Less,
            PredicateOp::DontCare => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicate_ranges() {
        let pp = PropertyPredicate::range(
            StringId(1),
            PredicateOp::GeLt,
            Property::Integer(10),
            Property::Integer(20),
        );
        assert!(pp.matches(&Property::Integer(10)));
        assert!(pp.matches(&Property::Integer(19)));
        assert!(!pp.matches(&Property::Integer(20)));
        assert!(!pp.matches(&Property::Integer(9)));
        assert!(!pp.matches(&Property::Float(15.0)));
    }

    #[test]
    fn time_orders_by_instant() {
        let a = Time {
            usec_utc: 1_000,
            tz_min: 0,
        };
        let b = Time {
            usec_utc: 1_000,
            tz_min: 330,
        };
        assert_eq!(a, b);
        let c = Time {
            usec_utc: 2_000,
            tz_min: -60,
        };
        assert!(a < c);
    }

    #[test]
    fn time_datetime_round_trip() {
        let dt = time::macros::datetime!(2021-07-04 12:30:45.123456 +02:00);
        let t = Time::from_datetime(dt);
        let back = t.to_datetime().unwrap();
        assert_eq!(back, dt);
        assert_eq!(back.offset(), dt.offset());
    }
}
