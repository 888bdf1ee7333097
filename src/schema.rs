//! Record and schema model.
//!
//! A [`Schema`] names and types the columns a pipeline reads. Every value that
//! flows between stages is a [`Record`]: an ordered tuple of [`Value`]s whose
//! [`Shape`] (the ordered list of [`ScalarType`]s) is what the resolver checks.
//!
//! Closure stages never see `Record` directly. Their argument and return types
//! are Rust tuples of [`Scalar`] types, and the [`Row`] trait converts between
//! the two and reports the tuple's shape.

use crate::vector::{Lanes, Vector};
use crate::source::ColumnData;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FormatResult};

/// The scalar column types a schema may contain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// 32-bit signed integer.
    Int,
    /// 32-bit unsigned integer.
    UInt,
    /// 64-bit signed integer.
    Long,
    /// Boolean.
    Bool,
}

impl ScalarType {
    /// Whether values of this type can be summed as `f64`.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        !matches!(self, Self::Bool)
    }

    /// Lower-case type name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Double => "double",
            Self::Int => "int",
            Self::UInt => "uint",
            Self::Long => "long",
            Self::Bool => "bool",
        }
    }
}

impl Display for ScalarType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        f.write_str(self.name())
    }
}

/// A single dynamically-typed scalar.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    Float(f32),
    Double(f64),
    Int(i32),
    UInt(u32),
    Long(i64),
    Bool(bool),
}

impl Value {
    /// The type tag of this value.
    #[must_use]
    pub const fn scalar_type(&self) -> ScalarType {
        match self {
            Self::Float(_) => ScalarType::Float,
            Self::Double(_) => ScalarType::Double,
            Self::Int(_) => ScalarType::Int,
            Self::UInt(_) => ScalarType::UInt,
            Self::Long(_) => ScalarType::Long,
            Self::Bool(_) => ScalarType::Bool,
        }
    }

    /// Widen a numeric value to `f64`. Booleans have no numeric value.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Float(v) => Some(f64::from(v)),
            Self::Double(v) => Some(v),
            Self::Int(v) => Some(f64::from(v)),
            Self::UInt(v) => Some(f64::from(v)),
            Self::Long(v) => Some(v as f64),
            Self::Bool(_) => None,
        }
    }

    /// The zero value of a type, used to pad unused batch lanes.
    #[must_use]
    pub const fn zero(ty: ScalarType) -> Self {
        match ty {
            ScalarType::Float => Self::Float(0.0),
            ScalarType::Double => Self::Double(0.0),
            ScalarType::Int => Self::Int(0),
            ScalarType::UInt => Self::UInt(0),
            ScalarType::Long => Self::Long(0),
            ScalarType::Bool => Self::Bool(false),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::UInt(v) => write!(f, "{v}"),
            Self::Long(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
        }
    }
}

/// Rust types that map one-to-one onto a [`ScalarType`].
///
/// Implemented for `f32`, `f64`, `i32`, `u32`, `i64` and `bool`. The vector
/// conversions let the same type appear as a batch lane type in [`Lanes<T>`].
pub trait Scalar: Copy + Default + PartialEq + std::fmt::Debug + Send + Sync + 'static {
    /// The schema type this Rust type corresponds to.
    const TYPE: ScalarType;

    /// Extract from a dynamic value, `None` if the tag differs.
    fn from_value(value: Value) -> Option<Self>;

    /// Wrap as a dynamic value.
    fn into_value(self) -> Value;

    /// View a dynamic vector as typed lanes, `None` if the tag differs.
    fn from_vector(vector: &Vector) -> Option<Lanes<Self>>;

    /// Wrap typed lanes as a dynamic vector.
    fn into_vector(lanes: Lanes<Self>) -> Vector;

    /// Wrap a typed column.
    fn into_column(values: Vec<Self>) -> ColumnData;
}

macro_rules! impl_scalar {
    ($($ty:ty => $variant:ident),+ $(,)?) => {$(
        impl Scalar for $ty {
            const TYPE: ScalarType = ScalarType::$variant;

            fn from_value(value: Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn into_value(self) -> Value {
                Value::$variant(self)
            }

            fn from_vector(vector: &Vector) -> Option<Lanes<Self>> {
                match vector {
                    Vector::$variant(lanes) => Some(*lanes),
                    _ => None,
                }
            }

            fn into_vector(lanes: Lanes<Self>) -> Vector {
                Vector::$variant(lanes)
            }

            fn into_column(values: Vec<Self>) -> ColumnData {
                ColumnData::$variant(values)
            }
        }

        // A bare scalar is a one-field row, so `map(|x: f32| x * 2.0)` works
        // without wrapping in a 1-tuple.
        impl Row for $ty {
            fn shape() -> Shape {
                Shape::new(vec![ScalarType::$variant])
            }

            fn from_record(record: &Record) -> Option<Self> {
                match record.values() {
                    [value] => Self::from_value(*value),
                    _ => None,
                }
            }

            fn into_record(self) -> Record {
                Record::new(vec![self.into_value()])
            }
        }
    )+};
}

impl_scalar! {
    f32 => Float,
    f64 => Double,
    i32 => Int,
    u32 => UInt,
    i64 => Long,
    bool => Bool,
}

/// The ordered field types of a record, without names.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Shape(Vec<ScalarType>);

impl Shape {
    #[must_use]
    pub const fn new(types: Vec<ScalarType>) -> Self {
        Self(types)
    }

    #[must_use]
    pub fn types(&self) -> &[ScalarType] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<ScalarType> {
        self.0.get(index).copied()
    }
}

impl FromIterator<ScalarType> for Shape {
    fn from_iter<I: IntoIterator<Item = ScalarType>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Display for Shape {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        f.write_str("(")?;
        for (i, ty) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{ty}")?;
        }
        f.write_str(")")
    }
}

/// A named, typed column of a schema.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ScalarType,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: ScalarType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// The columns a pipeline reads, in the order records present them.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    /// Build a schema from `(name, type)` pairs.
    ///
    /// ```
    /// use rowchain::{Schema, ScalarType};
    ///
    /// let schema = Schema::new([("x", ScalarType::Float), ("y", ScalarType::Int)]);
    /// assert_eq!(schema.len(), 2);
    /// assert_eq!(schema.shape().to_string(), "(float, int)");
    /// ```
    pub fn new<N: Into<String>>(fields: impl IntoIterator<Item = (N, ScalarType)>) -> Self {
        Self {
            fields: fields
                .into_iter()
                .map(|(name, ty)| Field::new(name, ty))
                .collect(),
        }
    }

    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The shape of records read under this schema.
    #[must_use]
    pub fn shape(&self) -> Shape {
        self.fields.iter().map(|f| f.ty).collect()
    }

    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// One row's values, in schema (or stage output) order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record(Vec<Value>);

impl Record {
    #[must_use]
    pub const fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.0
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<Value> {
        self.0.get(index).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn shape(&self) -> Shape {
        self.0.iter().map(Value::scalar_type).collect()
    }
}

impl From<Vec<Value>> for Record {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

/// Typed view of a [`Record`]: a scalar or a tuple of scalars.
///
/// The shape reported by [`Row::shape`] is what closure stages declare to the
/// resolver, so a closure taking `(f32, i32)` only type-checks after a stage
/// producing `(float, int)`.
pub trait Row: Sized + Send + 'static {
    fn shape() -> Shape;

    /// Convert from a record, `None` when arity or any field type differs.
    fn from_record(record: &Record) -> Option<Self>;

    fn into_record(self) -> Record;
}

macro_rules! impl_row_tuple {
    ($($t:ident . $idx:tt),+) => {
        impl<$($t: Scalar),+> Row for ($($t,)+) {
            fn shape() -> Shape {
                Shape::new(vec![$($t::TYPE),+])
            }

            fn from_record(record: &Record) -> Option<Self> {
                let values = record.values();
                if values.len() != [$($idx),+].len() {
                    return None;
                }
                Some(($($t::from_value(values[$idx])?,)+))
            }

            fn into_record(self) -> Record {
                Record::new(vec![$(self.$idx.into_value()),+])
            }
        }
    };
}

impl_row_tuple!(A.0);
impl_row_tuple!(A.0, B.1);
impl_row_tuple!(A.0, B.1, C.2);
impl_row_tuple!(A.0, B.1, C.2, D.3);
impl_row_tuple!(A.0, B.1, C.2, D.3, E.4);
impl_row_tuple!(A.0, B.1, C.2, D.3, E.4, F.5);
impl_row_tuple!(A.0, B.1, C.2, D.3, E.4, F.5, G.6);
impl_row_tuple!(A.0, B.1, C.2, D.3, E.4, F.5, G.6, H.7);
