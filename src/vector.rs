//! Fixed-width lanes and validity masks for batched execution.
//!
//! Batched stages see [`LANES`] rows at a time. Each column of those rows is a
//! [`Vector`] (typed view: [`Lanes<T>`]) and the batch carries a [`Mask`] marking
//! which lanes hold live rows. Lanes cleared by a filter stay in the batch; they
//! are only masked out for the rest of the chain.

use crate::schema::{Record, Scalar, ScalarType, Shape, Value};
use std::ops::{Add, BitAnd, BitOr, Mul, Not, Sub};

/// Number of rows processed together in batched mode.
pub const LANES: usize = 8;

/// Per-lane validity flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Mask([bool; LANES]);

impl Mask {
    #[must_use]
    pub const fn from_lanes(lanes: [bool; LANES]) -> Self {
        Self(lanes)
    }

    /// Every lane valid.
    #[must_use]
    pub const fn all() -> Self {
        Self([true; LANES])
    }

    /// No lane valid.
    #[must_use]
    pub const fn none() -> Self {
        Self([false; LANES])
    }

    /// The first `n` lanes valid (saturating at [`LANES`]).
    #[must_use]
    pub fn first(n: usize) -> Self {
        let mut lanes = [false; LANES];
        for lane in lanes.iter_mut().take(n) {
            *lane = true;
        }
        Self(lanes)
    }

    #[must_use]
    pub const fn lanes(&self) -> [bool; LANES] {
        self.0
    }

    #[must_use]
    pub fn get(&self, lane: usize) -> bool {
        self.0.get(lane).copied().unwrap_or(false)
    }

    pub fn set(&mut self, lane: usize, valid: bool) {
        if let Some(slot) = self.0.get_mut(lane) {
            *slot = valid;
        }
    }

    /// Whether any lane is valid.
    #[must_use]
    pub fn any(&self) -> bool {
        self.0.iter().any(|&b| b)
    }

    /// Number of valid lanes.
    #[must_use]
    pub fn count(&self) -> usize {
        self.0.iter().filter(|&&b| b).count()
    }

    /// Indices of the valid lanes, in lane order.
    pub fn valid_lanes(&self) -> impl Iterator<Item = usize> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(i, &b)| b.then_some(i))
    }
}

impl BitAnd for Mask {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(std::array::from_fn(|i| self.0[i] && rhs.0[i]))
    }
}

impl BitOr for Mask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(std::array::from_fn(|i| self.0[i] || rhs.0[i]))
    }
}

impl Not for Mask {
    type Output = Self;

    fn not(self) -> Self {
        Self(self.0.map(|b| !b))
    }
}

/// [`LANES`] values of one scalar type.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Lanes<T>(pub [T; LANES]);

impl<T: Scalar> Lanes<T> {
    /// Same value in every lane.
    #[must_use]
    pub fn splat(value: T) -> Self {
        Self([value; LANES])
    }

    #[must_use]
    pub const fn lanes(&self) -> &[T; LANES] {
        &self.0
    }

    #[must_use]
    pub fn get(&self, lane: usize) -> Option<T> {
        self.0.get(lane).copied()
    }

    /// Lane-wise transform.
    #[must_use]
    pub fn map<U: Scalar>(self, f: impl Fn(T) -> U) -> Lanes<U> {
        Lanes(self.0.map(f))
    }

    /// Lane-wise combination of two vectors.
    #[must_use]
    pub fn zip_with<U: Scalar, R: Scalar>(self, other: Lanes<U>, f: impl Fn(T, U) -> R) -> Lanes<R> {
        Lanes(std::array::from_fn(|i| f(self.0[i], other.0[i])))
    }

    /// Lane-wise predicate producing a mask.
    #[must_use]
    pub fn test(self, f: impl Fn(T) -> bool) -> Mask {
        Mask(self.0.map(f))
    }
}

impl<T: Scalar + Add<Output = T>> Add for Lanes<T> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        self.zip_with(rhs, |a, b| a + b)
    }
}

impl<T: Scalar + Sub<Output = T>> Sub for Lanes<T> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        self.zip_with(rhs, |a, b| a - b)
    }
}

impl<T: Scalar + Mul<Output = T>> Mul for Lanes<T> {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        self.zip_with(rhs, |a, b| a * b)
    }
}

/// A dynamically-typed column of [`LANES`] values.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Vector {
    Float(Lanes<f32>),
    Double(Lanes<f64>),
    Int(Lanes<i32>),
    UInt(Lanes<u32>),
    Long(Lanes<i64>),
    Bool(Lanes<bool>),
}

impl Vector {
    /// All lanes zero.
    #[must_use]
    pub fn zeroed(ty: ScalarType) -> Self {
        match ty {
            ScalarType::Float => Self::Float(Lanes::splat(0.0)),
            ScalarType::Double => Self::Double(Lanes::splat(0.0)),
            ScalarType::Int => Self::Int(Lanes::splat(0)),
            ScalarType::UInt => Self::UInt(Lanes::splat(0)),
            ScalarType::Long => Self::Long(Lanes::splat(0)),
            ScalarType::Bool => Self::Bool(Lanes::splat(false)),
        }
    }

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

    /// Read one lane.
    #[must_use]
    pub fn lane(&self, lane: usize) -> Option<Value> {
        match self {
            Self::Float(l) => l.get(lane).map(Value::Float),
            Self::Double(l) => l.get(lane).map(Value::Double),
            Self::Int(l) => l.get(lane).map(Value::Int),
            Self::UInt(l) => l.get(lane).map(Value::UInt),
            Self::Long(l) => l.get(lane).map(Value::Long),
            Self::Bool(l) => l.get(lane).map(Value::Bool),
        }
    }

    /// Store one lane. Returns `false` (and stores nothing) when the lane is
    /// out of range or the value's type differs from the vector's.
    pub fn set_lane(&mut self, lane: usize, value: Value) -> bool {
        if lane >= LANES {
            return false;
        }
        match (self, value) {
            (Self::Float(l), Value::Float(v)) => l.0[lane] = v,
            (Self::Double(l), Value::Double(v)) => l.0[lane] = v,
            (Self::Int(l), Value::Int(v)) => l.0[lane] = v,
            (Self::UInt(l), Value::UInt(v)) => l.0[lane] = v,
            (Self::Long(l), Value::Long(v)) => l.0[lane] = v,
            (Self::Bool(l), Value::Bool(v)) => l.0[lane] = v,
            _ => return false,
        }
        true
    }
}

/// The columns of one batch, one [`Vector`] per field.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VectorRecord(Vec<Vector>);

impl VectorRecord {
    #[must_use]
    pub const fn new(vectors: Vec<Vector>) -> Self {
        Self(vectors)
    }

    /// Zero-filled vectors for every field of `shape`.
    #[must_use]
    pub fn zeroed(shape: &Shape) -> Self {
        Self(shape.types().iter().map(|&ty| Vector::zeroed(ty)).collect())
    }

    #[must_use]
    pub fn vectors(&self) -> &[Vector] {
        &self.0
    }

    pub fn vectors_mut(&mut self) -> &mut [Vector] {
        &mut self.0
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
        self.0.iter().map(Vector::scalar_type).collect()
    }

    /// Gather one lane across all fields into a scalar record.
    #[must_use]
    pub fn lane_record(&self, lane: usize) -> Option<Record> {
        self.0
            .iter()
            .map(|v| v.lane(lane))
            .collect::<Option<Vec<_>>>()
            .map(Record::new)
    }

    /// Scatter a scalar record into one lane. Fails on arity or type mismatch.
    pub fn set_lane(&mut self, lane: usize, record: &Record) -> bool {
        if record.len() != self.0.len() {
            return false;
        }
        self.0
            .iter_mut()
            .zip(record.values())
            .all(|(vector, &value)| vector.set_lane(lane, value))
    }
}

/// [`LANES`] rows plus the mask of which of them are live.
#[derive(Clone, Debug, PartialEq)]
pub struct Batch {
    pub mask: Mask,
    pub record: VectorRecord,
}

impl Batch {
    #[must_use]
    pub const fn new(mask: Mask, record: VectorRecord) -> Self {
        Self { mask, record }
    }

    /// Pack up to [`LANES`] records of `shape`; trailing lanes are zeroed and
    /// masked out. `None` if there are too many records or one has the wrong
    /// shape.
    #[must_use]
    pub fn pack(shape: &Shape, records: &[Record]) -> Option<Self> {
        if records.len() > LANES {
            return None;
        }
        let mut vectors = VectorRecord::zeroed(shape);
        for (lane, record) in records.iter().enumerate() {
            if !vectors.set_lane(lane, record) {
                return None;
            }
        }
        Some(Self::new(Mask::first(records.len()), vectors))
    }

    /// The records of the valid lanes, in lane order.
    #[must_use]
    pub fn valid_records(&self) -> Vec<Record> {
        self.mask
            .valid_lanes()
            .filter_map(|lane| self.record.lane_record(lane))
            .collect()
    }
}

/// Typed view of a [`VectorRecord`]: one [`Lanes<T>`] or a tuple of them.
///
/// The batched counterpart of [`Row`](crate::schema::Row); batched closure
/// stages declare their shape through it.
pub trait VectorRow: Sized + Send + 'static {
    fn shape() -> Shape;

    fn from_vectors(record: &VectorRecord) -> Option<Self>;

    fn into_vectors(self) -> VectorRecord;
}

impl<T: Scalar> VectorRow for Lanes<T> {
    fn shape() -> Shape {
        Shape::new(vec![T::TYPE])
    }

    fn from_vectors(record: &VectorRecord) -> Option<Self> {
        match record.vectors() {
            [vector] => T::from_vector(vector),
            _ => None,
        }
    }

    fn into_vectors(self) -> VectorRecord {
        VectorRecord::new(vec![T::into_vector(self)])
    }
}

macro_rules! impl_vector_row_tuple {
    ($($t:ident . $idx:tt),+) => {
        impl<$($t: Scalar),+> VectorRow for ($(Lanes<$t>,)+) {
            fn shape() -> Shape {
                Shape::new(vec![$($t::TYPE),+])
            }

            fn from_vectors(record: &VectorRecord) -> Option<Self> {
                let vectors = record.vectors();
                if vectors.len() != [$($idx),+].len() {
                    return None;
                }
                Some(($($t::from_vector(&vectors[$idx])?,)+))
            }

            fn into_vectors(self) -> VectorRecord {
                VectorRecord::new(vec![$($t::into_vector(self.$idx)),+])
            }
        }
    };
}

impl_vector_row_tuple!(A.0);
impl_vector_row_tuple!(A.0, B.1);
impl_vector_row_tuple!(A.0, B.1, C.2);
impl_vector_row_tuple!(A.0, B.1, C.2, D.3);
impl_vector_row_tuple!(A.0, B.1, C.2, D.3, E.4);
impl_vector_row_tuple!(A.0, B.1, C.2, D.3, E.4, F.5);
impl_vector_row_tuple!(A.0, B.1, C.2, D.3, E.4, F.5, G.6);
impl_vector_row_tuple!(A.0, B.1, C.2, D.3, E.4, F.5, G.6, H.7);
