//! Typed authoritative snapshots.
//!
//! The wire layer hands us loosely typed field maps; everything past
//! [`crate::net::NetEvent::validate`] sees only the types in this module.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::math::{Quat, Vec3};

/// Class-specific scalar/enum fields replicated next to the transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarField {
    Health,
    SteeringAngle,
    Charge,
    Locked,
    FillCount,
}

impl ScalarField {
    pub const ALL: [ScalarField; 5] = [
        ScalarField::Health,
        ScalarField::SteeringAngle,
        ScalarField::Charge,
        ScalarField::Locked,
        ScalarField::FillCount,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ScalarField::Health => "health",
            ScalarField::SteeringAngle => "steeringAngle",
            ScalarField::Charge => "charge",
            ScalarField::Locked => "locked",
            ScalarField::FillCount => "fillCount",
        }
    }

    pub fn kind(self) -> ValueKind {
        match self {
            ScalarField::Health | ScalarField::SteeringAngle | ScalarField::Charge => {
                ValueKind::Float
            }
            ScalarField::Locked => ValueKind::Bool,
            ScalarField::FillCount => ValueKind::Count,
        }
    }

    pub fn dirty_bit(self) -> DirtyFields {
        match self {
            ScalarField::Health => DirtyFields::HEALTH,
            ScalarField::SteeringAngle => DirtyFields::STEERING,
            ScalarField::Charge => DirtyFields::CHARGE,
            ScalarField::Locked => DirtyFields::LOCKED,
            ScalarField::FillCount => DirtyFields::FILL_COUNT,
        }
    }
}

/// Addressable field of a snapshot (the client side of a field path).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Position,
    Rotation,
    Scale,
    Scalar(ScalarField),
}

impl Field {
    /// Resolves a wire field path such as `"position"` or `"fillCount"`.
    pub fn from_path(path: &str) -> Option<Field> {
        match path {
            "position" => Some(Field::Position),
            "rotation" => Some(Field::Rotation),
            "scale" => Some(Field::Scale),
            other => ScalarField::ALL
                .iter()
                .copied()
                .find(|f| f.name() == other)
                .map(Field::Scalar),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Field::Position => "position",
            Field::Rotation => "rotation",
            Field::Scale => "scale",
            Field::Scalar(s) => s.name(),
        }
    }

    pub fn kind(self) -> ValueKind {
        match self {
            Field::Position => ValueKind::Vec3,
            Field::Rotation => ValueKind::Quat,
            Field::Scale => ValueKind::Float,
            Field::Scalar(s) => s.kind(),
        }
    }

    pub fn dirty_bit(self) -> DirtyFields {
        match self {
            Field::Position => DirtyFields::POSITION,
            Field::Rotation => DirtyFields::ROTATION,
            Field::Scale => DirtyFields::SCALE,
            Field::Scalar(s) => s.dirty_bit(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Vec3,
    Quat,
    Float,
    Bool,
    Count,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueKind::Vec3 => "vec3",
            ValueKind::Quat => "quat",
            ValueKind::Float => "float",
            ValueKind::Bool => "bool",
            ValueKind::Count => "count",
        };
        f.write_str(s)
    }
}

/// A strongly typed field value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Vec3(Vec3),
    Quat(Quat),
    Float(f32),
    Bool(bool),
    Count(u32),
}

impl FieldValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            FieldValue::Vec3(_) => ValueKind::Vec3,
            FieldValue::Quat(_) => ValueKind::Quat,
            FieldValue::Float(_) => ValueKind::Float,
            FieldValue::Bool(_) => ValueKind::Bool,
            FieldValue::Count(_) => ValueKind::Count,
        }
    }

    pub fn is_finite(&self) -> bool {
        match self {
            FieldValue::Vec3(v) => v.is_finite(),
            FieldValue::Quat(q) => q.is_finite(),
            FieldValue::Float(f) => f.is_finite(),
            FieldValue::Bool(_) | FieldValue::Count(_) => true,
        }
    }
}

bitflags::bitflags! {
    /// Per-field dirty bits. An entity is "dirty" when any bit is set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DirtyFields: u16 {
        const POSITION = 1 << 0;
        const ROTATION = 1 << 1;
        const SCALE = 1 << 2;
        const HEALTH = 1 << 3;
        const STEERING = 1 << 4;
        const CHARGE = 1 << 5;
        const LOCKED = 1 << 6;
        const FILL_COUNT = 1 << 7;

        const TRANSFORM = Self::POSITION.bits() | Self::ROTATION.bits() | Self::SCALE.bits();
        const SCALARS = Self::HEALTH.bits()
            | Self::STEERING.bits()
            | Self::CHARGE.bits()
            | Self::LOCKED.bits()
            | Self::FILL_COUNT.bits();
    }
}

impl Default for DirtyFields {
    fn default() -> Self {
        Self::empty()
    }
}

/// Optional class-specific fields. `None` means the class does not carry it.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScalarFields {
    pub health: Option<f32>,
    pub steering_angle: Option<f32>,
    pub charge: Option<f32>,
    pub locked: Option<bool>,
    pub fill_count: Option<u32>,
}

impl ScalarFields {
    pub fn get(&self, field: ScalarField) -> Option<FieldValue> {
        match field {
            ScalarField::Health => self.health.map(FieldValue::Float),
            ScalarField::SteeringAngle => self.steering_angle.map(FieldValue::Float),
            ScalarField::Charge => self.charge.map(FieldValue::Float),
            ScalarField::Locked => self.locked.map(FieldValue::Bool),
            ScalarField::FillCount => self.fill_count.map(FieldValue::Count),
        }
    }

    fn set(&mut self, field: ScalarField, value: FieldValue) {
        match (field, value) {
            (ScalarField::Health, FieldValue::Float(v)) => self.health = Some(v),
            (ScalarField::SteeringAngle, FieldValue::Float(v)) => self.steering_angle = Some(v),
            (ScalarField::Charge, FieldValue::Float(v)) => self.charge = Some(v),
            (ScalarField::Locked, FieldValue::Bool(v)) => self.locked = Some(v),
            (ScalarField::FillCount, FieldValue::Count(v)) => self.fill_count = Some(v),
            // Kind is checked by the caller.
            _ => {}
        }
    }
}

/// Authoritative state of one entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: f32,
    pub fields: ScalarFields,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: 1.0,
            fields: ScalarFields::default(),
        }
    }
}

impl Snapshot {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_field(mut self, field: ScalarField, value: FieldValue) -> Self {
        self.fields.set(field, value);
        self
    }

    /// Checks every field and normalizes the rotation.
    pub fn validate(mut self) -> Result<Self, SnapshotError> {
        if !self.position.is_finite() {
            return Err(SnapshotError::NonFinite { field: "position" });
        }
        self.rotation = normalize_rotation(self.rotation)?;
        check_scale(self.scale)?;
        for field in ScalarField::ALL {
            if let Some(v) = self.fields.get(field) {
                if !v.is_finite() {
                    return Err(SnapshotError::NonFinite { field: field.name() });
                }
            }
        }
        Ok(self)
    }

    pub fn get(&self, field: Field) -> Option<FieldValue> {
        match field {
            Field::Position => Some(FieldValue::Vec3(self.position)),
            Field::Rotation => Some(FieldValue::Quat(self.rotation)),
            Field::Scale => Some(FieldValue::Float(self.scale)),
            Field::Scalar(s) => self.fields.get(s),
        }
    }

    /// Writes one field. On error `self` is left untouched.
    pub fn set(&mut self, field: Field, value: FieldValue) -> Result<(), SnapshotError> {
        if value.kind() != field.kind() {
            return Err(SnapshotError::KindMismatch {
                field: field.name(),
                expected: field.kind(),
                got: value.kind(),
            });
        }
        if !value.is_finite() {
            return Err(SnapshotError::NonFinite { field: field.name() });
        }
        match (field, value) {
            (Field::Position, FieldValue::Vec3(v)) => self.position = v,
            (Field::Rotation, FieldValue::Quat(q)) => self.rotation = normalize_rotation(q)?,
            (Field::Scale, FieldValue::Float(s)) => {
                check_scale(s)?;
                self.scale = s;
            }
            (Field::Scalar(s), v) => self.fields.set(s, v),
            _ => {}
        }
        Ok(())
    }

    /// Copies the transform (position, rotation, scale) from `other`.
    pub fn copy_transform(&mut self, other: &Snapshot) {
        self.position = other.position;
        self.rotation = other.rotation;
        self.scale = other.scale;
    }
}

fn normalize_rotation(q: Quat) -> Result<Quat, SnapshotError> {
    if !q.is_finite() {
        return Err(SnapshotError::NonFinite { field: "rotation" });
    }
    q.normalized().ok_or(SnapshotError::ZeroRotation)
}

fn check_scale(s: f32) -> Result<(), SnapshotError> {
    if !s.is_finite() {
        return Err(SnapshotError::NonFinite { field: "scale" });
    }
    if s < 0.0 {
        return Err(SnapshotError::NegativeScale);
    }
    Ok(())
}

/// Why a snapshot or field update was rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotError {
    NonFinite {
        field: &'static str,
    },
    ZeroRotation,
    NegativeScale,
    KindMismatch {
        field: &'static str,
        expected: ValueKind,
        got: ValueKind,
    },
    UnknownField(String),
    ProtocolMismatch {
        expected: u32,
        got: u32,
    },
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::NonFinite { field } => write!(f, "non-finite value for {}", field),
            SnapshotError::ZeroRotation => write!(f, "zero-length rotation"),
            SnapshotError::NegativeScale => write!(f, "negative scale"),
            SnapshotError::KindMismatch {
                field,
                expected,
                got,
            } => write!(f, "{} expects {}, got {}", field, expected, got),
            SnapshotError::UnknownField(name) => write!(f, "unknown field '{}'", name),
            SnapshotError::ProtocolMismatch { expected, got } => {
                write!(f, "protocol {} does not match {}", got, expected)
            }
        }
    }
}

impl std::error::Error for SnapshotError {}
