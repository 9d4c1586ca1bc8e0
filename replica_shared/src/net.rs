//! Wire DTOs for the replication channel.
//!
//! Goals:
//! - Keep the wire shape explicit and versionable.
//! - Validate once, at the boundary: everything downstream of
//!   [`NetEvent::validate`] is a strongly typed [`ReplicaEvent`].
//!
//! Transport is not our concern; frames are JSON in `Bytes`.

use std::collections::BTreeMap;

use anyhow::Context;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    entity::EntityId,
    event::OneShot,
    math::{Quat, Vec3},
    snapshot::{Field, FieldValue, ScalarField, Snapshot, SnapshotError, ValueKind},
};

/// Protocol version for compatibility checks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Loosely typed value as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireValue {
    Bool(bool),
    Number(f64),
    Array(Vec<f64>),
}

impl WireValue {
    /// Interprets the value as `kind`.
    pub fn to_field_value(&self, field: &'static str, kind: ValueKind) -> Result<FieldValue, SnapshotError> {
        let mismatch = |got| SnapshotError::KindMismatch {
            field,
            expected: kind,
            got,
        };
        match (kind, self) {
            (ValueKind::Bool, WireValue::Bool(b)) => Ok(FieldValue::Bool(*b)),
            (ValueKind::Float, WireValue::Number(n)) => Ok(FieldValue::Float(*n as f32)),
            (ValueKind::Count, WireValue::Number(n)) => {
                if n.fract() == 0.0 && *n >= 0.0 && *n <= u32::MAX as f64 {
                    Ok(FieldValue::Count(*n as u32))
                } else {
                    Err(mismatch(ValueKind::Float))
                }
            }
            (ValueKind::Vec3, WireValue::Array(a)) if a.len() == 3 => Ok(FieldValue::Vec3(
                Vec3::new(a[0] as f32, a[1] as f32, a[2] as f32),
            )),
            (ValueKind::Quat, WireValue::Array(a)) if a.len() == 4 => Ok(FieldValue::Quat(
                Quat::new(a[0] as f32, a[1] as f32, a[2] as f32, a[3] as f32),
            )),
            (_, WireValue::Bool(_)) => Err(mismatch(ValueKind::Bool)),
            (_, WireValue::Number(_)) => Err(mismatch(ValueKind::Float)),
            (_, WireValue::Array(a)) if a.len() == 4 => Err(mismatch(ValueKind::Quat)),
            (_, WireValue::Array(_)) => Err(mismatch(ValueKind::Vec3)),
        }
    }
}

impl From<FieldValue> for WireValue {
    fn from(v: FieldValue) -> Self {
        match v {
            FieldValue::Vec3(v) => WireValue::Array(vec![v.x as f64, v.y as f64, v.z as f64]),
            FieldValue::Quat(q) => {
                WireValue::Array(vec![q.x as f64, q.y as f64, q.z as f64, q.w as f64])
            }
            FieldValue::Float(f) => WireValue::Number(f as f64),
            FieldValue::Bool(b) => WireValue::Bool(b),
            FieldValue::Count(c) => WireValue::Number(c as f64),
        }
    }
}

/// Full-state payload of an add: transform plus a field map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDto {
    pub position: [f32; 3],
    #[serde(default)]
    pub rotation: Option<[f32; 4]>,
    #[serde(default)]
    pub scale: Option<f32>,
    #[serde(default)]
    pub fields: BTreeMap<String, WireValue>,
}

impl SnapshotDto {
    pub fn from_snapshot(s: &Snapshot) -> Self {
        let mut fields = BTreeMap::new();
        for field in ScalarField::ALL {
            if let Some(v) = s.fields.get(field) {
                fields.insert(field.name().to_string(), WireValue::from(v));
            }
        }
        Self {
            position: [s.position.x, s.position.y, s.position.z],
            rotation: Some([s.rotation.x, s.rotation.y, s.rotation.z, s.rotation.w]),
            scale: Some(s.scale),
            fields,
        }
    }

    /// Converts to a validated [`Snapshot`]. Unknown field names are skipped.
    pub fn validate(&self) -> Result<Snapshot, SnapshotError> {
        let [x, y, z] = self.position;
        let mut snap = Snapshot::at(Vec3::new(x, y, z));
        if let Some([x, y, z, w]) = self.rotation {
            snap.rotation = Quat::new(x, y, z, w);
        }
        if let Some(scale) = self.scale {
            snap.scale = scale;
        }
        let mut snap = snap.validate()?;

        for (name, raw) in &self.fields {
            let field = match Field::from_path(name) {
                Some(Field::Scalar(s)) => s,
                _ => {
                    warn!(field = %name, "Skipping unknown snapshot field");
                    continue;
                }
            };
            let value = raw.to_field_value(field.name(), field.kind())?;
            snap.set(Field::Scalar(field), value)?;
        }
        Ok(snap)
    }
}

/// Lifecycle and field events as they arrive from the replication layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NetEvent {
    Add {
        collection: String,
        id: EntityId,
        snapshot: SnapshotDto,
    },
    Change {
        collection: String,
        id: EntityId,
        field: String,
        value: WireValue,
    },
    Remove {
        collection: String,
        id: EntityId,
    },
    /// Best-effort one-shot fact; not part of continuous state.
    Message {
        collection: String,
        message: OneShot,
    },
}

impl NetEvent {
    pub fn add(collection: &str, id: EntityId, snapshot: &Snapshot) -> Self {
        NetEvent::Add {
            collection: collection.to_string(),
            id,
            snapshot: SnapshotDto::from_snapshot(snapshot),
        }
    }

    pub fn change(collection: &str, id: EntityId, field: Field, value: FieldValue) -> Self {
        NetEvent::Change {
            collection: collection.to_string(),
            id,
            field: field.name().to_string(),
            value: value.into(),
        }
    }

    pub fn remove(collection: &str, id: EntityId) -> Self {
        NetEvent::Remove {
            collection: collection.to_string(),
            id,
        }
    }

    pub fn collection(&self) -> &str {
        match self {
            NetEvent::Add { collection, .. }
            | NetEvent::Change { collection, .. }
            | NetEvent::Remove { collection, .. }
            | NetEvent::Message { collection, .. } => collection,
        }
    }

    /// Validates the payload into a typed event.
    pub fn validate(self) -> Result<ReplicaEvent, SnapshotError> {
        match self {
            NetEvent::Add {
                collection,
                id,
                snapshot,
            } => Ok(ReplicaEvent::Added {
                collection,
                id,
                snapshot: snapshot.validate()?,
            }),
            NetEvent::Change {
                collection,
                id,
                field,
                value,
            } => {
                let resolved = Field::from_path(&field).ok_or(SnapshotError::UnknownField(field))?;
                let value = value.to_field_value(resolved.name(), resolved.kind())?;
                if !value.is_finite() {
                    return Err(SnapshotError::NonFinite {
                        field: resolved.name(),
                    });
                }
                Ok(ReplicaEvent::Changed {
                    collection,
                    id,
                    field: resolved,
                    value,
                })
            }
            NetEvent::Remove { collection, id } => Ok(ReplicaEvent::Removed { collection, id }),
            NetEvent::Message {
                collection,
                message,
            } => Ok(ReplicaEvent::Message {
                collection,
                message,
            }),
        }
    }
}

/// Typed counterpart of [`NetEvent`], produced only by validation.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicaEvent {
    Added {
        collection: String,
        id: EntityId,
        snapshot: Snapshot,
    },
    Changed {
        collection: String,
        id: EntityId,
        field: Field,
        value: FieldValue,
    },
    Removed {
        collection: String,
        id: EntityId,
    },
    Message {
        collection: String,
        message: OneShot,
    },
}

/// Versioned frame wrapping one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEnvelope {
    pub protocol: u32,
    pub event: NetEvent,
}

/// Encodes one event into a frame.
pub fn encode_event(event: &NetEvent) -> anyhow::Result<Bytes> {
    let envelope = WireEnvelope {
        protocol: PROTOCOL_VERSION,
        event: event.clone(),
    };
    let payload = serde_json::to_vec(&envelope).context("serialize event")?;
    Ok(Bytes::from(payload))
}

/// Decodes a frame and checks its protocol version.
pub fn decode_event(b: &[u8]) -> anyhow::Result<NetEvent> {
    let envelope: WireEnvelope = serde_json::from_slice(b).context("deserialize event")?;
    if envelope.protocol != PROTOCOL_VERSION {
        return Err(SnapshotError::ProtocolMismatch {
            expected: PROTOCOL_VERSION,
            got: envelope.protocol,
        })
        .context("decode event");
    }
    Ok(envelope.event)
}
