//! Rendering abstraction.
//!
//! This crate intentionally does not depend on a graphics backend.
//! These traits are the whole surface the reconciliation core pushes to.

use crate::{
    entity::EntityId,
    math::{Quat, Vec3},
    snapshot::{FieldValue, ScalarField},
};

/// One pooled render object (mesh instance, sprite, ...).
pub trait RenderSurface: Send {
    fn set_transform(&mut self, position: Vec3, rotation: Quat);
    fn set_visible(&mut self, visible: bool);
    fn set_scale(&mut self, scale: f32);
    /// Toggles expensive per-entity effects (trails, particles, lights).
    fn set_effects_enabled(&mut self, _enabled: bool) {}
}

/// Consumer of class-specific fields, e.g. the frame UI that shows slot fill state.
pub trait FieldSink: Send {
    fn on_field(&mut self, id: &EntityId, field: ScalarField, value: FieldValue);
}

/// A no-op surface useful for headless runs.
#[derive(Debug, Default)]
pub struct NullSurface;

impl RenderSurface for NullSurface {
    fn set_transform(&mut self, _position: Vec3, _rotation: Quat) {}
    fn set_visible(&mut self, _visible: bool) {}
    fn set_scale(&mut self, _scale: f32) {}
}

/// Surface that remembers what was pushed to it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSurface {
    /// Allocation serial, stable for the life of the object.
    pub serial: u32,
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: f32,
    pub visible: bool,
    pub effects_enabled: bool,
    pub transform_writes: u64,
}

impl RecordingSurface {
    pub fn new(serial: u32) -> Self {
        Self {
            serial,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: 1.0,
            visible: false,
            effects_enabled: true,
            transform_writes: 0,
        }
    }

    /// Factory closure that hands out increasing serials.
    pub fn factory() -> impl FnMut() -> RecordingSurface + Send {
        let mut next = 0u32;
        move || {
            let s = RecordingSurface::new(next);
            next += 1;
            s
        }
    }
}

impl RenderSurface for RecordingSurface {
    fn set_transform(&mut self, position: Vec3, rotation: Quat) {
        self.position = position;
        self.rotation = rotation;
        self.transform_writes += 1;
    }

    fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    fn set_scale(&mut self, scale: f32) {
        self.scale = scale;
    }

    fn set_effects_enabled(&mut self, enabled: bool) {
        self.effects_enabled = enabled;
    }
}

/// Sink that records deliveries in order.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    pub received: Vec<(EntityId, ScalarField, FieldValue)>,
}

impl FieldSink for RecordingSink {
    fn on_field(&mut self, id: &EntityId, field: ScalarField, value: FieldValue) {
        self.received.push((id.clone(), field, value));
    }
}

impl<S: FieldSink + ?Sized> FieldSink for std::sync::Arc<std::sync::Mutex<S>> {
    fn on_field(&mut self, id: &EntityId, field: ScalarField, value: FieldValue) {
        if let Ok(mut inner) = self.lock() {
            inner.on_field(id, field, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_hands_out_serials() {
        let mut make = RecordingSurface::factory();
        assert_eq!(make().serial, 0);
        assert_eq!(make().serial, 1);
    }
}
