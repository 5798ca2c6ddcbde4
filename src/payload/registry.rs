//! Per-payload device registry
//!
//! Devices are grouped by [`DeviceClass`]. Within a class the registration
//! order is the index handed to the host, index 0 being the default device.
//! Removal leaves a tombstone so the indices of the remaining devices never
//! shift under a stream that references them.

use log::{debug, info};
use uuid::Uuid;

use crate::error::{PayloadError, PayloadResult};
use crate::payload::capability::DeviceClass;
use crate::payload::device::{CameraDevice, Device, GimbalDevice, RangeFinderDevice};

fn not_found(class: DeviceClass, index: usize) -> PayloadError {
    PayloadError::NotFound(format!("{} #{}", class, index))
}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    slots: [Vec<Option<Device>>; 3],
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a device to its class and return its index
    pub fn register(&mut self, class: DeviceClass, device: impl Into<Device>) -> PayloadResult<usize> {
        let device = device.into();

        if device.class() != class {
            return Err(PayloadError::InvalidArgument(format!(
                "'{}' is a {}, not a {}",
                device.name(),
                device.class(),
                class
            )));
        }
        if device.descriptor().kind().class() != class {
            return Err(PayloadError::InvalidArgument(format!(
                "'{}' declares kind {:?} which does not belong to class {}",
                device.name(),
                device.descriptor().kind(),
                class
            )));
        }
        if device.name().trim().is_empty() {
            return Err(PayloadError::InvalidArgument(
                "device name must not be empty".to_string(),
            ));
        }
        if self.contains_id(device.id()) {
            return Err(PayloadError::AlreadyRegistered(device.name().to_string()));
        }

        let slot = &mut self.slots[class.slot()];
        let index = slot.len();
        info!("Registered {} #{}: '{}'", class, index, device.name());
        slot.push(Some(device));
        Ok(index)
    }

    pub fn get(&self, class: DeviceClass, index: usize) -> PayloadResult<&Device> {
        self.slots[class.slot()]
            .get(index)
            .and_then(Option::as_ref)
            .ok_or_else(|| not_found(class, index))
    }

    /// Devices of `class` in registration order; clone the iterator to restart it
    pub fn enumerate(&self, class: DeviceClass) -> impl Iterator<Item = &Device> + Clone + '_ {
        self.slots[class.slot()].iter().flatten()
    }

    /// Number of live devices of `class`
    pub fn len(&self, class: DeviceClass) -> usize {
        self.enumerate(class).count()
    }

    pub fn is_empty(&self) -> bool {
        DeviceClass::ALL.iter().all(|c| self.len(*c) == 0)
    }

    pub fn contains(&self, class: DeviceClass, index: usize) -> bool {
        self.get(class, index).is_ok()
    }

    pub fn contains_id(&self, id: Uuid) -> bool {
        self.slots.iter().flatten().flatten().any(|d| d.id() == id)
    }

    pub fn gimbal(&self, index: usize) -> PayloadResult<&GimbalDevice> {
        self.get(DeviceClass::Gimbal, index)
            .and_then(|d| d.as_gimbal().ok_or_else(|| not_found(DeviceClass::Gimbal, index)))
    }

    pub fn camera(&self, index: usize) -> PayloadResult<&CameraDevice> {
        self.get(DeviceClass::Camera, index)
            .and_then(|d| d.as_camera().ok_or_else(|| not_found(DeviceClass::Camera, index)))
    }

    pub fn range_finder(&self, index: usize) -> PayloadResult<&RangeFinderDevice> {
        self.get(DeviceClass::RangeFinder, index)
            .and_then(|d| d.as_range_finder().ok_or_else(|| not_found(DeviceClass::RangeFinder, index)))
    }

    /// Tombstone a device; callers check stream references first
    pub(crate) fn remove(&mut self, class: DeviceClass, index: usize) -> PayloadResult<Device> {
        let removed = self.slots[class.slot()]
            .get_mut(index)
            .and_then(Option::take)
            .ok_or_else(|| not_found(class, index))?;
        debug!("Removed {} #{}: '{}'", class, index, removed.name());
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::capability::{CapabilityDescriptor, DeviceKind, FeatureSet};
    use crate::payload::device::{CameraDriver, GimbalDriver};
    use std::sync::Arc;

    struct NullCamera;
    impl CameraDriver for NullCamera {}

    struct NullGimbal;
    impl GimbalDriver for NullGimbal {
        fn set_orientation_angle(&self, _: f64, _: f64, _: f64) {}
        fn set_orientation_speed(&self, _: f64, _: f64, _: f64) {}
    }

    fn camera(name: &str) -> CameraDevice {
        CameraDevice::new(
            CapabilityDescriptor::new(DeviceKind::Camera, name, FeatureSet::empty()),
            Arc::new(NullCamera),
        )
    }

    #[test]
    fn test_get_follows_registration_order() {
        let mut registry = DeviceRegistry::new();
        for (expected, name) in ["a", "b", "c"].iter().enumerate() {
            let index = registry.register(DeviceClass::Camera, camera(name)).unwrap();
            assert_eq!(index, expected);
        }

        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            assert_eq!(registry.get(DeviceClass::Camera, i).unwrap().name(), *name);
        }
        assert!(matches!(
            registry.get(DeviceClass::Camera, 3),
            Err(PayloadError::NotFound(_))
        ));
        assert!(registry.get(DeviceClass::Gimbal, 0).is_err());
    }

    #[test]
    fn test_enumerate_is_restartable() {
        let mut registry = DeviceRegistry::new();
        registry.register(DeviceClass::Camera, camera("eo")).unwrap();
        registry.register(DeviceClass::Camera, camera("ir")).unwrap();

        let iter = registry.enumerate(DeviceClass::Camera);
        let first: Vec<_> = iter.clone().map(|d| d.name().to_string()).collect();
        let second: Vec<_> = iter.map(|d| d.name().to_string()).collect();
        assert_eq!(first, vec!["eo", "ir"]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_register_rejects_wrong_class_and_duplicates() {
        let mut registry = DeviceRegistry::new();
        let cam = camera("eo");

        assert!(matches!(
            registry.register(DeviceClass::Gimbal, cam.clone()),
            Err(PayloadError::InvalidArgument(_))
        ));
        registry.register(DeviceClass::Camera, cam.clone()).unwrap();
        assert!(matches!(
            registry.register(DeviceClass::Camera, cam),
            Err(PayloadError::AlreadyRegistered(_))
        ));
        assert!(matches!(
            registry.register(DeviceClass::Camera, camera("  ")),
            Err(PayloadError::InvalidArgument(_))
        ));
        assert_eq!(registry.len(DeviceClass::Camera), 1);
    }

    #[test]
    fn test_kind_must_match_class() {
        let mut registry = DeviceRegistry::new();
        let mislabeled = GimbalDevice::new(
            CapabilityDescriptor::new(DeviceKind::Camera, "odd", FeatureSet::empty()),
            Arc::new(NullGimbal),
        );
        assert!(registry.register(DeviceClass::Gimbal, mislabeled).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_keeps_indices_stable() {
        let mut registry = DeviceRegistry::new();
        registry.register(DeviceClass::Camera, camera("a")).unwrap();
        registry.register(DeviceClass::Camera, camera("b")).unwrap();

        registry.remove(DeviceClass::Camera, 0).unwrap();
        assert!(!registry.contains(DeviceClass::Camera, 0));
        assert!(!registry.camera(1).unwrap().is_infrared());
        assert_eq!(registry.len(DeviceClass::Camera), 1);
        assert!(registry.remove(DeviceClass::Camera, 0).is_err());

        // new devices never reuse a tombstoned index
        let index = registry.register(DeviceClass::Camera, camera("c")).unwrap();
        assert_eq!(index, 2);
    }
}
