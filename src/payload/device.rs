//! Device capability interfaces
//!
//! Drivers implement the small `*Driver` traits. The registry never hands a
//! driver out directly: it is wrapped in a `*Device` that owns the
//! descriptor, assigns identity and enforces the declared feature set before
//! forwarding a call, so a driver only ever sees operations it declared.

use log::debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use crate::error::{PayloadError, PayloadResult};
use crate::payload::capability::{CapabilityDescriptor, DeviceClass, DeviceKind, FeatureFlag};

/// Gimbal actuation
pub trait GimbalDriver: Send + Sync {
    /// Point the gimbal to absolute angles, in degrees
    fn set_orientation_angle(&self, roll: f64, pitch: f64, yaw: f64);

    /// Rotate the gimbal at the given rates, in degrees per second
    fn set_orientation_speed(&self, roll: f64, pitch: f64, yaw: f64);
}

/// Camera control
///
/// Every operation has a no-op default so restricted cameras only implement
/// what they declare; [`CameraDevice`] rejects undeclared operations before
/// they reach the driver.
pub trait CameraDriver: Send + Sync {
    fn set_optical_zoom(&self, _level: i32) {}

    fn set_shutter_speed(&self, _speed: u32) {}

    fn start_video_recording(&self) {}

    fn stop_video_recording(&self) {}

    fn set_focus_position(&self, _position: u32) {}
}

/// A single range measurement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceMeasurement {
    pub meters: f64,
    /// Confidence in `[0, 1]`
    pub confidence: f32,
}

/// Laser range finder
pub trait RangeFinderDriver: Send + Sync {
    /// Returns `None` when no echo was received
    fn measure_distance(&self) -> Option<DistanceMeasurement> {
        None
    }
}

/// Mechanical limits applied to gimbal commands
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GimbalLimits {
    pub max_roll: f64,
    pub max_pitch: f64,
    pub max_yaw: f64,
    pub max_speed: f64,
}

impl Default for GimbalLimits {
    fn default() -> Self {
        Self {
            max_roll: 180.0,
            max_pitch: 90.0,
            max_yaw: 180.0,
            max_speed: 120.0,
        }
    }
}

fn require_finite(operation: &str, values: [f64; 3]) -> PayloadResult<()> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(PayloadError::InvalidArgument(format!(
            "{} requires finite values, got {:?}",
            operation, values
        )))
    }
}

#[derive(Clone)]
pub struct GimbalDevice {
    id: Uuid,
    descriptor: Arc<CapabilityDescriptor>,
    limits: GimbalLimits,
    driver: Arc<dyn GimbalDriver>,
}

impl GimbalDevice {
    pub fn new(descriptor: CapabilityDescriptor, driver: Arc<dyn GimbalDriver>) -> Self {
        Self {
            id: Uuid::new_v4(),
            descriptor: Arc::new(descriptor),
            limits: GimbalLimits::default(),
            driver,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    pub fn with_limits(mut self, limits: GimbalLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn limits(&self) -> GimbalLimits {
        self.limits
    }

    /// Out-of-range angles are clamped to the gimbal limits
    pub fn set_orientation_angle(&self, roll: f64, pitch: f64, yaw: f64) -> PayloadResult<()> {
        require_finite("set_orientation_angle", [roll, pitch, yaw])?;
        let l = &self.limits;
        let clamped = (
            roll.clamp(-l.max_roll, l.max_roll),
            pitch.clamp(-l.max_pitch, l.max_pitch),
            yaw.clamp(-l.max_yaw, l.max_yaw),
        );
        if clamped != (roll, pitch, yaw) {
            debug!(
                "{}: angle ({}, {}, {}) clamped to {:?}",
                self.descriptor.name(),
                roll,
                pitch,
                yaw,
                clamped
            );
        }
        self.driver
            .set_orientation_angle(clamped.0, clamped.1, clamped.2);
        Ok(())
    }

    /// Rates above the gimbal's max speed are clamped
    pub fn set_orientation_speed(&self, roll: f64, pitch: f64, yaw: f64) -> PayloadResult<()> {
        require_finite("set_orientation_speed", [roll, pitch, yaw])?;
        let max = self.limits.max_speed;
        self.driver.set_orientation_speed(
            roll.clamp(-max, max),
            pitch.clamp(-max, max),
            yaw.clamp(-max, max),
        );
        Ok(())
    }
}

#[derive(Clone)]
pub struct CameraDevice {
    id: Uuid,
    descriptor: Arc<CapabilityDescriptor>,
    recording: Arc<AtomicBool>,
    driver: Arc<dyn CameraDriver>,
}

impl CameraDevice {
    pub fn new(descriptor: CapabilityDescriptor, driver: Arc<dyn CameraDriver>) -> Self {
        Self {
            id: Uuid::new_v4(),
            descriptor: Arc::new(descriptor),
            recording: Arc::new(AtomicBool::new(false)),
            driver,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    pub fn is_infrared(&self) -> bool {
        self.descriptor.kind() == DeviceKind::InfraredCamera
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    fn require(&self, operation: &'static str, any_of: &[FeatureFlag]) -> PayloadResult<()> {
        if self.descriptor.supported_features().contains_any(any_of) {
            Ok(())
        } else {
            Err(PayloadError::UnsupportedCapability {
                device: self.descriptor.name().to_string(),
                operation,
                required: any_of.to_vec(),
            })
        }
    }

    pub fn set_optical_zoom(&self, level: i32) -> PayloadResult<()> {
        self.require("set_optical_zoom", &[FeatureFlag::HasZoom])?;
        self.driver.set_optical_zoom(level);
        Ok(())
    }

    pub fn set_shutter_speed(&self, speed: u32) -> PayloadResult<()> {
        self.require(
            "set_shutter_speed",
            &[FeatureFlag::HasPicture, FeatureFlag::HasVideo],
        )?;
        if speed == 0 {
            return Err(PayloadError::InvalidArgument(
                "shutter speed must be non-zero".to_string(),
            ));
        }
        self.driver.set_shutter_speed(speed);
        Ok(())
    }

    pub fn start_video_recording(&self) -> PayloadResult<()> {
        self.require("start_video_recording", &[FeatureFlag::HasVideo])?;
        self.driver.start_video_recording();
        self.recording.store(true, Ordering::Release);
        Ok(())
    }

    pub fn stop_video_recording(&self) -> PayloadResult<()> {
        self.require("stop_video_recording", &[FeatureFlag::HasVideo])?;
        self.driver.stop_video_recording();
        self.recording.store(false, Ordering::Release);
        Ok(())
    }

    /// Focus is a base operation every camera accepts
    pub fn set_focus_position(&self, position: u32) -> PayloadResult<()> {
        self.driver.set_focus_position(position);
        Ok(())
    }
}

#[derive(Clone)]
pub struct RangeFinderDevice {
    id: Uuid,
    descriptor: Arc<CapabilityDescriptor>,
    driver: Arc<dyn RangeFinderDriver>,
}

impl RangeFinderDevice {
    pub fn new(descriptor: CapabilityDescriptor, driver: Arc<dyn RangeFinderDriver>) -> Self {
        Self {
            id: Uuid::new_v4(),
            descriptor: Arc::new(descriptor),
            driver,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    pub fn measure_distance(&self) -> PayloadResult<Option<DistanceMeasurement>> {
        match self.driver.measure_distance() {
            Some(m) if !m.meters.is_finite() || m.meters < 0.0 => {
                Err(PayloadError::InvalidArgument(format!(
                    "{} reported an invalid distance: {}",
                    self.descriptor.name(),
                    m.meters
                )))
            }
            Some(m) => Ok(Some(DistanceMeasurement {
                meters: m.meters,
                confidence: m.confidence.clamp(0.0, 1.0),
            })),
            None => Ok(None),
        }
    }
}

/// Closed set of device variants held by the registry
#[derive(Clone)]
pub enum Device {
    Gimbal(GimbalDevice),
    Camera(CameraDevice),
    RangeFinder(RangeFinderDevice),
}

impl Device {
    pub fn id(&self) -> Uuid {
        match self {
            Device::Gimbal(d) => d.id,
            Device::Camera(d) => d.id,
            Device::RangeFinder(d) => d.id,
        }
    }

    pub fn descriptor(&self) -> &CapabilityDescriptor {
        match self {
            Device::Gimbal(d) => &d.descriptor,
            Device::Camera(d) => &d.descriptor,
            Device::RangeFinder(d) => &d.descriptor,
        }
    }

    pub fn name(&self) -> &str {
        self.descriptor().name()
    }

    /// Class derived from the variant
    pub fn class(&self) -> DeviceClass {
        match self {
            Device::Gimbal(_) => DeviceClass::Gimbal,
            Device::Camera(_) => DeviceClass::Camera,
            Device::RangeFinder(_) => DeviceClass::RangeFinder,
        }
    }

    pub fn as_gimbal(&self) -> Option<&GimbalDevice> {
        match self {
            Device::Gimbal(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_camera(&self) -> Option<&CameraDevice> {
        match self {
            Device::Camera(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_range_finder(&self) -> Option<&RangeFinderDevice> {
        match self {
            Device::RangeFinder(d) => Some(d),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id())
            .field("descriptor", self.descriptor())
            .finish()
    }
}

impl From<GimbalDevice> for Device {
    fn from(d: GimbalDevice) -> Self {
        Device::Gimbal(d)
    }
}

impl From<CameraDevice> for Device {
    fn from(d: CameraDevice) -> Self {
        Device::Camera(d)
    }
}

impl From<RangeFinderDevice> for Device {
    fn from(d: RangeFinderDevice) -> Self {
        Device::RangeFinder(d)
    }
}
