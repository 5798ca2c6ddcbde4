//! Example payload
//!
//! Stub drivers that only log what they are asked to do, and the assembly of
//! the "Simple Payload": one gimbal, an electro-optical and a thermal camera,
//! a range finder and the configured synthetic streams.

use log::info;
use std::sync::Arc;

use crate::config::{PluginConfig, version};
use crate::error::PayloadResult;
use crate::payload::{
    CameraDevice, CameraDriver, CapabilityDescriptor, DeviceClass, DeviceKind,
    DistanceMeasurement, FeatureFlag, FeatureSet, GimbalDevice, GimbalDriver, Payload,
    RangeFinderDevice, RangeFinderDriver,
};
use crate::stream::Stream;

pub struct SimpleGimbal;

impl GimbalDriver for SimpleGimbal {
    fn set_orientation_angle(&self, roll: f64, pitch: f64, yaw: f64) {
        info!("gimbal: set_orientation_angle({}, {}, {})", roll, pitch, yaw);
    }

    fn set_orientation_speed(&self, roll: f64, pitch: f64, yaw: f64) {
        info!("gimbal: set_orientation_speed({}, {}, {})", roll, pitch, yaw);
    }
}

/// Electro-optical camera
pub struct SimpleEoCamera;

impl SimpleEoCamera {
    pub fn descriptor() -> CapabilityDescriptor {
        CapabilityDescriptor::new(
            DeviceKind::Camera,
            "Standard",
            FeatureSet::empty()
                .with(FeatureFlag::HasZoom)
                .with(FeatureFlag::HasPicture)
                .with(FeatureFlag::HasVideo)
                .with(FeatureFlag::HasGimbalMount),
        )
    }
}

impl CameraDriver for SimpleEoCamera {
    fn set_optical_zoom(&self, level: i32) {
        info!("Standard: set_optical_zoom({})", level);
    }

    fn set_shutter_speed(&self, speed: u32) {
        info!("Standard: set_shutter_speed({})", speed);
    }

    fn start_video_recording(&self) {
        info!("Standard: start_video_recording");
    }

    fn stop_video_recording(&self) {
        info!("Standard: stop_video_recording");
    }

    fn set_focus_position(&self, position: u32) {
        info!("Standard: set_focus_position({})", position);
    }
}

/// Thermal camera; declares no optional features
pub struct SimpleIrCamera;

impl SimpleIrCamera {
    pub fn descriptor() -> CapabilityDescriptor {
        CapabilityDescriptor::new(DeviceKind::InfraredCamera, "Thermal", FeatureSet::empty())
    }
}

impl CameraDriver for SimpleIrCamera {
    fn set_focus_position(&self, position: u32) {
        info!("Thermal: set_focus_position({})", position);
    }
}

/// Range finder reporting a fixed simulated distance
pub struct SimpleRangeFinder {
    pub meters: f64,
}

impl RangeFinderDriver for SimpleRangeFinder {
    fn measure_distance(&self) -> Option<DistanceMeasurement> {
        Some(DistanceMeasurement {
            meters: self.meters,
            confidence: 0.9,
        })
    }
}

/// Assemble the example payload from `config`
pub fn build_payload(config: &PluginConfig) -> PayloadResult<Payload> {
    let mut payload = Payload::new(config.payload_name.as_str(), version(), config.endpoint);

    payload.register_device(
        DeviceClass::Gimbal,
        GimbalDevice::new(
            CapabilityDescriptor::new(DeviceKind::Gimbal, "Simple Gimbal", FeatureSet::empty()),
            Arc::new(SimpleGimbal),
        ),
    )?;
    payload.register_device(
        DeviceClass::Camera,
        CameraDevice::new(SimpleEoCamera::descriptor(), Arc::new(SimpleEoCamera)),
    )?;
    payload.register_device(
        DeviceClass::Camera,
        CameraDevice::new(SimpleIrCamera::descriptor(), Arc::new(SimpleIrCamera)),
    )?;
    payload.register_device(
        DeviceClass::RangeFinder,
        RangeFinderDevice::new(
            CapabilityDescriptor::new(DeviceKind::RangeFinder, "Simple LRF", FeatureSet::empty()),
            Arc::new(SimpleRangeFinder { meters: 120.0 }),
        ),
    )?;

    for stream_config in &config.streams {
        let endpoint = payload.endpoint(stream_config.endpoint_index)?;
        let stream = stream_config.cameras.iter().fold(
            Stream::new(stream_config.name.as_str(), stream_config.description(), endpoint),
            |stream, camera| stream.with_camera(*camera),
        );
        payload.register_stream(stream)?;
    }

    Ok(payload)
}
