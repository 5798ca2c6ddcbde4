//! Payload aggregate
//!
//! A [`Payload`] owns its device registry and the streams that publish video
//! from the registered cameras. Registration is all-or-nothing: a rejected
//! device or stream leaves the payload exactly as it was.

pub mod capability;
pub mod device;
pub mod registry;

use log::info;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{PayloadError, PayloadResult};
use crate::stream::{Endpoint, EndpointConfig, Stream, StreamExit};

pub use capability::{CapabilityDescriptor, DeviceClass, DeviceKind, FeatureFlag, FeatureSet};
pub use device::{
    CameraDevice, CameraDriver, Device, DistanceMeasurement, GimbalDevice, GimbalDriver,
    GimbalLimits, RangeFinderDevice, RangeFinderDriver,
};
pub use registry::DeviceRegistry;

pub struct Payload {
    name: String,
    version: String,
    endpoints: EndpointConfig,
    registry: DeviceRegistry,
    streams: Vec<Arc<Stream>>,
}

impl Payload {
    pub fn new(name: impl Into<String>, version: impl Into<String>, endpoints: EndpointConfig) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            endpoints,
            registry: DeviceRegistry::new(),
            streams: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn streams(&self) -> &[Arc<Stream>] {
        &self.streams
    }

    pub fn stream(&self, index: usize) -> PayloadResult<&Arc<Stream>> {
        self.streams
            .get(index)
            .ok_or_else(|| PayloadError::NotFound(format!("stream #{}", index)))
    }

    /// The endpoint a stream with `index` sends to
    pub fn endpoint(&self, index: u32) -> PayloadResult<Endpoint> {
        self.endpoints.resolve(index)
    }

    pub fn register_device(&mut self, class: DeviceClass, device: impl Into<Device>) -> PayloadResult<usize> {
        self.registry.register(class, device)
    }

    fn check_cameras(&self, stream: &Stream) -> PayloadResult<()> {
        match stream
            .cameras()
            .iter()
            .find(|index| !self.registry.contains(DeviceClass::Camera, **index))
        {
            Some(index) => Err(PayloadError::DanglingCameraReference {
                stream: stream.name().to_string(),
                index: *index,
                registered: self.registry.len(DeviceClass::Camera),
            }),
            None => Ok(()),
        }
    }

    /// Add a stream and return its index
    pub fn register_stream(&mut self, stream: impl Into<Arc<Stream>>) -> PayloadResult<usize> {
        let stream = stream.into();

        if self.streams.iter().any(|s| s.id() == stream.id()) {
            return Err(PayloadError::AlreadyRegistered(stream.name().to_string()));
        }
        self.check_cameras(&stream)?;

        let endpoint = stream.endpoint();
        if self.endpoint(endpoint.index())? != endpoint {
            return Err(PayloadError::InvalidArgument(format!(
                "stream '{}' endpoint {} does not belong to this payload",
                stream.name(),
                endpoint
            )));
        }
        if let Some(existing) = self
            .streams
            .iter()
            .find(|s| s.endpoint().index() == endpoint.index())
        {
            return Err(PayloadError::DuplicateEndpoint {
                endpoint: endpoint.url(),
                existing: existing.name().to_string(),
            });
        }

        let index = self.streams.len();
        info!(
            "{}: registered stream #{} '{}' on {} with cameras {:?}",
            self.name,
            index,
            stream.name(),
            endpoint,
            stream.cameras()
        );
        self.streams.push(stream);
        Ok(index)
    }

    /// Remove a device, leaving its index unused
    ///
    /// Cameras referenced by a stream with a live graph cannot be removed.
    pub fn remove_device(&mut self, class: DeviceClass, index: usize) -> PayloadResult<Device> {
        if class == DeviceClass::Camera {
            if let Some(stream) = self
                .streams
                .iter()
                .find(|s| s.state().is_active() && s.cameras().contains(&index))
            {
                return Err(PayloadError::DeviceInUse {
                    class,
                    index,
                    stream: stream.name().to_string(),
                });
            }
        }
        self.registry.remove(class, index)
    }

    /// Run stream `index` until `cancel` fires or its graph ends
    pub async fn start_stream<F>(
        &self,
        index: usize,
        on_alive: F,
        cancel: CancellationToken,
    ) -> PayloadResult<StreamExit>
    where
        F: FnOnce(String) + Send + 'static,
    {
        let stream = self.stream(index)?;
        self.check_cameras(stream)?;
        stream.start(on_alive, cancel).await
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Payload")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("registry", &self.registry)
            .field("streams", &self.streams)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineState;

    const DESCRIPTION: &str = "testsrc pattern=snow ! encoder ! udpsink";

    struct NullCamera;
    impl CameraDriver for NullCamera {}

    fn camera(name: &str) -> CameraDevice {
        CameraDevice::new(
            CapabilityDescriptor::new(DeviceKind::Camera, name, FeatureSet::empty()),
            Arc::new(NullCamera),
        )
    }

    fn payload_with_cameras(count: usize) -> Payload {
        let mut payload = Payload::new("test", "1.0", EndpointConfig::default());
        for i in 0..count {
            payload
                .register_device(DeviceClass::Camera, camera(&format!("cam{}", i)))
                .unwrap();
        }
        payload
    }

    fn stream(payload: &Payload, name: &str, endpoint: u32, cameras: &[usize]) -> Stream {
        cameras.iter().fold(
            Stream::new(name, DESCRIPTION, payload.endpoint(endpoint).unwrap()),
            |stream, index| stream.with_camera(*index),
        )
    }

    #[test]
    fn test_dangling_camera_reference() {
        let mut payload = payload_with_cameras(2);
        let bad = stream(&payload, "bad", 0, &[0, 2]);

        assert!(matches!(
            payload.register_stream(bad),
            Err(PayloadError::DanglingCameraReference { index: 2, registered: 2, .. })
        ));
        assert!(payload.streams().is_empty());
    }

    #[test]
    fn test_duplicate_endpoint() {
        let mut payload = payload_with_cameras(1);
        let first = stream(&payload, "first", 0, &[0]);
        let second = stream(&payload, "second", 0, &[0]);

        assert_eq!(payload.register_stream(first).unwrap(), 0);
        assert!(matches!(
            payload.register_stream(second),
            Err(PayloadError::DuplicateEndpoint { ref existing, .. }) if existing == "first"
        ));
        assert_eq!(payload.streams().len(), 1);
    }

    #[test]
    fn test_stream_registered_twice() {
        let mut payload = payload_with_cameras(1);
        let shared = Arc::new(stream(&payload, "twice", 0, &[0]));

        payload.register_stream(shared.clone()).unwrap();
        assert!(matches!(
            payload.register_stream(shared),
            Err(PayloadError::AlreadyRegistered(_))
        ));
    }

    #[test]
    fn test_foreign_endpoint_is_rejected() {
        let mut payload = payload_with_cameras(1);
        let other = EndpointConfig {
            base_port: 9000,
            ..EndpointConfig::default()
        };
        let foreign = Stream::new("foreign", DESCRIPTION, other.resolve(0).unwrap()).with_camera(0);

        assert!(matches!(
            payload.register_stream(foreign),
            Err(PayloadError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_remove_idle_camera() {
        let mut payload = payload_with_cameras(2);
        payload.register_stream(stream(&payload, "s", 0, &[1])).unwrap();

        let removed = payload.remove_device(DeviceClass::Camera, 1).unwrap();
        assert_eq!(removed.name(), "cam1");
        assert_eq!(payload.registry().len(DeviceClass::Camera), 1);
        assert_eq!(payload.registry().camera(0).unwrap().descriptor().name(), "cam0");
    }

    #[tokio::test]
    async fn test_start_revalidates_camera_references() {
        let mut payload = payload_with_cameras(1);
        payload.register_stream(stream(&payload, "s", 0, &[0])).unwrap();
        payload.remove_device(DeviceClass::Camera, 0).unwrap();

        let result = payload
            .start_stream(0, |_| {}, CancellationToken::new())
            .await;
        assert!(matches!(
            result,
            Err(PayloadError::DanglingCameraReference { index: 0, .. })
        ));
        assert_eq!(payload.streams()[0].state(), PipelineState::Idle);

        assert!(matches!(
            payload.start_stream(5, |_| {}, CancellationToken::new()).await,
            Err(PayloadError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_camera_in_use_by_live_stream() {
        let mut payload = payload_with_cameras(2);
        let live = Stream::new(
            "live",
            "testsrc width=8 height=8 ! encoder ! udpsink",
            payload.endpoint(0).unwrap(),
        )
        .with_camera(0);
        payload.register_stream(live).unwrap();

        let stream = payload.streams()[0].clone();
        let cancel = CancellationToken::new();
        let (alive_tx, alive_rx) = tokio::sync::oneshot::channel();
        let handle = stream.spawn(
            move |_| {
                let _ = alive_tx.send(());
            },
            cancel.clone(),
        );
        alive_rx.await.unwrap();

        assert!(matches!(
            payload.remove_device(DeviceClass::Camera, 0),
            Err(PayloadError::DeviceInUse { index: 0, .. })
        ));
        assert!(payload.remove_device(DeviceClass::Camera, 1).is_ok());

        cancel.cancel();
        handle.await.unwrap().unwrap();
        assert!(payload.remove_device(DeviceClass::Camera, 0).is_ok());
    }
}
