//! Capability descriptors
//!
//! Every device carries an immutable [`CapabilityDescriptor`] naming its kind
//! and the features it supports. Restricted variants (an infrared camera
//! without zoom) are expressed through the feature set, not through a
//! separate type.

use std::fmt;

/// Optional features a device may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureFlag {
    HasZoom,
    HasPicture,
    HasVideo,
    HasGimbalMount,
}

impl FeatureFlag {
    const ALL: [FeatureFlag; 4] = [
        FeatureFlag::HasZoom,
        FeatureFlag::HasPicture,
        FeatureFlag::HasVideo,
        FeatureFlag::HasGimbalMount,
    ];

    fn bit(self) -> u8 {
        match self {
            FeatureFlag::HasZoom => 1 << 0,
            FeatureFlag::HasPicture => 1 << 1,
            FeatureFlag::HasVideo => 1 << 2,
            FeatureFlag::HasGimbalMount => 1 << 3,
        }
    }
}

/// Set of [`FeatureFlag`]s
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct FeatureSet(u8);

impl FeatureSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn with(mut self, flag: FeatureFlag) -> Self {
        self.0 |= flag.bit();
        self
    }

    pub fn contains(&self, flag: FeatureFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    /// True if at least one of `flags` is present
    pub fn contains_any(&self, flags: &[FeatureFlag]) -> bool {
        flags.iter().any(|f| self.contains(*f))
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = FeatureFlag> + '_ {
        FeatureFlag::ALL.into_iter().filter(|f| self.contains(*f))
    }
}

impl FromIterator<FeatureFlag> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = FeatureFlag>>(iter: I) -> Self {
        iter.into_iter().fold(FeatureSet::empty(), FeatureSet::with)
    }
}

impl fmt::Debug for FeatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Concrete device kind as declared by a driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Gimbal,
    Camera,
    InfraredCamera,
    RangeFinder,
}

impl DeviceKind {
    /// Registry grouping this kind belongs to
    pub fn class(self) -> DeviceClass {
        match self {
            DeviceKind::Gimbal => DeviceClass::Gimbal,
            DeviceKind::Camera | DeviceKind::InfraredCamera => DeviceClass::Camera,
            DeviceKind::RangeFinder => DeviceClass::RangeFinder,
        }
    }
}

/// Registry grouping; indices are assigned per class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceClass {
    Gimbal,
    Camera,
    RangeFinder,
}

impl DeviceClass {
    pub const ALL: [DeviceClass; 3] = [
        DeviceClass::Gimbal,
        DeviceClass::Camera,
        DeviceClass::RangeFinder,
    ];

    pub(crate) fn slot(self) -> usize {
        match self {
            DeviceClass::Gimbal => 0,
            DeviceClass::Camera => 1,
            DeviceClass::RangeFinder => 2,
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceClass::Gimbal => write!(f, "gimbal"),
            DeviceClass::Camera => write!(f, "camera"),
            DeviceClass::RangeFinder => write!(f, "range finder"),
        }
    }
}

/// Immutable description of what a device is and what it can do
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityDescriptor {
    kind: DeviceKind,
    name: String,
    supported_features: FeatureSet,
}

impl CapabilityDescriptor {
    pub fn new(kind: DeviceKind, name: impl Into<String>, supported_features: FeatureSet) -> Self {
        Self {
            kind,
            name: name.into(),
            supported_features,
        }
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn supported_features(&self) -> FeatureSet {
        self.supported_features
    }

    pub fn supports(&self, flag: FeatureFlag) -> bool {
        self.supported_features.contains(flag)
    }
}
