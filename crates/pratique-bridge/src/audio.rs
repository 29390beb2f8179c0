/// Direction of an audio device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceDirection {
    Input,
    Output,
}

/// An audio device as presented to the frontend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDevice {
    /// Host-specific identifier, stable across runs.
    pub id: String,
    /// Human-readable device name.
    pub description: String,
    pub direction: DeviceDirection,
    /// Whether this device is the one stored in the configuration.
    pub selected: bool,
}
