use std::str::FromStr;

use cpal::{
    Device, Host,
    traits::{DeviceTrait, HostTrait},
};

/// Errors that can occur while configuring or creating an audio device stream.
///
/// This error type represents failures that may occur during input or output
/// stream setup, including device discovery, configuration lookup and stream
/// construction.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// Failed to enumerate audio devices. This error occurs when the
    /// underlying audio backend fails to query the list of available devices
    /// for the host.
    #[error("failed to read device's information: {0}")]
    ReadDevices(#[from] cpal::DevicesError),
    /// Failed to construct an audio stream. This error is returned when the
    /// audio backend rejects the requested stream configuration or fails to
    /// initialize the stream.
    #[error("failed to build device stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),
    /// Failed to obtain the device’s default stream configuration. This error
    /// occurs when the device does not support the stream direction or when
    /// the audio backend fails to query the default configuration.
    #[error("failed to build device config: {0}")]
    BuildStreamConfig(#[from] cpal::DefaultStreamConfigError),
    /// Failed to list the configurations supported by the device.
    #[error("failed to read supported device configs: {0}")]
    SupportedConfigs(#[from] cpal::SupportedStreamConfigsError),
    /// The stream was built but the backend refused to start it.
    #[error("failed to start device stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
    /// Failed to parse the provided device ID. It may be incorrect or invalid.
    /// You should refer to CPAL's error for more information.
    #[error("failed to parse device id: {0}")]
    ReadDeviceId(#[from] cpal::DeviceIdError),
    /// The host has no default device for the requested direction.
    #[error("no default {0} device available")]
    NoDefaultDevice(&'static str),
    /// A device with the configured ID is not present on the host anymore.
    #[error("device {0} not found")]
    DeviceNotFound(String),
    /// The thread that owns the stream could not be spawned.
    #[error("failed to spawn stream thread: {0}")]
    SpawnThread(#[from] std::io::Error),
    /// The thread that owns the stream exited before reporting readiness.
    #[error("stream thread exited unexpectedly")]
    StreamThreadExited,
}

/// Represents parsed input audio device belonging to a specific host.
#[derive(Clone)]
pub struct HostInputDevice {
    /// Unique identifier of the device within the host.
    pub id: String,
    /// Human-readable device description.
    pub description: String,

    device: Device,
}

impl std::fmt::Display for HostInputDevice {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{} ({})", self.description, self.id)
    }
}

impl From<Device> for HostInputDevice {
    fn from(device: Device) -> Self {
        let (id, description) = describe(&device);
        Self {
            id,
            description,
            device,
        }
    }
}

impl HostInputDevice {
    /// Returns the default input sample rate and channel count for this device.
    ///
    /// This method queries the device’s default input stream configuration and
    /// returns the sample rate and number of channels selected by the audio
    /// backend as its preferred input settings.
    pub fn sample_rate_and_channels(&self) -> Result<(cpal::SampleRate, u16), DeviceError> {
        let default_input_config = self.device.default_input_config()?;
        Ok((
            default_input_config.sample_rate(),
            default_input_config.channels(),
        ))
    }

    /// Returns a preferred input buffer size adjusted for the target sample rate.
    ///
    /// This method queries the device’s default input stream configuration and
    /// computes a buffer size that is compatible with both the device’s native
    /// sample rate and the requested `target_rate`.
    pub fn target_buffer_size(&self, target_rate: u32) -> Result<u32, DeviceError> {
        let default_input_config = self.device.default_input_config()?;
        let device_buffer_size = match default_input_config.buffer_size() {
            cpal::SupportedBufferSize::Range { max, .. } => (*max).min(super::FIXED_FRAME_COUNT),
            cpal::SupportedBufferSize::Unknown => super::FIXED_FRAME_COUNT,
        };

        // rubato wants a buffer size that is denominated to the ratio between
        // the device rate and the target rate
        let original_sample_rate = default_input_config.sample_rate();
        let rate_denominator = crate::gcd(original_sample_rate, target_rate);
        Ok(crate::find_nearest_to(
            device_buffer_size,
            original_sample_rate / rate_denominator,
        ))
    }
}

/// Represents parsed output audio device belonging to a specific host.
#[derive(Clone)]
pub struct HostOutputDevice {
    /// Unique identifier of the device within the host.
    pub id: String,
    /// Human-readable device description.
    pub description: String,

    device: Device,
}

impl std::fmt::Display for HostOutputDevice {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{} ({})", self.description, self.id)
    }
}

impl From<Device> for HostOutputDevice {
    fn from(device: Device) -> Self {
        let (id, description) = describe(&device);
        Self {
            id,
            description,
            device,
        }
    }
}

impl HostOutputDevice {
    /// Picks an `f32` output configuration, preferring `preferred_rate` when
    /// the device supports it and falling back to the device default.
    pub fn preferred_config(&self, preferred_rate: u32) -> Result<cpal::StreamConfig, DeviceError> {
        let supported = self
            .device
            .supported_output_configs()?
            .filter(|range| range.sample_format() == cpal::SampleFormat::F32)
            .find(|range| {
                range.min_sample_rate() <= preferred_rate && range.max_sample_rate() >= preferred_rate
            });

        if let Some(range) = supported {
            return Ok(range.with_sample_rate(preferred_rate).config());
        }

        log::warn!(
            "Output device {self} does not support {preferred_rate} Hz, using its default config"
        );
        Ok(self.device.default_output_config()?.into())
    }
}

fn describe(device: &Device) -> (String, String) {
    let id = device
        .id()
        .map(|id| id.to_string())
        .unwrap_or_else(|_| String::from("unknown"));
    let description = device
        .description()
        .map(|description| description.to_string())
        .unwrap_or_else(|_| String::from("Unknown device"));
    (id, description)
}

/// Returns a list of all input audio devices available on the given host.
///
/// This function queries the provided [`cpal::Host`] for all input-capable audio
/// devices and returns their identifiers and display names.
pub fn list_host_input_devices(host: &Host) -> Result<Vec<HostInputDevice>, DeviceError> {
    Ok(host.input_devices()?.map(HostInputDevice::from).collect())
}

/// Returns a list of all output audio devices available on the given host.
pub fn list_host_output_devices(host: &Host) -> Result<Vec<HostOutputDevice>, DeviceError> {
    Ok(host.output_devices()?.map(HostOutputDevice::from).collect())
}

/// Resolves the input device to capture from: the configured one when an ID
/// is given, the host default otherwise.
pub fn resolve_input_device(
    host: &Host,
    device_id: Option<&str>,
) -> Result<HostInputDevice, DeviceError> {
    match device_id {
        Some(device_id) => get_device_by_id(host, device_id)?
            .map(HostInputDevice::from)
            .ok_or_else(|| DeviceError::DeviceNotFound(device_id.to_string())),
        None => host
            .default_input_device()
            .map(HostInputDevice::from)
            .ok_or(DeviceError::NoDefaultDevice("input")),
    }
}

/// Resolves the output device to play through: the configured one when an ID
/// is given, the host default otherwise.
pub fn resolve_output_device(
    host: &Host,
    device_id: Option<&str>,
) -> Result<HostOutputDevice, DeviceError> {
    match device_id {
        Some(device_id) => get_device_by_id(host, device_id)?
            .map(HostOutputDevice::from)
            .ok_or_else(|| DeviceError::DeviceNotFound(device_id.to_string())),
        None => host
            .default_output_device()
            .map(HostOutputDevice::from)
            .ok_or(DeviceError::NoDefaultDevice("output")),
    }
}

/// Creates and returns an input audio stream for the given device using its
/// default input configuration.
///
/// This function builds an input stream based on the device’s default input
/// stream configuration and first tries an internally derived fixed buffer
/// size, falling back to the backend's default buffering if the device
/// rejects it. It registers two callbacks:
/// - `callback` is invoked on the audio thread whenever a buffer of input
///   samples becomes available.
/// - `error_callback` is invoked on the audio thread if a runtime stream error
///   occurs.
///
/// # Threading
///
/// Both `callback` and `error_callback` are executed on a real-time audio thread.
/// They must:
/// - Be fast and non-blocking.
/// - Avoid memory allocation.
/// - Avoid locks and I/O.
///
/// Blocking operations in callbacks may cause audio dropouts or undefined
/// behavior.
pub fn open_cpal_input_stream<T>(
    input_device: &HostInputDevice,
    target_rate: u32,
    callback: impl FnMut(&[T]) + Send + 'static,
    error_callback: impl FnMut(cpal::StreamError) + Send + Clone + 'static,
) -> Result<cpal::Stream, DeviceError>
where
    T: cpal::SizedSample + cpal::Sample,
{
    let mut input_config: cpal::StreamConfig = input_device.device.default_input_config()?.into();
    input_config.buffer_size =
        cpal::BufferSize::Fixed(input_device.target_buffer_size(target_rate)?);

    let callback = std::sync::Arc::new(std::sync::Mutex::new(callback));
    let build = |config: &cpal::StreamConfig| {
        let callback = callback.clone();
        input_device.device.build_input_stream(
            config,
            move |data: &[T], _| {
                // uncontended: cpal drives a single callback at a time
                if let Ok(mut callback) = callback.try_lock() {
                    (*callback)(data);
                }
            },
            error_callback.clone(),
            None,
        )
    };

    match build(&input_config) {
        Ok(stream) => Ok(stream),
        Err(cpal::BuildStreamError::StreamConfigNotSupported) => {
            log::warn!("Device {input_device} rejected a fixed buffer size, using the default");
            input_config.buffer_size = cpal::BufferSize::Default;
            Ok(build(&input_config)?)
        }
        Err(err) => Err(err.into()),
    }
}

/// Creates an `f32` output stream on the given device with the provided
/// configuration. The `callback` fills interleaved output buffers on the
/// audio thread, under the same constraints as input callbacks.
pub fn open_cpal_output_stream(
    output_device: &HostOutputDevice,
    config: &cpal::StreamConfig,
    mut callback: impl FnMut(&mut [f32]) + Send + 'static,
    error_callback: impl FnMut(cpal::StreamError) + Send + 'static,
) -> Result<cpal::Stream, DeviceError> {
    Ok(output_device.device.build_output_stream(
        config,
        move |data: &mut [f32], _| callback(data),
        error_callback,
        None,
    )?)
}

/// Retrieves a specific audio device by its unique identifier within a given
/// host.
///
/// Attempts to look up an input or output device using a string
/// representation of its [`cpal::DeviceId`].
pub fn get_device_by_id(host: &Host, device_id: &str) -> Result<Option<Device>, DeviceError> {
    let device_id = cpal::DeviceId::from_str(device_id)?;
    Ok(host.device_by_id(&device_id))
}
