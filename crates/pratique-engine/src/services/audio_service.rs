use pratique_audio::device::{DeviceError, list_host_input_devices, list_host_output_devices};
use pratique_bridge::{
    MessageFromEngine,
    audio::{AudioDevice, DeviceDirection},
    config::AudioDeviceConfig,
    notification::NotificationType,
};

fn collect_devices(
    host: &cpal::Host,
    selection: &AudioDeviceConfig,
) -> Result<Vec<AudioDevice>, DeviceError> {
    let inputs = list_host_input_devices(host)?.into_iter().map(|device| AudioDevice {
        selected: selection.selected_input_device_id.as_deref() == Some(device.id.as_str()),
        id: device.id,
        description: device.description,
        direction: DeviceDirection::Input,
    });
    let outputs = list_host_output_devices(host)?.into_iter().map(|device| AudioDevice {
        selected: selection.selected_output_device_id.as_deref() == Some(device.id.as_str()),
        id: device.id,
        description: device.description,
        direction: DeviceDirection::Output,
    });
    Ok(inputs.chain(outputs).collect())
}

/// Handles an incoming audio devices list request (see
/// [`pratique_bridge::MessageToEngine::AudioDevicesListRequest`]).
pub async fn handle_audio_devices_list_request(context: super::AppContextHandle) {
    let (selection, host) = {
        let state = context.state.read().await;
        (state.config.audio_device_config.clone(), state.active_host.clone())
    };

    match collect_devices(&host, &selection) {
        Ok(devices) => {
            context
                .send(MessageFromEngine::AudioDevicesListResponse(devices))
                .await;
        }
        Err(err) => {
            log::error!("Failed to list audio devices: {err}");
            context
                .send_notification(NotificationType::Error, "Não foi possível listar os dispositivos de áudio.")
                .await;
        }
    }
}

/// Handles an audio device selection request and persists it to config. The
/// direction is inferred from the host's device lists.
pub async fn handle_audio_device_selection(context: super::AppContextHandle, id: String) {
    let (selection, host) = {
        let state = context.state.read().await;
        (state.config.audio_device_config.clone(), state.active_host.clone())
    };

    let direction = match collect_devices(&host, &selection) {
        Ok(devices) => devices
            .into_iter()
            .find(|device| device.id == id)
            .map(|device| device.direction),
        Err(err) => {
            log::error!("Failed to list audio devices: {err}");
            None
        }
    };

    let Some(direction) = direction else {
        log::error!("Could not find the target device at {id}");
        context
            .send_notification(NotificationType::Error, "Dispositivo de áudio não encontrado.")
            .await;
        return;
    };

    let mut state = context.state.write().await;
    match direction {
        DeviceDirection::Input => state.config.audio_device_config.selected_input_device_id = Some(id),
        DeviceDirection::Output => state.config.audio_device_config.selected_output_device_id = Some(id),
    }

    // persist the updated selection so it is remembered across runs
    if let Err(err) = crate::config::save_config(&state.config).await {
        log::error!("Failed to persist the selected device: {err}");
    }
}
