//! Audio input device enumeration.

use serde::{Deserialize, Serialize};

/// One selectable audio input.
///
/// `index` is the device's position in the host's enumeration order, which
/// is also what `AudioSource::Device { index }` addresses. The list is
/// therefore never re-sorted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Enumeration index used in source descriptors (`device:N`).
    pub index: usize,
    /// Name the OS reports for the device.
    pub name: String,
    /// True for the host's default input.
    pub is_default: bool,
}

/// Enumerate the host's audio inputs.
///
/// Returns an empty `Vec` if cpal is unavailable or no devices exist.
#[cfg(feature = "audio-device")]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    match host.input_devices() {
        Ok(devices) => devices
            .enumerate()
            .map(|(index, device)| {
                let name = device
                    .name()
                    .unwrap_or_else(|_| format!("Input Device {}", index + 1));
                let is_default = default_name.as_deref() == Some(name.as_str());
                DeviceInfo {
                    index,
                    name,
                    is_default,
                }
            })
            .collect(),
        Err(e) => {
            tracing::warn!("failed to enumerate input devices: {e}");
            if let Some(default) = host.default_input_device() {
                let name = default
                    .name()
                    .unwrap_or_else(|_| "Default Input Device".to_string());
                vec![DeviceInfo {
                    index: 0,
                    name,
                    is_default: true,
                }]
            } else {
                vec![]
            }
        }
    }
}

#[cfg(not(feature = "audio-device"))]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    vec![]
}

#[cfg(test)]
mod tests {
    use super::DeviceInfo;

    #[test]
    fn device_info_serializes_camel_case() {
        let info = DeviceInfo {
            index: 2,
            name: "USB Audio".to_string(),
            is_default: true,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["index"], 2);
        assert_eq!(json["name"], "USB Audio");
        assert_eq!(json["isDefault"], true);
    }
}
