//! Audio input device enumeration.

use serde::{Deserialize, Serialize};

/// Metadata about an audio input device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    /// Whether this is the system default input device.
    pub is_default: bool,
    /// Whether the device can open at the requested rate without resampling.
    pub supports_rate: bool,
}

/// List available input devices, default first.
///
/// `sample_rate` is only used to fill in [`DeviceInfo::supports_rate`].
/// Returns an empty `Vec` if cpal is not available or no devices exist.
#[cfg(feature = "audio-cpal")]
pub fn list_input_devices(sample_rate: u32) -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let devices = match host.input_devices() {
        Ok(devices) => devices,
        Err(e) => {
            tracing::warn!("failed to enumerate input devices: {e}");
            return default_name
                .map(|name| {
                    vec![DeviceInfo {
                        name,
                        is_default: true,
                        supports_rate: false,
                    }]
                })
                .unwrap_or_default();
        }
    };

    let mut list = devices
        .enumerate()
        .map(|(idx, device)| {
            let name = device
                .name()
                .unwrap_or_else(|_| format!("Input Device {}", idx + 1));
            let supports_rate = device
                .supported_input_configs()
                .map(|mut ranges| {
                    ranges.any(|r| {
                        r.min_sample_rate().0 <= sample_rate && r.max_sample_rate().0 >= sample_rate
                    })
                })
                .unwrap_or(false);
            DeviceInfo {
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                supports_rate,
            }
        })
        .collect::<Vec<_>>();

    sort_devices(&mut list);
    list
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices(_sample_rate: u32) -> Vec<DeviceInfo> {
    vec![]
}

/// Default device first, then devices that need no resampling, then by name.
pub fn sort_devices(list: &mut [DeviceInfo]) {
    list.sort_by_key(|d| (!d.is_default, !d.supports_rate, d.name.to_ascii_lowercase()));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, is_default: bool, supports_rate: bool) -> DeviceInfo {
        DeviceInfo {
            name: name.into(),
            is_default,
            supports_rate,
        }
    }

    #[test]
    fn default_device_sorts_first() {
        let mut list = vec![
            info("b usb mic", false, true),
            info("Headset", false, false),
            info("Built-in", true, false),
            info("A array", false, true),
        ];
        sort_devices(&mut list);
        let names: Vec<_> = list.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["Built-in", "A array", "b usb mic", "Headset"]);
    }
}
