//! Persisted device preference → available device.

use crate::device::{DeviceInfo, DevicePreference};

/// Id used when no device is known at all.
pub const DEFAULT_DEVICE_ID: &str = "default";

/// Pick the device id to open for `preference`.
///
/// Label matches win over id matches because ids of some hosts change between
/// sessions while labels do not. Never fails: when nothing matches (or the
/// label is ambiguous) the platform default is returned.
pub fn resolve(preference: &DevicePreference, available: &[DeviceInfo]) -> String {
    if let Some(label) = preference.label.as_deref() {
        let matches: Vec<&DeviceInfo> = available.iter().filter(|d| d.label == label).collect();
        match matches.as_slice() {
            [only] => return only.id.clone(),
            [] => {}
            several => {
                tracing::warn!(label, count = several.len(), "several devices share the saved label, using default");
                return default_id(available);
            }
        }
    }

    if let Some(id) = preference.id.as_deref() {
        if let Some(device) = available.iter().find(|d| d.id == id) {
            return device.id.clone();
        }
        tracing::debug!(id, "saved device not present, using default");
    }

    default_id(available)
}

/// The device flagged default, else the first one, else [`DEFAULT_DEVICE_ID`].
pub fn default_id(available: &[DeviceInfo]) -> String {
    available
        .iter()
        .find(|d| d.is_default)
        .or_else(|| available.first())
        .map(|d| d.id.clone())
        .unwrap_or_else(|| DEFAULT_DEVICE_ID.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str, label: &str, is_default: bool) -> DeviceInfo {
        DeviceInfo {
            id: id.into(),
            label: label.into(),
            is_default,
            sample_rate: 48_000,
            channels: 2,
        }
    }

    fn devices() -> Vec<DeviceInfo> {
        vec![
            device("builtin", "Speakers", true),
            device("usb-1", "USB Audio", false),
            device("usb-2", "USB Audio", false),
            device("hdmi", "HDMI", false),
        ]
    }

    fn pref(id: Option<&str>, label: Option<&str>) -> DevicePreference {
        DevicePreference {
            id: id.map(Into::into),
            label: label.map(Into::into),
        }
    }

    #[test]
    fn label_beats_id() {
        assert_eq!(resolve(&pref(Some("builtin"), Some("HDMI")), &devices()), "hdmi");
    }

    #[test]
    fn falls_back_to_id() {
        assert_eq!(resolve(&pref(Some("hdmi"), Some("Gone")), &devices()), "hdmi");
    }

    #[test]
    fn ambiguous_label_without_id_goes_default() {
        assert_eq!(resolve(&pref(None, Some("USB Audio")), &devices()), "builtin");
    }

    #[test]
    fn ambiguous_label_ignores_saved_id() {
        assert_eq!(resolve(&pref(Some("usb-2"), Some("USB Audio")), &devices()), "builtin");
    }

    #[test]
    fn nothing_saved_or_matching() {
        assert_eq!(resolve(&DevicePreference::default(), &devices()), "builtin");
        assert_eq!(resolve(&pref(Some("x"), None), &devices()), "builtin");
        let no_default = vec![device("a", "A", false), device("b", "B", false)];
        assert_eq!(resolve(&DevicePreference::default(), &no_default), "a");
        assert_eq!(resolve(&DevicePreference::default(), &[]), DEFAULT_DEVICE_ID);
    }
}
