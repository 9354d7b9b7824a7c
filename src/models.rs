use crate::config::DeviceConfig;
use std::collections::HashMap;

/// Parsed values of one device fetch, keyed by measurement name.
pub type MeasurementMap = HashMap<String, f64>;

/// All configured entries for one physical device, read with a single fetch.
#[derive(Debug, Clone)]
pub struct DeviceGroup<'a> {
    pub device_id: &'a str,
    pub entries: Vec<&'a DeviceConfig>,
}

impl<'a> DeviceGroup<'a> {
    /// Distinct measurement names, in the order they first appear.
    pub fn measurements(&self) -> Vec<&'a str> {
        let mut names: Vec<&'a str> = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            if !names.contains(&entry.measurement.as_str()) {
                names.push(entry.measurement.as_str());
            }
        }
        names
    }
}

/// Groups entries by device id. Groups keep first-occurrence order and entries keep
/// their relative order within a group.
pub fn group_devices(devices: &[DeviceConfig]) -> Vec<DeviceGroup<'_>> {
    let mut groups: Vec<DeviceGroup<'_>> = Vec::new();
    for device in devices {
        match groups.iter_mut().find(|g| g.device_id == device.device_id) {
            Some(group) => group.entries.push(device),
            None => groups.push(DeviceGroup {
                device_id: &device.device_id,
                entries: vec![device],
            }),
        }
    }
    groups
}
