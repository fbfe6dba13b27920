//! Hardware limits a kernel shape is validated against.

use serde::{Deserialize, Serialize};

use crate::error::{GeneratorError, GeneratorResult};

/// PCI vendor id reported by AMD devices.
pub const AMD_VENDOR_ID: u32 = 4098;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Cpu,
    Gpu,
    Accelerator,
    Other,
}

/// Snapshot of the device queries the validity checker needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    /// Local memory per work group, in bytes.
    pub local_mem_size: usize,
    pub max_work_group_size: usize,
    /// Per-dimension work-item limits; at least two entries are expected.
    pub max_work_item_sizes: Vec<usize>,
    pub device_class: DeviceClass,
    #[serde(default)]
    pub vendor_id: u32,
}

impl DeviceCapabilities {
    pub fn from_json(json: &str) -> GeneratorResult<Self> {
        serde_json::from_str(json)
            .map_err(|err| GeneratorError::runtime(format!("invalid device description: {err}")))
    }

    /// Work-item limit along `dim`. Dimensions the device does not report
    /// admit no work items.
    pub fn max_work_item_size(&self, dim: usize) -> usize {
        self.max_work_item_sizes.get(dim).copied().unwrap_or(0)
    }

    /// Scheduling granularity a work group size should be a multiple of.
    pub fn warp_size(&self) -> usize {
        match (self.device_class, self.vendor_id) {
            (DeviceClass::Gpu, AMD_VENDOR_ID) => 64,
            (DeviceClass::Gpu, _) => 32,
            _ => 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warp_size_by_class_and_vendor() {
        let mut device = DeviceCapabilities {
            local_mem_size: 32 * 1024,
            max_work_group_size: 1024,
            max_work_item_sizes: vec![1024, 1024, 64],
            device_class: DeviceClass::Cpu,
            vendor_id: AMD_VENDOR_ID,
        };
        assert_eq!(device.warp_size(), 8);
        device.device_class = DeviceClass::Gpu;
        assert_eq!(device.warp_size(), 64);
        device.vendor_id = 0x10de;
        assert_eq!(device.warp_size(), 32);
    }

    #[test]
    fn parses_json_description() {
        let device = DeviceCapabilities::from_json(
            r#"{
                "local_mem_size": 49152,
                "max_work_group_size": 1024,
                "max_work_item_sizes": [1024, 1024],
                "device_class": "gpu"
            }"#,
        )
        .unwrap();
        assert_eq!(device.vendor_id, 0);
        assert_eq!(device.max_work_item_size(1), 1024);
        assert_eq!(device.max_work_item_size(2), 0);
        assert!(DeviceCapabilities::from_json("{}").is_err());
    }
}
