//! Device-limit checks run before any source is generated.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::device::DeviceCapabilities;
use crate::statement::NumericType;

/// Launch shape shared by every kernel template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KernelParameters {
    pub simd_width: u32,
    pub local_size_0: u32,
    pub local_size_1: u32,
    pub num_kernels: u32,
}

impl KernelParameters {
    pub fn new(simd_width: u32, local_size_0: u32, local_size_1: u32, num_kernels: u32) -> Self {
        Self {
            simd_width,
            local_size_0,
            local_size_1,
            num_kernels,
        }
    }

    pub fn work_group_size(&self) -> usize {
        (self.local_size_0 as usize).saturating_mul(self.local_size_1 as usize)
    }
}

/// Outcome of validating a parameter set. Every value except `Valid` names
/// the first rule the parameters violate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateStatus {
    Valid,
    LocalMemoryOverflow,
    WorkGroupSizeOverflow,
    LocalSize0Overflow,
    LocalSize1Overflow,
    LocalSizeNotWarpMultiple,
    InvalidSimdWidth,
    InvalidFetchingPolicy,
    LocalSizeNotPowerOfTwo,
    UnsupportedLocalSize1,
}

impl TemplateStatus {
    pub fn is_valid(self) -> bool {
        self == TemplateStatus::Valid
    }
}

impl fmt::Display for TemplateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TemplateStatus::Valid => "valid",
            TemplateStatus::LocalMemoryOverflow => "local memory overflow",
            TemplateStatus::WorkGroupSizeOverflow => "work group size overflow",
            TemplateStatus::LocalSize0Overflow => "local size 0 overflow",
            TemplateStatus::LocalSize1Overflow => "local size 1 overflow",
            TemplateStatus::LocalSizeNotWarpMultiple => "local size not a warp multiple",
            TemplateStatus::InvalidSimdWidth => "invalid simd width",
            TemplateStatus::InvalidFetchingPolicy => "invalid fetching policy",
            TemplateStatus::LocalSizeNotPowerOfTwo => "local size not a power of two",
            TemplateStatus::UnsupportedLocalSize1 => "unsupported local size 1",
        };
        f.write_str(text)
    }
}

pub const SUPPORTED_SIMD_WIDTHS: [u32; 5] = [1, 2, 4, 8, 16];

/// Applies the generic device rules in order; the first violated rule wins.
/// Shape-specific rules are layered on top by the template.
pub fn check_parameters(
    params: &KernelParameters,
    numeric_type: NumericType,
    device: &DeviceCapabilities,
    local_elements: usize,
) -> TemplateStatus {
    let status = if numeric_type.size_of().saturating_mul(local_elements) > device.local_mem_size
    {
        TemplateStatus::LocalMemoryOverflow
    } else if params.work_group_size() > device.max_work_group_size {
        TemplateStatus::WorkGroupSizeOverflow
    } else if params.local_size_0 as usize > device.max_work_item_size(0) {
        TemplateStatus::LocalSize0Overflow
    } else if params.local_size_1 as usize > device.max_work_item_size(1) {
        TemplateStatus::LocalSize1Overflow
    } else if params.work_group_size() % device.warp_size() != 0 {
        TemplateStatus::LocalSizeNotWarpMultiple
    } else if !SUPPORTED_SIMD_WIDTHS.contains(&params.simd_width) {
        TemplateStatus::InvalidSimdWidth
    } else {
        TemplateStatus::Valid
    };
    trace!(?params, ?numeric_type, local_elements, %status, "checked kernel parameters");
    status
}
