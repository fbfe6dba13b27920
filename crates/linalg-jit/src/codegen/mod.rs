//! Source-text emission shared by every kernel shape.

mod fetch;
mod prototype;
mod stream;

pub use fetch::{
    contiguous_range, element_wise_loop_1d, fetching_loop_info, simd_split, strided_indices,
    FetchPolicy, LoopBounds,
};
pub use prototype::generate_prototype;
pub use stream::KernelSourceStream;

/// OpenCL spelling of a `width`-wide vector of `scalar_type`.
pub fn vector_type(scalar_type: &str, width: u32) -> String {
    if width > 1 {
        format!("{scalar_type}{width}")
    } else {
        scalar_type.to_string()
    }
}
