//! Partitioning of a 1-D iteration space across work items.
//!
//! Every generated loop is driven by a `(domain_id, domain_size)` pair, for
//! example `get_global_id(0)` and `get_global_size(0)`. The host-side mirrors
//! at the bottom of this module compute the same index sets on the CPU.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{GeneratorError, GeneratorResult};

use super::KernelSourceStream;

/// How work items divide an index range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchPolicy {
    /// Operands are staged through local memory by the kernel shape itself.
    FromLocal,
    /// Work item `k` visits `start + k`, `start + k + domain_size`, ...
    FromGlobalStrided,
    /// Work item `k` visits one contiguous chunk of `ceil(len / domain_size)`.
    FromGlobalContiguous,
}

/// `for (i = init; i < upper_bound; i += inc)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopBounds {
    pub init: String,
    pub upper_bound: String,
    pub inc: String,
}

fn offset(start: &str, value: &str) -> String {
    if start == "0" {
        value.to_string()
    } else {
        format!("{start} + {value}")
    }
}

fn span(start: &str, bound: &str) -> String {
    if start == "0" {
        bound.to_string()
    } else {
        format!("{bound} - {}", atom(start))
    }
}

/// True for names, literals and calls such as `get_global_size(0)`, which
/// need no parentheses next to `*` or `/`.
fn is_atomic(expr: &str) -> bool {
    let head = expr.find('(').unwrap_or(expr.len());
    if !expr[..head]
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return false;
    }
    if head == expr.len() {
        return !expr.is_empty();
    }
    let mut level = 0usize;
    for (pos, c) in expr[head..].char_indices() {
        match c {
            '(' => level += 1,
            ')' => {
                level = level.saturating_sub(1);
                if level == 0 {
                    return head + pos + 1 == expr.len();
                }
            }
            _ => {}
        }
    }
    false
}

fn atom(expr: &str) -> String {
    if is_atomic(expr) {
        expr.to_string()
    } else {
        format!("({expr})")
    }
}

/// Loop bounds covering `[start, bound)` for one work item. The contiguous
/// policy declares `chunk_size`, `chunk_start` and `chunk_end` in `stream`.
pub fn fetching_loop_info(
    policy: FetchPolicy,
    start: &str,
    bound: &str,
    stream: &mut KernelSourceStream,
    domain_id: &str,
    domain_size: &str,
) -> GeneratorResult<LoopBounds> {
    match policy {
        FetchPolicy::FromGlobalStrided => Ok(LoopBounds {
            init: offset(start, domain_id),
            upper_bound: bound.to_string(),
            inc: domain_size.to_string(),
        }),
        FetchPolicy::FromGlobalContiguous => {
            stream.line(&format!(
                "unsigned int chunk_size = ({} + {domain_size} - 1)/{};",
                span(start, bound),
                atom(domain_size)
            ));
            stream.line(&format!(
                "unsigned int chunk_start = {};",
                offset(start, &format!("{}*chunk_size", atom(domain_id)))
            ));
            stream.line(&format!(
                "unsigned int chunk_end = min(chunk_start + chunk_size, {bound});"
            ));
            Ok(LoopBounds {
                init: "chunk_start".to_string(),
                upper_bound: "chunk_end".to_string(),
                inc: "1".to_string(),
            })
        }
        FetchPolicy::FromLocal => Err(GeneratorError::template_mismatch(
            "local-memory fetching has no generic loop form",
        )),
    }
}

#[allow(clippy::too_many_arguments)]
fn emit_loop<F>(
    stream: &mut KernelSourceStream,
    body: &mut F,
    policy: FetchPolicy,
    width: u32,
    i: &str,
    start: &str,
    bound: &str,
    domain_id: &str,
    domain_size: &str,
) -> GeneratorResult<()>
where
    F: FnMut(&mut KernelSourceStream, u32) -> GeneratorResult<()>,
{
    let scoped = policy == FetchPolicy::FromGlobalContiguous;
    if scoped {
        stream.line("{").inc_tab();
    }
    let bounds = fetching_loop_info(policy, start, bound, stream, domain_id, domain_size)?;
    stream.line(&format!(
        "for (unsigned int {i} = {}; {i} < {}; {i} += {}) {{",
        bounds.init, bounds.upper_bound, bounds.inc
    ));
    stream.inc_tab();
    body(stream, width)?;
    stream.dec_tab().line("}");
    if scoped {
        stream.dec_tab().line("}");
    }
    Ok(())
}

/// Emits a loop over `[0, bound)` that processes `simd_width` elements per
/// iteration, followed by a scalar loop over the remainder when
/// `simd_width > 1`. `body` receives the width of the element `i` addresses.
#[allow(clippy::too_many_arguments)]
pub fn element_wise_loop_1d<F>(
    stream: &mut KernelSourceStream,
    mut body: F,
    policy: FetchPolicy,
    simd_width: u32,
    i: &str,
    bound: &str,
    domain_id: &str,
    domain_size: &str,
) -> GeneratorResult<()>
where
    F: FnMut(&mut KernelSourceStream, u32) -> GeneratorResult<()>,
{
    if simd_width == 0 {
        return Err(GeneratorError::template_mismatch("simd width must be positive"));
    }
    if simd_width == 1 {
        return emit_loop(
            stream,
            &mut body,
            policy,
            1,
            i,
            "0",
            bound,
            domain_id,
            domain_size,
        );
    }

    let wide_bound = format!("{}/{simd_width}", atom(bound));
    emit_loop(
        stream,
        &mut body,
        policy,
        simd_width,
        i,
        "0",
        &wide_bound,
        domain_id,
        domain_size,
    )?;
    let tail_start = format!("({wide_bound})*{simd_width}");
    emit_loop(
        stream,
        &mut body,
        policy,
        1,
        i,
        &tail_start,
        bound,
        domain_id,
        domain_size,
    )
}

/// Indices of `[start, end)` visited by work item `domain_id` under
/// [`FetchPolicy::FromGlobalStrided`].
pub fn strided_indices(
    domain_id: usize,
    domain_size: usize,
    start: usize,
    end: usize,
) -> Vec<usize> {
    if domain_size == 0 {
        return Vec::new();
    }
    (start.saturating_add(domain_id)..end)
        .step_by(domain_size)
        .collect()
}

/// Chunk of `[start, end)` owned by work item `domain_id` under
/// [`FetchPolicy::FromGlobalContiguous`].
pub fn contiguous_range(
    domain_id: usize,
    domain_size: usize,
    start: usize,
    end: usize,
) -> Range<usize> {
    if domain_size == 0 || end <= start {
        return end..end;
    }
    let chunk_size = (end - start).div_ceil(domain_size);
    let chunk_start = domain_id
        .checked_mul(chunk_size)
        .and_then(|offset| offset.checked_add(start))
        .map_or(end, |value| value.min(end));
    let chunk_end = chunk_start.saturating_add(chunk_size).min(end);
    chunk_start..chunk_end
}

/// Splits `[0, n)` into the wide range (counted in `width`-element units) and
/// the scalar tail (counted in elements).
pub fn simd_split(n: usize, width: usize) -> (Range<usize>, Range<usize>) {
    let width = width.max(1);
    let wide = n / width;
    (0..wide, wide * width..n)
}
