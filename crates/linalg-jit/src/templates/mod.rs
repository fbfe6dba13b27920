//! Concrete kernel shapes.

mod reduction;
mod vector_axpy;

pub use reduction::{ReductionParameters, ScalarReductionTemplate};
pub use vector_axpy::{VectorAxpyParameters, VectorAxpyTemplate};

use crate::error::{GeneratorError, GeneratorResult};
use crate::mapped::{MappedKind, MappedObject};
use crate::mapping::Mapping;
use crate::statement::{NodePosition, NumericType, OperatorKind, Slot, Statement};

const LOCAL_ID: &str = "get_local_id(0)";
const GLOBAL_ID: &str = "get_global_id(0)";
const GLOBAL_SIZE: &str = "get_global_size(0)";

fn mapped_at(
    mapping: &Mapping,
    index: usize,
    position: NodePosition,
) -> GeneratorResult<&MappedObject> {
    mapping.get(&(index, position)).ok_or_else(|| {
        GeneratorError::malformed(format!("no mapping entry for node {index} ({position:?})"))
    })
}

/// Rejects operands an elementwise loop cannot address. `reduction` names the
/// one node allowed to be a scalar reduction.
fn ensure_elementwise_operands(
    mapping: &Mapping,
    shape: &str,
    reduction: Option<usize>,
) -> GeneratorResult<()> {
    for (&(index, position), mapped) in mapping {
        match mapped.kind() {
            MappedKind::Matrix { .. } | MappedKind::ImplicitMatrix => {
                return Err(GeneratorError::template_mismatch(format!(
                    "{shape} does not support matrix operands (node {index})"
                )))
            }
            MappedKind::ScalarReduction { .. }
                if reduction == Some(index) && position == NodePosition::Parent => {}
            kind if kind.is_derived() => {
                return Err(GeneratorError::template_mismatch(format!(
                    "{shape} does not support {kind:?} views (node {index})"
                )))
            }
            _ => {}
        }
    }
    Ok(())
}

/// Source for the operand at `position` of node `index`, read at element `i`.
fn operand(
    statement: &Statement,
    mapping: &Mapping,
    index: usize,
    position: NodePosition,
    i: &str,
    simd_width: u32,
    depth: usize,
) -> GeneratorResult<String> {
    let node = statement.node(index)?;
    match node.slot(position) {
        Some(Slot::Leaf(_)) => mapped_at(mapping, index, position)?.evaluate(i, simd_width),
        Some(Slot::Composite(child)) => {
            expression(statement, mapping, *child, i, simd_width, depth + 1)
        }
        _ => Err(GeneratorError::malformed(format!(
            "node {index} has no {position:?} operand"
        ))),
    }
}

/// Elementwise source for the subtree rooted at node `index`. The statement
/// must already have passed [`Statement::ensure_tree`].
fn expression(
    statement: &Statement,
    mapping: &Mapping,
    index: usize,
    i: &str,
    simd_width: u32,
    depth: usize,
) -> GeneratorResult<String> {
    if depth >= statement.len() {
        return Err(GeneratorError::malformed(format!(
            "expression below node {index} does not terminate"
        )));
    }
    let node = statement.node(index)?;
    let lhs = |depth| operand(statement, mapping, index, NodePosition::Lhs, i, simd_width, depth);
    let rhs = |depth| operand(statement, mapping, index, NodePosition::Rhs, i, simd_width, depth);

    if node.op.is_assignment() {
        return Err(GeneratorError::template_mismatch(
            "assignments may only appear at the statement root",
        ));
    }
    if node.op == OperatorKind::Minus {
        return Ok(format!("(-{})", lhs(depth)?));
    }
    if let Some(infix) = node.op.infix() {
        return Ok(format!("({} {infix} {})", lhs(depth)?, rhs(depth)?));
    }
    if node.op.function(NumericType::Float).is_some() {
        let numeric_type = statement.resolve_numeric_type(index)?;
        let Some(function) = node.op.function(numeric_type) else {
            return Err(GeneratorError::template_mismatch(format!(
                "{:?} has no {} builtin",
                node.op,
                numeric_type.as_str()
            )));
        };
        return if node.op.is_unary() {
            Ok(format!("{function}({})", lhs(depth)?))
        } else {
            Ok(format!("{function}({}, {})", lhs(depth)?, rhs(depth)?))
        };
    }
    Err(GeneratorError::template_mismatch(format!(
        "{:?} is not an elementwise operator",
        node.op
    )))
}

/// Value assigned by the root node, folding `+=` and `-=` into the stored
/// expression.
fn assigned_value(
    statement: &Statement,
    mapping: &Mapping,
    rhs: String,
    i: &str,
    simd_width: u32,
) -> GeneratorResult<String> {
    let root = statement.root();
    let node = statement.root_node()?;
    let current = || mapped_at(mapping, root, NodePosition::Lhs)?.evaluate(i, simd_width);
    match node.op {
        OperatorKind::Assign => Ok(rhs),
        OperatorKind::InplaceAdd => Ok(format!("{} + {rhs}", current()?)),
        OperatorKind::InplaceSub => Ok(format!("{} - {rhs}", current()?)),
        op => Err(GeneratorError::template_mismatch(format!(
            "statement root must be an assignment, found {op:?}"
        ))),
    }
}

fn reqd_work_group_size(local_size_0: u32, local_size_1: u32) -> String {
    format!("__attribute__((reqd_work_group_size({local_size_0}, {local_size_1}, 1)))")
}

fn to_u32(what: &str, value: usize) -> GeneratorResult<u32> {
    u32::try_from(value)
        .map_err(|_| GeneratorError::argument(format!("{what} {value} does not fit in 32 bits")))
}
