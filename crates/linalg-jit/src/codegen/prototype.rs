use std::collections::HashSet;

use crate::error::{GeneratorError, GeneratorResult};
use crate::mapping::Mapping;
use crate::statement::{walk_statement, NodePosition, Slot, Statement, StatementVisitor};

use super::KernelSourceStream;

struct PrototypeFunctor<'a> {
    already_generated: &'a mut HashSet<String>,
    params: &'a mut Vec<String>,
    mapping: &'a Mapping,
}

impl StatementVisitor for PrototypeFunctor<'_> {
    fn visit(
        &mut self,
        statement: &Statement,
        index: usize,
        position: NodePosition,
    ) -> GeneratorResult<()> {
        let node = statement.node(index)?;
        if !matches!(node.slot(position), Some(Slot::Leaf(_))) {
            return Ok(());
        }
        let mapped = self.mapping.get(&(index, position)).ok_or_else(|| {
            GeneratorError::malformed(format!(
                "leaf at node {index} ({position:?}) has no mapping entry"
            ))
        })?;
        mapped.append_kernel_arguments(self.already_generated, self.params);
        Ok(())
    }
}

/// Emits `kernel void <name>(<params>)`: `first_arguments` followed by the
/// parameters of every leaf, statement by statement, each name once.
pub fn generate_prototype(
    stream: &mut KernelSourceStream,
    name: &str,
    first_arguments: &[&str],
    mappings: &[Mapping],
    statements: &[Statement],
) -> GeneratorResult<()> {
    if mappings.len() != statements.len() {
        return Err(GeneratorError::malformed(format!(
            "{} mappings supplied for {} statements",
            mappings.len(),
            statements.len()
        )));
    }
    let mut already_generated = HashSet::new();
    let mut params: Vec<String> = first_arguments.iter().map(|arg| arg.to_string()).collect();
    for (statement, mapping) in statements.iter().zip(mappings) {
        let mut functor = PrototypeFunctor {
            already_generated: &mut already_generated,
            params: &mut params,
            mapping,
        };
        walk_statement(statement, statement.root(), &mut functor, true)?;
    }
    stream.line(&format!("kernel void {name}({})", params.join(", ")));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::{BindingPolicy, SymbolicBinder};
    use crate::mapping::map_statement;
    use crate::statement::{Leaf, NumericType, OperatorKind, StatementNode, StorageId};

    #[test]
    fn prototype_lists_prefix_then_leaves() {
        let y = Leaf::vector(NumericType::Float, StorageId(0), 4);
        let alpha = Leaf::host_scalar(NumericType::Float, 2.0);
        let statement = Statement::new(vec![
            StatementNode::new(OperatorKind::Assign, y, Slot::Composite(1)),
            StatementNode::new(OperatorKind::Mult, alpha, y),
        ]);
        let mut binder = SymbolicBinder::new(BindingPolicy::Shared);
        let mapping = map_statement(&statement, &mut binder).unwrap();

        let mut stream = KernelSourceStream::new();
        generate_prototype(&mut stream, "scale", &["unsigned int N"], &[mapping], &[statement])
            .unwrap();
        assert_eq!(
            stream.as_str(),
            "kernel void scale(unsigned int N, global float* obj0, unsigned int obj0_start, unsigned int obj0_stride, float obj1)\n"
        );
    }

    #[test]
    fn mismatched_mapping_count_is_rejected() {
        let mut stream = KernelSourceStream::new();
        let statement = Statement::new(vec![StatementNode::new(
            OperatorKind::Assign,
            Leaf::vector(NumericType::Float, StorageId(0), 4),
            Leaf::vector(NumericType::Float, StorageId(1), 4),
        )]);
        assert!(generate_prototype(&mut stream, "k", &[], &[], &[statement]).is_err());
    }
}
