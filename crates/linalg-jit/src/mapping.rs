use std::collections::BTreeMap;

use crate::binder::SymbolicBinder;
use crate::error::GeneratorResult;
use crate::mapped::{MappedKind, MappedObject};
use crate::statement::{
    walk_statement, Leaf, NodePosition, OperatorKind, Slot, Statement, StatementVisitor,
};

pub type MappingKey = (usize, NodePosition);

/// Symbolic description of every mapped position of one statement.
pub type Mapping = BTreeMap<MappingKey, MappedObject>;

struct MapFunctor<'a> {
    binder: &'a mut SymbolicBinder,
    mapping: &'a mut Mapping,
}

impl MapFunctor<'_> {
    fn leaf(&mut self, leaf: &Leaf) -> MappedObject {
        let scalar_type = leaf.numeric_type().as_str();
        let name = self.binder.get(leaf.storage());
        let kind = match leaf {
            Leaf::HostScalar(_) => MappedKind::HostScalar,
            Leaf::Scalar(_) => MappedKind::Scalar,
            Leaf::Vector(_) => MappedKind::Vector,
            Leaf::Matrix(m) => MappedKind::Matrix { layout: m.layout },
            Leaf::ImplicitScalar(_) => MappedKind::ImplicitScalar,
            Leaf::ImplicitVector(v) => MappedKind::ImplicitVector {
                has_index: v.index.is_some(),
            },
            Leaf::ImplicitMatrix(_) => MappedKind::ImplicitMatrix,
        };
        MappedObject::new(kind, scalar_type, name)
    }

    fn derived(
        &mut self,
        statement: &Statement,
        index: usize,
        kind: MappedKind,
    ) -> GeneratorResult<MappedObject> {
        let numeric_type = statement.resolve_numeric_type(index)?;
        Ok(MappedObject::new(
            kind,
            numeric_type.as_str(),
            self.binder.get(None),
        ))
    }
}

fn derived_kind(op: OperatorKind) -> Option<MappedKind> {
    match op {
        OperatorKind::VectorDiag => Some(MappedKind::VectorDiag),
        OperatorKind::MatrixDiag => Some(MappedKind::MatrixDiag),
        OperatorKind::MatrixRow => Some(MappedKind::MatrixRow),
        OperatorKind::MatrixColumn => Some(MappedKind::MatrixColumn),
        op if op.is_scalar_reduction() => Some(MappedKind::ScalarReduction { op }),
        op if op.is_vector_reduction() => Some(MappedKind::RowWiseReduction { op }),
        OperatorKind::MatMatProd => Some(MappedKind::MatrixProduct),
        OperatorKind::Trans => Some(MappedKind::Trans),
        _ => None,
    }
}

impl StatementVisitor for MapFunctor<'_> {
    fn visit(
        &mut self,
        statement: &Statement,
        index: usize,
        position: NodePosition,
    ) -> GeneratorResult<()> {
        let node = statement.node(index)?;
        let mapped = match (position, node.slot(position)) {
            (_, Some(Slot::Leaf(leaf))) => Some(self.leaf(leaf)),
            (NodePosition::Parent, _) => match derived_kind(node.op) {
                Some(kind) => Some(self.derived(statement, index, kind)?),
                None => None,
            },
            _ => None,
        };
        if let Some(mapped) = mapped {
            self.mapping.insert((index, position), mapped);
        }
        Ok(())
    }
}

/// Builds the mapping of one statement. Names come from `binder`, so a shared
/// binder passed across several statements keeps aliased storage under one
/// name.
pub fn map_statement(
    statement: &Statement,
    binder: &mut SymbolicBinder,
) -> GeneratorResult<Mapping> {
    let mut mapping = Mapping::new();
    let mut functor = MapFunctor {
        binder,
        mapping: &mut mapping,
    };
    walk_statement(statement, statement.root(), &mut functor, true)?;
    Ok(mapping)
}
