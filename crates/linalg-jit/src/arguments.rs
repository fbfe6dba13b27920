//! Runtime counterpart of the prototype generator: produces the actual
//! kernel arguments in exactly the order the prototype declares them.

use smallvec::{smallvec, SmallVec};
use tracing::trace;

use crate::binder::{BindingPolicy, SymbolicBinder};
use crate::error::{GeneratorError, GeneratorResult};
use crate::statement::{
    walk_statement, DeviceMatrix, Layout, Leaf, NodePosition, NumericType, Slot, Statement,
    StatementVisitor, StorageId,
};

/// A host value converted to the device element type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarValue {
    Char(i8),
    UChar(u8),
    Short(i16),
    UShort(u16),
    Int(i32),
    UInt(u32),
    Long(i64),
    ULong(u64),
    Float(f32),
    Double(f64),
}

impl ScalarValue {
    /// Converts `value` with Rust's saturating numeric casts.
    pub fn cast(dtype: NumericType, value: f64) -> Self {
        match dtype {
            NumericType::Char => ScalarValue::Char(value as i8),
            NumericType::UChar => ScalarValue::UChar(value as u8),
            NumericType::Short => ScalarValue::Short(value as i16),
            NumericType::UShort => ScalarValue::UShort(value as u16),
            NumericType::Int => ScalarValue::Int(value as i32),
            NumericType::UInt => ScalarValue::UInt(value as u32),
            NumericType::Long => ScalarValue::Long(value as i64),
            NumericType::ULong => ScalarValue::ULong(value as u64),
            NumericType::Float => ScalarValue::Float(value as f32),
            NumericType::Double => ScalarValue::Double(value),
        }
    }

    pub fn numeric_type(&self) -> NumericType {
        match self {
            ScalarValue::Char(_) => NumericType::Char,
            ScalarValue::UChar(_) => NumericType::UChar,
            ScalarValue::Short(_) => NumericType::Short,
            ScalarValue::UShort(_) => NumericType::UShort,
            ScalarValue::Int(_) => NumericType::Int,
            ScalarValue::UInt(_) => NumericType::UInt,
            ScalarValue::Long(_) => NumericType::Long,
            ScalarValue::ULong(_) => NumericType::ULong,
            ScalarValue::Float(_) => NumericType::Float,
            ScalarValue::Double(_) => NumericType::Double,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KernelArg {
    Buffer(StorageId),
    UInt(u32),
    Scalar(ScalarValue),
}

/// Arguments contributed by a single leaf; a matrix needs six.
pub type LeafArguments = SmallVec<[KernelArg; 6]>;

/// Receives kernel arguments by position, as `clSetKernelArg` does.
pub trait KernelArgumentSink {
    fn set_arg(&mut self, index: u32, arg: KernelArg) -> GeneratorResult<()>;
}

impl KernelArgumentSink for Vec<KernelArg> {
    fn set_arg(&mut self, index: u32, arg: KernelArg) -> GeneratorResult<()> {
        if index as usize != self.len() {
            return Err(GeneratorError::argument(format!(
                "argument {index} set out of order; expected index {}",
                self.len()
            )));
        }
        self.push(arg);
        Ok(())
    }
}

fn offset_arg(what: &str, value: usize) -> GeneratorResult<KernelArg> {
    u32::try_from(value)
        .map(KernelArg::UInt)
        .map_err(|_| GeneratorError::argument(format!("{what} {value} does not fit in 32 bits")))
}

fn matrix_arguments(matrix: &DeviceMatrix) -> GeneratorResult<LeafArguments> {
    let mut args: LeafArguments = smallvec![
        KernelArg::Buffer(matrix.handle),
        offset_arg("leading dimension", matrix.ld())?,
    ];
    let ordered = match matrix.layout {
        Layout::RowMajor => [
            ("start2", matrix.start2),
            ("start1", matrix.start1),
            ("stride2", matrix.stride2),
            ("stride1", matrix.stride1),
        ],
        Layout::ColumnMajor => [
            ("start1", matrix.start1),
            ("start2", matrix.start2),
            ("stride1", matrix.stride1),
            ("stride2", matrix.stride2),
        ],
    };
    for (what, value) in ordered {
        args.push(offset_arg(what, value)?);
    }
    Ok(args)
}

/// Arguments for one leaf, or none when `binder` has already bound its
/// storage.
pub fn leaf_arguments(leaf: &Leaf, binder: &mut SymbolicBinder) -> GeneratorResult<LeafArguments> {
    if let Some(storage) = leaf.storage() {
        if !binder.bind(storage) {
            return Ok(LeafArguments::new());
        }
    }
    let args: LeafArguments = match leaf {
        Leaf::HostScalar(s) => smallvec![KernelArg::Scalar(ScalarValue::cast(s.dtype, s.value))],
        Leaf::ImplicitScalar(s) => {
            smallvec![KernelArg::Scalar(ScalarValue::cast(s.dtype, s.value))]
        }
        Leaf::ImplicitMatrix(m) => {
            smallvec![KernelArg::Scalar(ScalarValue::cast(m.dtype, m.value))]
        }
        Leaf::Scalar(s) => smallvec![KernelArg::Buffer(s.handle)],
        Leaf::Vector(v) => smallvec![
            KernelArg::Buffer(v.handle),
            offset_arg("start", v.start)?,
            offset_arg("stride", v.stride)?,
        ],
        Leaf::Matrix(m) => matrix_arguments(m)?,
        Leaf::ImplicitVector(v) => {
            let mut args: LeafArguments =
                smallvec![KernelArg::Scalar(ScalarValue::cast(v.dtype, v.value))];
            if let Some(index) = v.index {
                args.push(offset_arg("index", index)?);
            }
            args
        }
    };
    Ok(args)
}

struct SetArgumentsFunctor<'a, S: ?Sized> {
    binder: &'a mut SymbolicBinder,
    sink: &'a mut S,
    current_arg: &'a mut u32,
}

impl<S: KernelArgumentSink + ?Sized> StatementVisitor for SetArgumentsFunctor<'_, S> {
    fn visit(
        &mut self,
        statement: &Statement,
        index: usize,
        position: NodePosition,
    ) -> GeneratorResult<()> {
        let node = statement.node(index)?;
        let Some(Slot::Leaf(leaf)) = node.slot(position) else {
            return Ok(());
        };
        for arg in leaf_arguments(leaf, self.binder)? {
            self.sink.set_arg(*self.current_arg, arg)?;
            *self.current_arg = self
                .current_arg
                .checked_add(1)
                .ok_or_else(|| GeneratorError::argument("kernel argument index overflow"))?;
        }
        Ok(())
    }
}

/// Binds the leaf arguments of `statements` starting at `current_arg`, which
/// is advanced past the last argument set.
pub fn set_arguments<S>(
    statements: &[Statement],
    policy: BindingPolicy,
    sink: &mut S,
    current_arg: &mut u32,
) -> GeneratorResult<()>
where
    S: KernelArgumentSink + ?Sized,
{
    let first = *current_arg;
    let mut binder = SymbolicBinder::new(policy);
    for statement in statements {
        let mut functor = SetArgumentsFunctor {
            binder: &mut binder,
            sink: &mut *sink,
            current_arg: &mut *current_arg,
        };
        walk_statement(statement, statement.root(), &mut functor, true)?;
    }
    trace!(first, count = *current_arg - first, ?policy, "bound leaf arguments");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::{OperatorKind, StatementNode};

    fn assign(lhs: Leaf, rhs: Leaf) -> Statement {
        Statement::new(vec![StatementNode::new(OperatorKind::Assign, lhs, rhs)])
    }

    #[test]
    fn row_major_matrix_arguments_follow_declaration_order() {
        let Leaf::Matrix(mut m) =
            Leaf::matrix(NumericType::Float, StorageId(4), Layout::RowMajor, 3, 5)
        else {
            unreachable!()
        };
        m.internal_size2 = 8;
        m.start1 = 1;
        m.start2 = 2;
        m.stride1 = 3;
        m.stride2 = 4;
        let mut binder = SymbolicBinder::new(BindingPolicy::Shared);
        let args = leaf_arguments(&Leaf::Matrix(m), &mut binder).unwrap();
        assert_eq!(
            args.as_slice(),
            &[
                KernelArg::Buffer(StorageId(4)),
                KernelArg::UInt(8),
                KernelArg::UInt(2),
                KernelArg::UInt(1),
                KernelArg::UInt(4),
                KernelArg::UInt(3),
            ]
        );
    }

    #[test]
    fn host_scalars_are_cast_to_device_type() {
        let mut binder = SymbolicBinder::new(BindingPolicy::Shared);
        let args = leaf_arguments(&Leaf::host_scalar(NumericType::Int, 2.9), &mut binder).unwrap();
        assert_eq!(args.as_slice(), &[KernelArg::Scalar(ScalarValue::Int(2))]);
        assert_eq!(ScalarValue::cast(NumericType::UChar, 300.0), ScalarValue::UChar(255));
    }

    #[test]
    fn shared_policy_skips_rebound_storage() {
        let x = Leaf::vector(NumericType::Float, StorageId(1), 16);
        let statements = [assign(x, x)];
        let mut shared = Vec::new();
        let mut next = 0;
        set_arguments(&statements, BindingPolicy::Shared, &mut shared, &mut next).unwrap();
        assert_eq!(shared.len(), 3);
        assert_eq!(next, 3);

        let mut independent = Vec::new();
        let mut next = 0;
        set_arguments(
            &statements,
            BindingPolicy::Independent,
            &mut independent,
            &mut next,
        )
        .unwrap();
        assert_eq!(independent.len(), 6);
    }

    #[test]
    fn vec_sink_requires_dense_indices() {
        let mut sink = Vec::new();
        sink.set_arg(0, KernelArg::UInt(1)).unwrap();
        let err = sink.set_arg(2, KernelArg::UInt(1)).unwrap_err();
        assert!(matches!(err, GeneratorError::Argument { .. }));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn oversized_offsets_are_rejected() {
        let Leaf::Vector(v) = Leaf::vector(NumericType::Float, StorageId(1), 16) else {
            unreachable!()
        };
        let leaf = Leaf::Vector(v.with_stride(u32::MAX as usize + 1, 1));
        let mut binder = SymbolicBinder::new(BindingPolicy::Independent);
        let err = leaf_arguments(&leaf, &mut binder).unwrap_err();
        assert!(matches!(err, GeneratorError::Argument { .. }));
    }
}
