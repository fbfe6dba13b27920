//! Array-encoded expression trees and the concrete operands they reference.
//!
//! A [`Statement`] is a flat list of operator nodes. Each node has two operand
//! slots which either hold a [`Leaf`] (a concrete data reference) or the index
//! of another node in the same list. Indices are never trusted: the nodes below
//! a root must form a tree, and every walk in this module reports a
//! [`GeneratorError::MalformedStatement`] for cycles, shared subtrees or
//! out-of-range indices instead of looping or panicking.

use serde::{Deserialize, Serialize};

use crate::error::{GeneratorError, GeneratorResult};

/// Scalar element types a generated kernel can operate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumericType {
    Char,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    Float,
    Double,
}

impl NumericType {
    /// OpenCL C spelling of the type.
    pub fn as_str(self) -> &'static str {
        match self {
            NumericType::Char => "char",
            NumericType::UChar => "uchar",
            NumericType::Short => "short",
            NumericType::UShort => "ushort",
            NumericType::Int => "int",
            NumericType::UInt => "uint",
            NumericType::Long => "long",
            NumericType::ULong => "ulong",
            NumericType::Float => "float",
            NumericType::Double => "double",
        }
    }

    /// Storage size in bytes on the device.
    pub fn size_of(self) -> usize {
        match self {
            NumericType::Char | NumericType::UChar => 1,
            NumericType::Short | NumericType::UShort => 2,
            NumericType::Int | NumericType::UInt | NumericType::Float => 4,
            NumericType::Long | NumericType::ULong | NumericType::Double => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, NumericType::Float | NumericType::Double)
    }
}

/// Opaque identity of a physical device buffer. Two leaves with the same id
/// alias the same storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StorageId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Layout {
    RowMajor,
    ColumnMajor,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostScalar {
    pub dtype: NumericType,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceScalar {
    pub dtype: NumericType,
    pub handle: StorageId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceVector {
    pub dtype: NumericType,
    pub handle: StorageId,
    pub size: usize,
    pub internal_size: usize,
    pub start: usize,
    pub stride: usize,
}

impl DeviceVector {
    pub fn with_stride(mut self, start: usize, stride: usize) -> Self {
        self.start = start;
        self.stride = stride;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceMatrix {
    pub dtype: NumericType,
    pub handle: StorageId,
    pub layout: Layout,
    pub size1: usize,
    pub size2: usize,
    pub internal_size1: usize,
    pub internal_size2: usize,
    pub start1: usize,
    pub start2: usize,
    pub stride1: usize,
    pub stride2: usize,
}

impl DeviceMatrix {
    /// Leading dimension of the backing buffer.
    pub fn ld(&self) -> usize {
        match self.layout {
            Layout::RowMajor => self.internal_size2,
            Layout::ColumnMajor => self.internal_size1,
        }
    }

    pub fn row_major(&self) -> bool {
        self.layout == Layout::RowMajor
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImplicitScalar {
    pub dtype: NumericType,
    pub value: f64,
}

/// A vector that is never materialized: every entry equals `value`, or, when
/// `index` is set, `value` at that index and zero elsewhere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImplicitVector {
    pub dtype: NumericType,
    pub value: f64,
    pub index: Option<usize>,
    pub size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImplicitMatrix {
    pub dtype: NumericType,
    pub value: f64,
    pub size1: usize,
    pub size2: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeafKind {
    HostScalar,
    Scalar,
    Vector,
    Matrix,
    ImplicitScalar,
    ImplicitVector,
    ImplicitMatrix,
}

/// A concrete operand referenced by a statement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Leaf {
    HostScalar(HostScalar),
    Scalar(DeviceScalar),
    Vector(DeviceVector),
    Matrix(DeviceMatrix),
    ImplicitScalar(ImplicitScalar),
    ImplicitVector(ImplicitVector),
    ImplicitMatrix(ImplicitMatrix),
}

impl Leaf {
    pub fn host_scalar(dtype: NumericType, value: f64) -> Self {
        Leaf::HostScalar(HostScalar { dtype, value })
    }

    pub fn scalar(dtype: NumericType, handle: StorageId) -> Self {
        Leaf::Scalar(DeviceScalar { dtype, handle })
    }

    /// Dense, unit-stride vector starting at offset zero.
    pub fn vector(dtype: NumericType, handle: StorageId, size: usize) -> Self {
        Leaf::Vector(DeviceVector {
            dtype,
            handle,
            size,
            internal_size: size,
            start: 0,
            stride: 1,
        })
    }

    /// Dense matrix without padding or sub-range offsets.
    pub fn matrix(
        dtype: NumericType,
        handle: StorageId,
        layout: Layout,
        size1: usize,
        size2: usize,
    ) -> Self {
        Leaf::Matrix(DeviceMatrix {
            dtype,
            handle,
            layout,
            size1,
            size2,
            internal_size1: size1,
            internal_size2: size2,
            start1: 0,
            start2: 0,
            stride1: 1,
            stride2: 1,
        })
    }

    pub fn implicit_scalar(dtype: NumericType, value: f64) -> Self {
        Leaf::ImplicitScalar(ImplicitScalar { dtype, value })
    }

    pub fn implicit_vector(
        dtype: NumericType,
        value: f64,
        index: Option<usize>,
        size: usize,
    ) -> Self {
        Leaf::ImplicitVector(ImplicitVector {
            dtype,
            value,
            index,
            size,
        })
    }

    pub fn implicit_matrix(dtype: NumericType, value: f64, size1: usize, size2: usize) -> Self {
        Leaf::ImplicitMatrix(ImplicitMatrix {
            dtype,
            value,
            size1,
            size2,
        })
    }

    pub fn kind(&self) -> LeafKind {
        match self {
            Leaf::HostScalar(_) => LeafKind::HostScalar,
            Leaf::Scalar(_) => LeafKind::Scalar,
            Leaf::Vector(_) => LeafKind::Vector,
            Leaf::Matrix(_) => LeafKind::Matrix,
            Leaf::ImplicitScalar(_) => LeafKind::ImplicitScalar,
            Leaf::ImplicitVector(_) => LeafKind::ImplicitVector,
            Leaf::ImplicitMatrix(_) => LeafKind::ImplicitMatrix,
        }
    }

    pub fn numeric_type(&self) -> NumericType {
        match self {
            Leaf::HostScalar(s) => s.dtype,
            Leaf::Scalar(s) => s.dtype,
            Leaf::Vector(v) => v.dtype,
            Leaf::Matrix(m) => m.dtype,
            Leaf::ImplicitScalar(s) => s.dtype,
            Leaf::ImplicitVector(v) => v.dtype,
            Leaf::ImplicitMatrix(m) => m.dtype,
        }
    }

    /// Physical storage behind the leaf; `None` for host and implicit forms.
    pub fn storage(&self) -> Option<&StorageId> {
        match self {
            Leaf::Scalar(s) => Some(&s.handle),
            Leaf::Vector(v) => Some(&v.handle),
            Leaf::Matrix(m) => Some(&m.handle),
            Leaf::HostScalar(_)
            | Leaf::ImplicitScalar(_)
            | Leaf::ImplicitVector(_)
            | Leaf::ImplicitMatrix(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperatorKind {
    Assign,
    InplaceAdd,
    InplaceSub,
    Add,
    Sub,
    Mult,
    Div,
    ElementProd,
    ElementDiv,
    ElementMax,
    ElementMin,
    Minus,
    Abs,
    Exp,
    Log,
    Sqrt,
    Sin,
    Cos,
    Tanh,
    VectorDiag,
    MatrixDiag,
    MatrixRow,
    MatrixColumn,
    InnerProd,
    Norm1,
    Norm2,
    NormInf,
    Sum,
    MatVecProd,
    MatMatProd,
    Trans,
}

impl OperatorKind {
    /// Operators whose rhs slot is unused.
    pub fn is_unary(self) -> bool {
        matches!(
            self,
            OperatorKind::Minus
                | OperatorKind::Abs
                | OperatorKind::Exp
                | OperatorKind::Log
                | OperatorKind::Sqrt
                | OperatorKind::Sin
                | OperatorKind::Cos
                | OperatorKind::Tanh
                | OperatorKind::Norm1
                | OperatorKind::Norm2
                | OperatorKind::NormInf
                | OperatorKind::Sum
                | OperatorKind::Trans
        )
    }

    pub fn is_assignment(self) -> bool {
        matches!(
            self,
            OperatorKind::Assign | OperatorKind::InplaceAdd | OperatorKind::InplaceSub
        )
    }

    /// Operators that synthesize a derived view; the tree below them is only
    /// descended into when a walk inspects.
    pub fn is_node_leaf(self) -> bool {
        matches!(
            self,
            OperatorKind::VectorDiag
                | OperatorKind::MatrixDiag
                | OperatorKind::MatrixRow
                | OperatorKind::MatrixColumn
                | OperatorKind::MatMatProd
                | OperatorKind::Trans
        ) || self.is_scalar_reduction()
            || self.is_vector_reduction()
    }

    pub fn is_scalar_reduction(self) -> bool {
        matches!(
            self,
            OperatorKind::InnerProd
                | OperatorKind::Norm1
                | OperatorKind::Norm2
                | OperatorKind::NormInf
                | OperatorKind::Sum
        )
    }

    pub fn is_vector_reduction(self) -> bool {
        matches!(self, OperatorKind::MatVecProd)
    }

    /// Infix spelling for elementwise binary operators.
    pub fn infix(self) -> Option<&'static str> {
        match self {
            OperatorKind::Assign => Some("="),
            OperatorKind::InplaceAdd => Some("+="),
            OperatorKind::InplaceSub => Some("-="),
            OperatorKind::Add => Some("+"),
            OperatorKind::Sub => Some("-"),
            OperatorKind::Mult | OperatorKind::ElementProd => Some("*"),
            OperatorKind::Div | OperatorKind::ElementDiv => Some("/"),
            _ => None,
        }
    }

    /// Builtin function spelling for elementwise function-call operators on
    /// `numeric_type` operands. Transcendental builtins exist only for
    /// floating-point types.
    pub fn function(self, numeric_type: NumericType) -> Option<&'static str> {
        let float = numeric_type.is_float();
        match self {
            OperatorKind::ElementMax => Some("max"),
            OperatorKind::ElementMin => Some("min"),
            OperatorKind::Abs if float => Some("fabs"),
            OperatorKind::Abs => Some("abs"),
            OperatorKind::Exp if float => Some("exp"),
            OperatorKind::Log if float => Some("log"),
            OperatorKind::Sqrt if float => Some("sqrt"),
            OperatorKind::Sin if float => Some("sin"),
            OperatorKind::Cos if float => Some("cos"),
            OperatorKind::Tanh if float => Some("tanh"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Slot {
    Leaf(Leaf),
    Composite(usize),
    Empty,
}

impl From<Leaf> for Slot {
    fn from(leaf: Leaf) -> Self {
        Slot::Leaf(leaf)
    }
}

impl Slot {
    pub fn leaf(&self) -> Option<&Leaf> {
        match self {
            Slot::Leaf(leaf) => Some(leaf),
            _ => None,
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, Slot::Composite(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatementNode {
    pub op: OperatorKind,
    pub lhs: Slot,
    pub rhs: Slot,
}

impl StatementNode {
    pub fn new(op: OperatorKind, lhs: impl Into<Slot>, rhs: impl Into<Slot>) -> Self {
        Self {
            op,
            lhs: lhs.into(),
            rhs: rhs.into(),
        }
    }

    pub fn unary(op: OperatorKind, operand: impl Into<Slot>) -> Self {
        Self::new(op, operand, Slot::Empty)
    }

    pub fn slot(&self, position: NodePosition) -> Option<&Slot> {
        match position {
            NodePosition::Lhs => Some(&self.lhs),
            NodePosition::Rhs => Some(&self.rhs),
            NodePosition::Parent => None,
        }
    }
}

/// Where a walk is positioned relative to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodePosition {
    Lhs,
    Rhs,
    Parent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    nodes: Vec<StatementNode>,
    root: usize,
}

impl Statement {
    pub fn new(nodes: Vec<StatementNode>) -> Self {
        Self { nodes, root: 0 }
    }

    pub fn with_root(mut self, root: usize) -> Self {
        self.root = root;
        self
    }

    pub fn nodes(&self) -> &[StatementNode] {
        &self.nodes
    }

    pub fn root(&self) -> usize {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: usize) -> GeneratorResult<&StatementNode> {
        self.nodes.get(index).ok_or_else(|| {
            GeneratorError::malformed(format!(
                "node index {index} out of range for statement of {} nodes",
                self.nodes.len()
            ))
        })
    }

    pub fn root_node(&self) -> GeneratorResult<&StatementNode> {
        self.node(self.root)
    }

    /// Follows the lhs chain from `index` down to the first node whose lhs is
    /// a leaf.
    pub fn lhs_most(&self, index: usize) -> GeneratorResult<&StatementNode> {
        let mut current = self.node(index)?;
        for _ in 0..self.nodes.len() {
            match current.lhs {
                Slot::Composite(next) => current = self.node(next)?,
                Slot::Leaf(_) => return Ok(current),
                Slot::Empty => {
                    return Err(GeneratorError::malformed(
                        "lhs chain ends in an empty slot",
                    ))
                }
            }
        }
        Err(GeneratorError::malformed(format!(
            "lhs chain from node {index} does not terminate"
        )))
    }

    /// Numeric type of the node at `index`: composite nodes carry none, so
    /// the type of the first concrete leaf along the lhs chain is used.
    pub fn resolve_numeric_type(&self, index: usize) -> GeneratorResult<NumericType> {
        let node = self.lhs_most(index)?;
        match &node.lhs {
            Slot::Leaf(leaf) => Ok(leaf.numeric_type()),
            _ => Err(GeneratorError::malformed(format!(
                "no concrete numeric type below node {index}"
            ))),
        }
    }

    /// Checks that every node reachable from `root` is reached through exactly
    /// one composite slot. Cycles and subtrees shared between two slots are
    /// rejected.
    pub fn ensure_tree(&self, root: usize) -> GeneratorResult<()> {
        self.node(root)?;
        let mut seen = vec![false; self.nodes.len()];
        seen[root] = true;
        let mut pending = vec![root];
        while let Some(index) = pending.pop() {
            let node = self.node(index)?;
            for slot in [&node.lhs, &node.rhs] {
                let Slot::Composite(child) = *slot else {
                    continue;
                };
                self.node(child)?;
                if std::mem::replace(&mut seen[child], true) {
                    return Err(GeneratorError::malformed(format!(
                        "node {child} is referenced again from node {index}; \
                         composite indices must form a tree"
                    )));
                }
                pending.push(child);
            }
        }
        Ok(())
    }

    /// Whether the operand at `position` of node `index` is seen through an
    /// odd number of transpositions. Below the first hop the chain follows
    /// lhs operands.
    pub fn is_node_trans(&self, index: usize, position: NodePosition) -> GeneratorResult<bool> {
        let mut transposed = false;
        let mut node = self.node(index)?;
        let mut position = position;
        for _ in 0..=self.nodes.len() {
            let next = match node.slot(position) {
                Some(Slot::Composite(next)) => *next,
                _ => return Ok(transposed),
            };
            node = self.node(next)?;
            if node.op == OperatorKind::Trans {
                transposed = !transposed;
            }
            position = NodePosition::Lhs;
        }
        Err(GeneratorError::malformed(format!(
            "operand chain from node {index} does not terminate"
        )))
    }
}

/// Callback invoked by [`walk_statement`] once per visited position.
pub trait StatementVisitor {
    fn visit(
        &mut self,
        statement: &Statement,
        index: usize,
        position: NodePosition,
    ) -> GeneratorResult<()>;
}

/// In-order walk: lhs subtree (or lhs leaf), the node itself as `Parent`, rhs
/// subtree (or rhs leaf). Derived-view operators are only descended into when
/// `inspect` is set. Leaf positions are reported only for leaf slots.
///
/// The nodes below `root` must form a tree (see [`Statement::ensure_tree`]),
/// so every position is visited exactly once.
pub fn walk_statement<V: StatementVisitor + ?Sized>(
    statement: &Statement,
    root: usize,
    visitor: &mut V,
    inspect: bool,
) -> GeneratorResult<()> {
    statement.ensure_tree(root)?;
    walk_node(statement, root, visitor, inspect)
}

fn walk_node<V: StatementVisitor + ?Sized>(
    statement: &Statement,
    index: usize,
    visitor: &mut V,
    inspect: bool,
) -> GeneratorResult<()> {
    let node = statement.node(index)?;
    let recurse = if node.op.is_node_leaf() { inspect } else { true };

    if recurse {
        walk_slot(statement, index, &node.lhs, NodePosition::Lhs, visitor, inspect)?;
    }
    visitor.visit(statement, index, NodePosition::Parent)?;
    if recurse {
        walk_slot(statement, index, &node.rhs, NodePosition::Rhs, visitor, inspect)?;
    }
    Ok(())
}

fn walk_slot<V: StatementVisitor + ?Sized>(
    statement: &Statement,
    index: usize,
    slot: &Slot,
    position: NodePosition,
    visitor: &mut V,
    inspect: bool,
) -> GeneratorResult<()> {
    match slot {
        Slot::Composite(child) => walk_node(statement, *child, visitor, inspect),
        Slot::Leaf(_) => visitor.visit(statement, index, position),
        Slot::Empty => Ok(()),
    }
}

struct FilterLeaves {
    kind: LeafKind,
    found: Vec<Leaf>,
}

impl StatementVisitor for FilterLeaves {
    fn visit(
        &mut self,
        statement: &Statement,
        index: usize,
        position: NodePosition,
    ) -> GeneratorResult<()> {
        let node = statement.node(index)?;
        if let Some(Slot::Leaf(leaf)) = node.slot(position) {
            if leaf.kind() == self.kind {
                self.found.push(*leaf);
            }
        }
        Ok(())
    }
}

/// Every leaf of `kind` reachable from the statement root, in walk order.
pub fn filter_leaves(statement: &Statement, kind: LeafKind) -> GeneratorResult<Vec<Leaf>> {
    let mut filter = FilterLeaves {
        kind,
        found: Vec::new(),
    };
    walk_statement(statement, statement.root(), &mut filter, true)?;
    Ok(filter.found)
}

/// True when any vector or matrix operand is accessed with a non-unit stride.
pub fn has_strided_access(statements: &[Statement]) -> GeneratorResult<bool> {
    for statement in statements {
        for leaf in filter_leaves(statement, LeafKind::Vector)? {
            if let Leaf::Vector(vector) = leaf {
                if vector.stride > 1 {
                    return Ok(true);
                }
            }
        }
        for leaf in filter_leaves(statement, LeafKind::Matrix)? {
            if let Leaf::Matrix(matrix) = leaf {
                if matrix.stride1 > 1 || matrix.stride2 > 1 {
                    return Ok(true);
                }
            }
        }
    }
    Ok(false)
}

/// Length of the vector produced by `node`: diagonal, row and column views
/// take it from their matrix operand, anything else from its lhs vector.
pub fn vector_size(node: &StatementNode, up_to_internal_size: bool) -> GeneratorResult<usize> {
    let matrix = || match node.lhs.leaf() {
        Some(Leaf::Matrix(m)) => Ok(*m),
        _ => Err(GeneratorError::malformed(format!(
            "{:?} expects a matrix lhs operand",
            node.op
        ))),
    };
    let sizes = |m: &DeviceMatrix| {
        if up_to_internal_size {
            (m.internal_size1, m.internal_size2)
        } else {
            (m.size1, m.size2)
        }
    };
    match node.op {
        OperatorKind::MatrixDiag => {
            let m = matrix()?;
            let (rows, cols) = sizes(&m);
            Ok(rows.min(cols))
        }
        OperatorKind::MatrixRow => Ok(sizes(&matrix()?).1),
        OperatorKind::MatrixColumn => Ok(sizes(&matrix()?).0),
        _ => match node.lhs.leaf() {
            Some(Leaf::Vector(v)) => Ok(if up_to_internal_size {
                v.internal_size
            } else {
                v.size
            }),
            Some(Leaf::ImplicitVector(v)) => Ok(v.size),
            _ => Err(GeneratorError::malformed(format!(
                "{:?} has no vector lhs operand to size from",
                node.op
            ))),
        },
    }
}
