//! Symbolic descriptions of operands as they appear in generated source.

use std::collections::HashSet;

use crate::codegen::vector_type;
use crate::error::{GeneratorError, GeneratorResult};
use crate::statement::{Layout, OperatorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MappedKind {
    HostScalar,
    Scalar,
    Vector,
    Matrix { layout: Layout },
    ImplicitScalar,
    ImplicitVector { has_index: bool },
    ImplicitMatrix,
    VectorDiag,
    MatrixDiag,
    MatrixRow,
    MatrixColumn,
    ScalarReduction { op: OperatorKind },
    RowWiseReduction { op: OperatorKind },
    MatrixProduct,
    Trans,
}

impl MappedKind {
    /// Derived views are synthesized from an operator node and own no kernel
    /// parameters.
    pub fn is_derived(self) -> bool {
        matches!(
            self,
            MappedKind::VectorDiag
                | MappedKind::MatrixDiag
                | MappedKind::MatrixRow
                | MappedKind::MatrixColumn
                | MappedKind::ScalarReduction { .. }
                | MappedKind::RowWiseReduction { .. }
                | MappedKind::MatrixProduct
                | MappedKind::Trans
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedObject {
    kind: MappedKind,
    scalar_type: String,
    name: String,
}

impl MappedObject {
    pub fn new(kind: MappedKind, scalar_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            scalar_type: scalar_type.into(),
            name: name.into(),
        }
    }

    pub fn kind(&self) -> MappedKind {
        self.kind
    }

    pub fn scalar_type(&self) -> &str {
        &self.scalar_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Formal parameters this object contributes, in declaration order.
    pub fn kernel_parameters(&self) -> Vec<String> {
        let name = &self.name;
        let ty = &self.scalar_type;
        let index = |suffix: &str| format!("unsigned int {name}_{suffix}");
        match self.kind {
            MappedKind::HostScalar | MappedKind::ImplicitScalar | MappedKind::ImplicitMatrix => {
                vec![format!("{ty} {name}")]
            }
            MappedKind::Scalar => vec![format!("global {ty}* {name}")],
            MappedKind::Vector => vec![
                format!("global {ty}* {name}"),
                index("start"),
                index("stride"),
            ],
            MappedKind::Matrix { layout } => {
                let mut params = vec![format!("global {ty}* {name}"), index("ld")];
                match layout {
                    Layout::RowMajor => params.extend([
                        index("start2"),
                        index("start1"),
                        index("stride2"),
                        index("stride1"),
                    ]),
                    Layout::ColumnMajor => params.extend([
                        index("start1"),
                        index("start2"),
                        index("stride1"),
                        index("stride2"),
                    ]),
                }
                params
            }
            MappedKind::ImplicitVector { has_index } => {
                let mut params = vec![format!("{ty} {name}")];
                if has_index {
                    params.push(index("index"));
                }
                params
            }
            _ => Vec::new(),
        }
    }

    /// Appends this object's parameters unless an object with the same name
    /// already contributed them.
    pub fn append_kernel_arguments(
        &self,
        already_generated: &mut HashSet<String>,
        params: &mut Vec<String>,
    ) {
        if self.kind.is_derived() || !already_generated.insert(self.name.clone()) {
            return;
        }
        params.extend(self.kernel_parameters());
    }

    /// Read expression for element `index`; with `simd_width > 1` the index
    /// counts wide elements.
    pub fn evaluate(&self, index: &str, simd_width: u32) -> GeneratorResult<String> {
        let name = &self.name;
        match self.kind {
            MappedKind::HostScalar | MappedKind::ImplicitScalar => Ok(name.clone()),
            MappedKind::Scalar => Ok(format!("{name}[0]")),
            MappedKind::Vector if simd_width > 1 => Ok(format!(
                "vload{simd_width}({index}, {name} + {name}_start)"
            )),
            MappedKind::Vector => Ok(format!("{name}[{name}_start + ({index})*{name}_stride]")),
            MappedKind::ImplicitVector { has_index: false } => Ok(name.clone()),
            MappedKind::ImplicitVector { has_index: true } if simd_width == 1 => Ok(format!(
                "((({index}) == {name}_index) ? {name} : ({}) 0)",
                self.scalar_type
            )),
            kind => Err(GeneratorError::template_mismatch(format!(
                "{kind:?} operand cannot be read elementwise with simd width {simd_width}"
            ))),
        }
    }

    /// Statement storing `value` into element `index`.
    pub fn store(&self, index: &str, simd_width: u32, value: &str) -> GeneratorResult<String> {
        let name = &self.name;
        match self.kind {
            MappedKind::Scalar => Ok(format!("{name}[0] = {value};")),
            MappedKind::Vector if simd_width > 1 => Ok(format!(
                "vstore{simd_width}({value}, {index}, {name} + {name}_start);"
            )),
            MappedKind::Vector => Ok(format!(
                "{name}[{name}_start + ({index})*{name}_stride] = {value};"
            )),
            kind => Err(GeneratorError::template_mismatch(format!(
                "{kind:?} operand cannot be assigned to"
            ))),
        }
    }

    /// Type of one value read through [`MappedObject::evaluate`].
    pub fn value_type(&self, simd_width: u32) -> String {
        match self.kind {
            MappedKind::Vector => vector_type(&self.scalar_type, simd_width),
            _ => self.scalar_type.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_major_matrix_declares_second_dimension_first() {
        let matrix = MappedObject::new(
            MappedKind::Matrix {
                layout: Layout::RowMajor,
            },
            "float",
            "obj3",
        );
        assert_eq!(
            matrix.kernel_parameters(),
            vec![
                "global float* obj3",
                "unsigned int obj3_ld",
                "unsigned int obj3_start2",
                "unsigned int obj3_start1",
                "unsigned int obj3_stride2",
                "unsigned int obj3_stride1",
            ]
        );
    }

    #[test]
    fn implicit_vector_index_parameter_is_optional() {
        let plain =
            MappedObject::new(MappedKind::ImplicitVector { has_index: false }, "float", "obj0");
        let unit =
            MappedObject::new(MappedKind::ImplicitVector { has_index: true }, "float", "obj1");
        assert_eq!(plain.kernel_parameters().len(), 1);
        assert_eq!(
            unit.kernel_parameters(),
            vec!["float obj1", "unsigned int obj1_index"]
        );
    }

    #[test]
    fn duplicate_names_contribute_once() {
        let vector = MappedObject::new(MappedKind::Vector, "float", "obj0");
        let mut seen = HashSet::new();
        let mut params = Vec::new();
        vector.append_kernel_arguments(&mut seen, &mut params);
        vector.append_kernel_arguments(&mut seen, &mut params);
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn derived_views_have_no_parameters() {
        let product = MappedObject::new(MappedKind::MatrixProduct, "float", "obj5");
        let mut seen = HashSet::new();
        let mut params = Vec::new();
        product.append_kernel_arguments(&mut seen, &mut params);
        assert!(params.is_empty());
        assert!(product.evaluate("i", 1).unwrap_err().is_template_mismatch());
    }

    #[test]
    fn vector_access_depends_on_simd_width() {
        let vector = MappedObject::new(MappedKind::Vector, "float", "obj2");
        assert_eq!(
            vector.evaluate("i", 1).unwrap(),
            "obj2[obj2_start + (i)*obj2_stride]"
        );
        assert_eq!(vector.evaluate("i", 4).unwrap(), "vload4(i, obj2 + obj2_start)");
        assert_eq!(
            vector.store("i", 4, "x").unwrap(),
            "vstore4(x, i, obj2 + obj2_start);"
        );
        assert_eq!(vector.value_type(4), "float4");
    }
}
