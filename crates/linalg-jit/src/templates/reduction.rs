use serde::{Deserialize, Serialize};

use crate::arguments::{set_arguments, KernelArg};
use crate::binder::BindingPolicy;
use crate::codegen::{
    element_wise_loop_1d, generate_prototype, vector_type, FetchPolicy, KernelSourceStream,
};
use crate::device::DeviceCapabilities;
use crate::error::{GeneratorError, GeneratorResult};
use crate::mapped::MappedKind;
use crate::mapping::Mapping;
use crate::statement::{
    filter_leaves, has_strided_access, vector_size, Leaf, LeafKind, NodePosition, OperatorKind,
    Slot, Statement, StorageId,
};
use crate::template::{KernelLaunch, KernelTemplate, LazyProgramCompiler};
use crate::validity::{KernelParameters, TemplateStatus};

use super::{
    assigned_value, ensure_elementwise_operands, mapped_at, operand, reqd_work_group_size, to_u32,
    GLOBAL_ID, GLOBAL_SIZE, LOCAL_ID,
};

const SHAPE: &str = "scalar reduction";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReductionParameters {
    #[serde(flatten)]
    pub kernel: KernelParameters,
    pub num_groups: u32,
    pub fetching_policy: FetchPolicy,
}

impl ReductionParameters {
    pub fn new(
        simd_width: u32,
        local_size_0: u32,
        num_groups: u32,
        fetching_policy: FetchPolicy,
    ) -> Self {
        Self {
            kernel: KernelParameters::new(simd_width, local_size_0, 1, 2),
            num_groups,
            fetching_policy,
        }
    }
}

/// `s = reduce(expr)` in two launches: every work group folds its share into
/// one partial result in `workspace`, then a single work group folds the
/// partials and stores the result.
#[derive(Debug, Clone)]
pub struct ScalarReductionTemplate {
    params: ReductionParameters,
    binding_policy: BindingPolicy,
    workspace: StorageId,
}

struct Reduction<'a> {
    statement: &'a Statement,
    mapping: &'a Mapping,
    node: usize,
    op: OperatorKind,
    scalar_type: &'static str,
}

impl Reduction<'_> {
    /// Per-element term folded into the accumulator.
    fn term(&self, i: &str, simd_width: u32) -> GeneratorResult<String> {
        let read =
            |position| operand(self.statement, self.mapping, self.node, position, i, simd_width, 1);
        let x = read(NodePosition::Lhs)?;
        Ok(match self.op {
            OperatorKind::InnerProd => {
                let y = read(NodePosition::Rhs)?;
                format!("({x} * {y})")
            }
            OperatorKind::Norm1 | OperatorKind::NormInf => format!("fabs({x})"),
            OperatorKind::Norm2 => format!("({x} * {x})"),
            _ => x,
        })
    }

    fn accumulate(&self, acc: &str, value: &str) -> String {
        if self.op == OperatorKind::NormInf {
            format!("{acc} = fmax({acc}, {value});")
        } else {
            format!("{acc} += {value};")
        }
    }

    fn finalize(&self, value: &str) -> String {
        if self.op == OperatorKind::Norm2 {
            format!("sqrt({value})")
        } else {
            value.to_string()
        }
    }
}

impl ScalarReductionTemplate {
    pub fn new(
        params: ReductionParameters,
        binding_policy: BindingPolicy,
        workspace: StorageId,
    ) -> Self {
        Self {
            params,
            binding_policy,
            workspace,
        }
    }

    pub fn reduction_parameters(&self) -> &ReductionParameters {
        &self.params
    }

    fn analyze<'a>(
        &self,
        statements: &'a [Statement],
        mappings: &'a [Mapping],
    ) -> GeneratorResult<Reduction<'a>> {
        let (statement, mapping) = match (statements, mappings) {
            ([statement], [mapping]) => (statement, mapping),
            _ => {
                return Err(GeneratorError::template_mismatch(format!(
                    "{SHAPE} handles exactly one statement, got {}",
                    statements.len()
                )))
            }
        };
        statement.ensure_tree(statement.root())?;
        let root = statement.root_node()?;
        let node = match root.rhs {
            Slot::Composite(index) if statement.node(index)?.op.is_scalar_reduction() => index,
            _ => {
                return Err(GeneratorError::template_mismatch(format!(
                    "{SHAPE} expects a reduction on the right of the root {:?}",
                    root.op
                )))
            }
        };
        ensure_elementwise_operands(mapping, SHAPE, Some(node))?;
        let target = mapped_at(mapping, statement.root(), NodePosition::Lhs)?;
        if target.kind() != MappedKind::Scalar {
            return Err(GeneratorError::template_mismatch(format!(
                "{SHAPE} must assign to a device scalar, found {:?}",
                target.kind()
            )));
        }
        let numeric_type = statement.resolve_numeric_type(statement.root())?;
        if !numeric_type.is_float() {
            return Err(GeneratorError::template_mismatch(format!(
                "{SHAPE} requires floating-point operands, found {}",
                numeric_type.as_str()
            )));
        }
        if self.params.kernel.simd_width > 1 && has_strided_access(statements)? {
            return Err(GeneratorError::template_mismatch(format!(
                "{SHAPE} cannot use simd width {} with strided operands",
                self.params.kernel.simd_width
            )));
        }
        Ok(Reduction {
            statement,
            mapping,
            node,
            op: statement.node(node)?.op,
            scalar_type: numeric_type.as_str(),
        })
    }

    /// Length of the reduced range: the leftmost vector operand, or any
    /// vector operand when the leftmost leaf is not a vector.
    fn problem_size(statement: &Statement) -> GeneratorResult<usize> {
        let root = statement.root_node()?;
        let Slot::Composite(node) = root.rhs else {
            return Err(GeneratorError::template_mismatch(format!(
                "{SHAPE} expects a reduction on the right of the root"
            )));
        };
        if let Ok(size) = vector_size(statement.lhs_most(node)?, false) {
            return Ok(size);
        }
        match filter_leaves(statement, LeafKind::Vector)?.first() {
            Some(Leaf::Vector(vector)) => Ok(vector.size),
            _ => Err(GeneratorError::template_mismatch(format!(
                "{SHAPE} found no vector operand to size the reduction"
            ))),
        }
    }

    fn emit_header(
        &self,
        stream: &mut KernelSourceStream,
        name: &str,
        reduction: &Reduction<'_>,
    ) -> GeneratorResult<()> {
        let workspace = format!("global {}* group_buffer", reduction.scalar_type);
        let kernel = &self.params.kernel;
        stream.line(&reqd_work_group_size(kernel.local_size_0, kernel.local_size_1));
        generate_prototype(
            stream,
            name,
            &["unsigned int N", "unsigned int num_groups", workspace.as_str()],
            std::slice::from_ref(reduction.mapping),
            std::slice::from_ref(reduction.statement),
        )?;
        stream.line("{").inc_tab();
        stream.line(&format!(
            "local {} buf[{}];",
            reduction.scalar_type, kernel.local_size_0
        ));
        stream.line(&format!("unsigned int lid = {LOCAL_ID};"));
        stream.line(&format!("{} acc = 0;", reduction.scalar_type));
        Ok(())
    }

    /// Folds `buf` into `buf[0]` within the work group.
    fn emit_group_fold(&self, stream: &mut KernelSourceStream, reduction: &Reduction<'_>) {
        let local_size = self.params.kernel.local_size_0;
        stream.line("buf[lid] = acc;");
        stream.scope(
            &format!("for (unsigned int stride = {local_size}/2; stride > 0; stride /= 2)"),
            |s| {
                s.line("barrier(CLK_LOCAL_MEM_FENCE);");
                s.scope("if (lid < stride)", |s| {
                    s.line(&reduction.accumulate("buf[lid]", "buf[lid + stride]"));
                });
            },
        );
    }

    fn first_pass(&self, prefix: &str, reduction: &Reduction<'_>) -> GeneratorResult<String> {
        let mut stream = KernelSourceStream::new();
        self.emit_header(&mut stream, &format!("{prefix}0"), reduction)?;
        element_wise_loop_1d(
            &mut stream,
            |stream, simd_width| {
                let value_type = vector_type(reduction.scalar_type, simd_width);
                stream.line(&format!("{value_type} value = {};", reduction.term("i", simd_width)?));
                if simd_width == 1 {
                    stream.line(&reduction.accumulate("acc", "value"));
                } else {
                    for component in 0..simd_width {
                        stream.line(&reduction.accumulate("acc", &format!("value.s{component:x}")));
                    }
                }
                Ok(())
            },
            self.params.fetching_policy,
            self.params.kernel.simd_width,
            "i",
            "N",
            GLOBAL_ID,
            GLOBAL_SIZE,
        )?;
        self.emit_group_fold(&mut stream, reduction);
        stream.scope("if (lid == 0)", |s| {
            s.line("group_buffer[get_group_id(0)] = buf[0];");
        });
        stream.dec_tab().line("}");
        Ok(stream.into_string())
    }

    fn second_pass(&self, prefix: &str, reduction: &Reduction<'_>) -> GeneratorResult<String> {
        let mut stream = KernelSourceStream::new();
        self.emit_header(&mut stream, &format!("{prefix}1"), reduction)?;
        let local_size = self.params.kernel.local_size_0;
        stream.scope(
            &format!("for (unsigned int g = lid; g < num_groups; g += {local_size})"),
            |s| {
                s.line(&reduction.accumulate("acc", "group_buffer[g]"));
            },
        );
        self.emit_group_fold(&mut stream, reduction);

        let result = reduction.finalize("buf[0]");
        let value = assigned_value(reduction.statement, reduction.mapping, result, "0", 1)?;
        let target = mapped_at(reduction.mapping, reduction.statement.root(), NodePosition::Lhs)?;
        let store = target.store("0", 1, &value)?;
        stream.scope("if (lid == 0)", |s| {
            s.line(&store);
        });
        stream.dec_tab().line("}");
        Ok(stream.into_string())
    }
}

impl KernelTemplate for ScalarReductionTemplate {
    fn parameters(&self) -> &KernelParameters {
        &self.params.kernel
    }

    fn binding_policy(&self) -> BindingPolicy {
        self.binding_policy
    }

    fn local_memory_elements(&self) -> usize {
        self.params.kernel.local_size_0 as usize
    }

    fn check_invalid_impl(&self, _device: &DeviceCapabilities) -> TemplateStatus {
        let kernel = &self.params.kernel;
        if self.params.fetching_policy == FetchPolicy::FromLocal {
            TemplateStatus::InvalidFetchingPolicy
        } else if !kernel.local_size_0.is_power_of_two() {
            TemplateStatus::LocalSizeNotPowerOfTwo
        } else if kernel.local_size_1 != 1 {
            TemplateStatus::UnsupportedLocalSize1
        } else {
            TemplateStatus::Valid
        }
    }

    fn generate_impl(
        &self,
        prefix: &str,
        statements: &[Statement],
        mappings: &[Mapping],
        _device: &DeviceCapabilities,
    ) -> GeneratorResult<Vec<String>> {
        let reduction = self.analyze(statements, mappings)?;
        Ok(vec![
            self.first_pass(prefix, &reduction)?,
            self.second_pass(prefix, &reduction)?,
        ])
    }

    fn enqueue(
        &self,
        prefix: &str,
        programs: &mut dyn LazyProgramCompiler,
        statements: &[Statement],
    ) -> GeneratorResult<()> {
        let statement = match statements {
            [statement] => statement,
            _ => {
                return Err(GeneratorError::template_mismatch(format!(
                    "{SHAPE} handles exactly one statement, got {}",
                    statements.len()
                )))
            }
        };
        let size = Self::problem_size(statement)?;
        let mut arguments = vec![
            KernelArg::UInt(to_u32("vector size", size)?),
            KernelArg::UInt(self.params.num_groups),
            KernelArg::Buffer(self.workspace),
        ];
        let mut current_arg = 3;
        set_arguments(statements, self.binding_policy, &mut arguments, &mut current_arg)?;

        let local_size = self.params.kernel.local_size_0 as usize;
        programs.launch(KernelLaunch {
            name: format!("{prefix}0"),
            arguments: arguments.clone(),
            local_size: [local_size, 1],
            global_size: [local_size * self.params.num_groups as usize, 1],
        })?;
        programs.launch(KernelLaunch {
            name: format!("{prefix}1"),
            arguments,
            local_size: [local_size, 1],
            global_size: [local_size, 1],
        })
    }
}
