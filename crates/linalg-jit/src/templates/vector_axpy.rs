use serde::{Deserialize, Serialize};

use crate::arguments::{set_arguments, KernelArg};
use crate::binder::BindingPolicy;
use crate::codegen::{element_wise_loop_1d, generate_prototype, FetchPolicy, KernelSourceStream};
use crate::device::DeviceCapabilities;
use crate::error::{GeneratorError, GeneratorResult};
use crate::mapped::MappedKind;
use crate::mapping::Mapping;
use crate::statement::{has_strided_access, vector_size, NodePosition, Statement};
use crate::template::{KernelLaunch, KernelTemplate, LazyProgramCompiler};
use crate::validity::{KernelParameters, TemplateStatus};

use super::{
    assigned_value, ensure_elementwise_operands, mapped_at, operand, reqd_work_group_size, to_u32,
    GLOBAL_ID, GLOBAL_SIZE,
};

const SHAPE: &str = "vector axpy";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorAxpyParameters {
    #[serde(flatten)]
    pub kernel: KernelParameters,
    pub num_groups: u32,
    pub fetching_policy: FetchPolicy,
}

impl VectorAxpyParameters {
    pub fn new(
        simd_width: u32,
        local_size_0: u32,
        num_groups: u32,
        fetching_policy: FetchPolicy,
    ) -> Self {
        Self {
            kernel: KernelParameters::new(simd_width, local_size_0, 1, 1),
            num_groups,
            fetching_policy,
        }
    }
}

/// Elementwise vector statements (`y = a*x + b`, `y += exp(x)`, ...) fused
/// into a single one-dimensional kernel.
#[derive(Debug, Clone)]
pub struct VectorAxpyTemplate {
    params: VectorAxpyParameters,
    binding_policy: BindingPolicy,
}

impl VectorAxpyTemplate {
    pub fn new(params: VectorAxpyParameters, binding_policy: BindingPolicy) -> Self {
        Self {
            params,
            binding_policy,
        }
    }

    pub fn axpy_parameters(&self) -> &VectorAxpyParameters {
        &self.params
    }

    fn problem_size(statements: &[Statement]) -> GeneratorResult<usize> {
        let mut size = None;
        for statement in statements {
            let current = vector_size(statement.root_node()?, false)?;
            match size {
                None => size = Some(current),
                Some(expected) if expected != current => {
                    return Err(GeneratorError::template_mismatch(format!(
                        "{SHAPE} requires equally sized statements, found {expected} and {current}"
                    )))
                }
                Some(_) => {}
            }
        }
        size.ok_or_else(|| GeneratorError::malformed("no statements to size"))
    }

    fn ensure_supported(
        &self,
        statements: &[Statement],
        mappings: &[Mapping],
    ) -> GeneratorResult<()> {
        for (statement, mapping) in statements.iter().zip(mappings) {
            statement.ensure_tree(statement.root())?;
            ensure_elementwise_operands(mapping, SHAPE, None)?;
            let target = mapped_at(mapping, statement.root(), NodePosition::Lhs)?;
            if target.kind() != MappedKind::Vector {
                return Err(GeneratorError::template_mismatch(format!(
                    "{SHAPE} must assign to a vector, found {:?}",
                    target.kind()
                )));
            }
        }
        Self::problem_size(statements)?;
        if self.params.kernel.simd_width > 1 && has_strided_access(statements)? {
            return Err(GeneratorError::template_mismatch(format!(
                "{SHAPE} cannot use simd width {} with strided operands",
                self.params.kernel.simd_width
            )));
        }
        Ok(())
    }
}

impl KernelTemplate for VectorAxpyTemplate {
    fn parameters(&self) -> &KernelParameters {
        &self.params.kernel
    }

    fn binding_policy(&self) -> BindingPolicy {
        self.binding_policy
    }

    fn check_invalid_impl(&self, _device: &DeviceCapabilities) -> TemplateStatus {
        if self.params.fetching_policy == FetchPolicy::FromLocal {
            return TemplateStatus::InvalidFetchingPolicy;
        }
        TemplateStatus::Valid
    }

    fn generate_impl(
        &self,
        prefix: &str,
        statements: &[Statement],
        mappings: &[Mapping],
        _device: &DeviceCapabilities,
    ) -> GeneratorResult<Vec<String>> {
        self.ensure_supported(statements, mappings)?;
        let kernel = &self.params.kernel;

        let mut stream = KernelSourceStream::new();
        stream.line(&reqd_work_group_size(kernel.local_size_0, kernel.local_size_1));
        generate_prototype(
            &mut stream,
            &format!("{prefix}0"),
            &["unsigned int N"],
            mappings,
            statements,
        )?;
        stream.line("{").inc_tab();
        element_wise_loop_1d(
            &mut stream,
            |stream, simd_width| {
                for (statement, mapping) in statements.iter().zip(mappings) {
                    let root = statement.root();
                    let rhs =
                        operand(statement, mapping, root, NodePosition::Rhs, "i", simd_width, 0)?;
                    let value = assigned_value(statement, mapping, rhs, "i", simd_width)?;
                    let target = mapped_at(mapping, root, NodePosition::Lhs)?;
                    stream.line(&target.store("i", simd_width, &value)?);
                }
                Ok(())
            },
            self.params.fetching_policy,
            kernel.simd_width,
            "i",
            "N",
            GLOBAL_ID,
            GLOBAL_SIZE,
        )?;
        stream.dec_tab().line("}");
        Ok(vec![stream.into_string()])
    }

    fn enqueue(
        &self,
        prefix: &str,
        programs: &mut dyn LazyProgramCompiler,
        statements: &[Statement],
    ) -> GeneratorResult<()> {
        let size = Self::problem_size(statements)?;
        let mut arguments = vec![KernelArg::UInt(to_u32("vector size", size)?)];
        let mut current_arg = 1;
        set_arguments(statements, self.binding_policy, &mut arguments, &mut current_arg)?;

        let local_size = self.params.kernel.local_size_0 as usize;
        programs.launch(KernelLaunch {
            name: format!("{prefix}0"),
            arguments,
            local_size: [local_size, 1],
            global_size: [local_size * self.params.num_groups as usize, 1],
        })
    }
}
