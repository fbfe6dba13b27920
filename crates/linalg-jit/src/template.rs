//! Kernel templates: parameterized kernel shapes that turn statements into
//! source text, validate themselves against a device and launch the result.

use tracing::{debug, info, warn};

use crate::arguments::KernelArg;
use crate::binder::{BindingPolicy, SymbolicBinder};
use crate::device::DeviceCapabilities;
use crate::env;
use crate::error::{GeneratorError, GeneratorResult};
use crate::mapping::{map_statement, Mapping};
use crate::statement::Statement;
use crate::validity::{check_parameters, KernelParameters, TemplateStatus};

/// One kernel launch, fully bound.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelLaunch {
    pub name: String,
    pub arguments: Vec<KernelArg>,
    pub local_size: [usize; 2],
    pub global_size: [usize; 2],
}

/// Device runtime that compiles added sources on first use and launches
/// kernels from them by name.
pub trait LazyProgramCompiler {
    fn add(&mut self, source: &str);
    fn launch(&mut self, launch: KernelLaunch) -> GeneratorResult<()>;
}

pub trait KernelTemplate: Send + Sync {
    fn parameters(&self) -> &KernelParameters;

    fn binding_policy(&self) -> BindingPolicy;

    /// Elements of the statement's numeric type this shape keeps in local
    /// memory per work group.
    fn local_memory_elements(&self) -> usize {
        0
    }

    /// Shape-specific rules, consulted only once the generic device rules
    /// pass.
    fn check_invalid_impl(&self, _device: &DeviceCapabilities) -> TemplateStatus {
        TemplateStatus::Valid
    }

    /// Full sources of every kernel named `<prefix><k>`, one per launch.
    fn generate_impl(
        &self,
        prefix: &str,
        statements: &[Statement],
        mappings: &[Mapping],
        device: &DeviceCapabilities,
    ) -> GeneratorResult<Vec<String>>;

    /// Binds arguments and launches the kernels previously added to
    /// `programs` under `prefix`.
    fn enqueue(
        &self,
        prefix: &str,
        programs: &mut dyn LazyProgramCompiler,
        statements: &[Statement],
    ) -> GeneratorResult<()>;

    fn generate(
        &self,
        prefix: &str,
        statements: &[Statement],
        device: &DeviceCapabilities,
    ) -> GeneratorResult<Vec<String>> {
        if statements.is_empty() {
            return Err(GeneratorError::malformed("no statements to generate"));
        }
        let mut binder = SymbolicBinder::new(self.binding_policy());
        let mappings = statements
            .iter()
            .map(|statement| map_statement(statement, &mut binder))
            .collect::<GeneratorResult<Vec<_>>>()?;

        let sources = self
            .generate_impl(prefix, statements, &mappings, device)
            .map_err(|err| {
                if err.is_template_mismatch() {
                    warn!(prefix, error = %err, "template rejected statements");
                }
                err
            })?;
        debug!(
            prefix,
            statements = statements.len(),
            kernels = sources.len(),
            "generated kernel sources"
        );
        if env::source_dump().covers(prefix) {
            for (index, source) in sources.iter().enumerate() {
                info!(prefix, kernel = index, "generated source:\n{source}");
            }
        }
        Ok(sources)
    }

    /// Validates the parameters for `statements` on `device` without
    /// generating anything.
    fn check_invalid(
        &self,
        statements: &[Statement],
        device: &DeviceCapabilities,
    ) -> GeneratorResult<TemplateStatus> {
        let statement = statements
            .first()
            .ok_or_else(|| GeneratorError::malformed("no statements to validate"))?;
        let numeric_type = statement.resolve_numeric_type(statement.root())?;
        let status = check_parameters(
            self.parameters(),
            numeric_type,
            device,
            self.local_memory_elements(),
        );
        if !status.is_valid() {
            return Ok(status);
        }
        Ok(self.check_invalid_impl(device))
    }

    /// Generates the sources, adds them to `programs` and launches them.
    fn execute(
        &self,
        prefix: &str,
        programs: &mut dyn LazyProgramCompiler,
        statements: &[Statement],
        device: &DeviceCapabilities,
    ) -> GeneratorResult<()> {
        for source in self.generate(prefix, statements, device)? {
            programs.add(&source);
        }
        self.enqueue(prefix, programs, statements)
    }
}

/// Records sources and launches instead of running them.
#[derive(Debug, Default)]
pub struct RecordingCompiler {
    pub sources: Vec<String>,
    pub launches: Vec<KernelLaunch>,
}

impl LazyProgramCompiler for RecordingCompiler {
    fn add(&mut self, source: &str) {
        self.sources.push(source.to_string());
    }

    fn launch(&mut self, launch: KernelLaunch) -> GeneratorResult<()> {
        let declared = format!("kernel void {}(", launch.name);
        if !self.sources.iter().any(|source| source.contains(&declared)) {
            return Err(GeneratorError::runtime(format!(
                "kernel {} was never added",
                launch.name
            )));
        }
        self.launches.push(launch);
        Ok(())
    }
}
