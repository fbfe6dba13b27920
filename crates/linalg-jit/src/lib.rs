pub mod arguments;
pub mod binder;
pub mod codegen;
pub mod device;
mod env;
pub mod error;
pub mod mapped;
pub mod mapping;
pub mod statement;
pub mod template;
pub mod templates;
pub mod validity;

pub use arguments::{set_arguments, KernelArg, KernelArgumentSink, ScalarValue};
pub use binder::{BindingPolicy, SymbolicBinder};
pub use codegen::{FetchPolicy, KernelSourceStream};
pub use device::{DeviceCapabilities, DeviceClass};
pub use error::{GeneratorError, GeneratorResult};
pub use mapping::{map_statement, Mapping};
pub use statement::{Leaf, NumericType, OperatorKind, Slot, Statement, StatementNode, StorageId};
pub use template::{KernelLaunch, KernelTemplate, LazyProgramCompiler, RecordingCompiler};
pub use templates::{
    ReductionParameters, ScalarReductionTemplate, VectorAxpyParameters, VectorAxpyTemplate,
};
pub use validity::{check_parameters, KernelParameters, TemplateStatus};
