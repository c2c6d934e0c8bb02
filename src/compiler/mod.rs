//! Field compiler: turns a node graph into a WGSL signed distance field shader.
//!
//! This module is organized into several submodules:
//! - `types`: Value types, parameter values, change flags, resource bindings
//! - `utils`: Identifier sanitizing, float formatting and hashing helpers
//! - `error`: Topology, generation and backend errors
//! - `wrapper`: Persistent per-node wrappers with structural and code hashes
//! - `context`: Code assembly context (branch variables, globals, params)
//! - `node_compiler`: The `FieldOperation` contract and builtin node types
//! - `params`: Uniform layout and parameter buffer collection
//! - `template`: Fixed WGSL templates and placeholder injection
//! - `validation`: Shader backend seam and naga validation
//! - `orchestrator`: `FieldCompiler`, the per-tick entry point
//!
//! The main entry point is `FieldCompiler::tick`.

pub mod context;
pub mod error;
pub mod node_compiler;
pub mod orchestrator;
pub mod params;
pub mod template;
pub mod types;
pub mod utils;
pub mod validation;
pub mod wrapper;

pub use context::{AssembledCode, CodeAssemblyContext};
pub use error::{CompileError, Diagnostic, TopologyError};
pub use node_compiler::{EmitNode, FieldOperation, NodeRegistry, UnconnectedInput};
pub use orchestrator::{
    CompiledArtifact, CompilerOptions, CompilerState, FieldCompiler, TickOutcome,
};
pub use params::{ParameterBuffer, ParameterLayout, collect_parameters};
pub use template::{ShaderTemplate, TemplateKind};
pub use types::{ChangeKind, ParamValue, ResourceBinding, ResourceKind, ValueType};
pub use validation::{NagaBackend, ShaderBackend, validate_wgsl, validate_wgsl_with_context};
pub use wrapper::WrapperTree;
