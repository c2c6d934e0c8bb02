//! Compiler entry point: change detection, conditional rebuild, parameter refresh.
//!
//! `FieldCompiler::tick` is synchronous. A rebuild runs assembly, template
//! injection and the shader backend in one call; parameter-only changes only
//! rewrite the bytes of the current artifact's buffer. Whatever fails, the
//! last good artifact stays bound.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::dsl::GraphDSL;
use crate::schema::{self, NodeScheme};

use super::context::CodeAssemblyContext;
use super::error::{CompileError, Diagnostic};
use super::node_compiler::{NodeRegistry, assemble};
use super::params::{ParamEntry, ParameterBuffer, ParameterLayout, collect_parameters};
use super::template::{InjectedParts, Placeholder, ShaderTemplate, TemplateKind};
use super::types::{ChangeKind, ResourceBinding};
use super::validation::{NagaBackend, ShaderBackend, SourceMap};
use super::wrapper::WrapperTree;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompilerOptions {
    pub template: TemplateKind,
    /// Run the shader backend on every rebuild.
    pub validate: bool,
    /// Maximum traversal depth before the graph is rejected.
    pub max_depth: usize,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            template: TemplateKind::Raymarch,
            validate: true,
            max_depth: 256,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CompilerState {
    Clean,
    ParametersDirty,
    /// Code must be regenerated; absorbs `ParametersDirty`.
    CodeDirty,
}

#[derive(Debug)]
pub enum TickOutcome {
    Unchanged,
    ParametersUpdated { changed_fields: usize },
    Rebuilt { change: ChangeKind },
    Failed { change: ChangeKind, error: CompileError },
}

impl TickOutcome {
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        match self {
            TickOutcome::Failed { error, .. } => error.diagnostics(),
            _ => Vec::new(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, TickOutcome::Failed { .. })
    }
}

/// Everything a host needs to bind the compiled field.
#[derive(Clone, Debug)]
pub struct CompiledArtifact {
    pub source: String,
    pub params: ParameterBuffer,
    pub resources: Vec<ResourceBinding>,
    pub structural_hash: u64,
    pub source_map: SourceMap,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ParamsFile {
    size_bytes: u32,
    entries: Vec<ParamEntry>,
}

impl CompiledArtifact {
    /// Writes `field.wgsl`, `resources.json` and the parameter files into `dir`.
    pub fn write_to_dir(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create output dir {}", dir.display()))?;
        let shader_path = dir.join("field.wgsl");
        std::fs::write(&shader_path, &self.source)
            .with_context(|| format!("failed to write {}", shader_path.display()))?;
        let resources_path = dir.join("resources.json");
        let resources = serde_json::to_string_pretty(&self.resources)?;
        std::fs::write(&resources_path, resources)
            .with_context(|| format!("failed to write {}", resources_path.display()))?;
        self.write_params_to_dir(dir)
    }

    /// Writes `params.json` (layout and values) and `params.bin` (buffer bytes).
    pub fn write_params_to_dir(&self, dir: &Path) -> Result<()> {
        let file = ParamsFile {
            size_bytes: self.params.layout().size_bytes(),
            entries: self.params.entries(),
        };
        let json_path = dir.join("params.json");
        std::fs::write(&json_path, serde_json::to_string_pretty(&file)?)
            .with_context(|| format!("failed to write {}", json_path.display()))?;
        let bin_path = dir.join("params.bin");
        std::fs::write(&bin_path, self.params.bytes())
            .with_context(|| format!("failed to write {}", bin_path.display()))?;
        Ok(())
    }
}

pub struct FieldCompiler {
    options: CompilerOptions,
    template: ShaderTemplate,
    tree: WrapperTree,
    backend: Box<dyn ShaderBackend>,
    state: CompilerState,
    artifact: Option<CompiledArtifact>,
    diagnostics: Vec<Diagnostic>,
}

impl FieldCompiler {
    /// Compiler with the bundled node scheme, builtin nodes and the naga backend.
    pub fn new(options: CompilerOptions) -> Result<Self> {
        let scheme = schema::load_default_scheme()?;
        Ok(Self::with_parts(options, NodeRegistry::with_builtin_nodes(), scheme))
    }

    pub fn with_parts(options: CompilerOptions, registry: NodeRegistry, scheme: NodeScheme) -> Self {
        Self {
            template: ShaderTemplate::for_kind(options.template),
            options,
            tree: WrapperTree::new(registry, scheme),
            backend: Box::new(NagaBackend),
            state: CompilerState::CodeDirty,
            artifact: None,
            diagnostics: Vec::new(),
        }
    }

    pub fn with_backend(mut self, backend: impl ShaderBackend + 'static) -> Self {
        self.backend = Box::new(backend);
        self
    }

    /// Replaces the template. Forces a rebuild on the next tick.
    pub fn with_template(mut self, template: ShaderTemplate) -> Self {
        self.template = template;
        self.state = CompilerState::CodeDirty;
        self.artifact = None;
        self
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    pub fn state(&self) -> CompilerState {
        self.state
    }

    /// Last successfully compiled artifact.
    pub fn artifact(&self) -> Option<&CompiledArtifact> {
        self.artifact.as_ref()
    }

    /// Diagnostics of the most recent failed rebuild; empty after a success.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn tree(&self) -> &WrapperTree {
        &self.tree
    }

    /// Forces `kind` onto a node for the next tick.
    pub fn mark_dirty(&mut self, node_id: &str, kind: ChangeKind) -> bool {
        self.tree.mark_dirty(node_id, kind)
    }

    pub fn tick(&mut self, graph: &GraphDSL) -> TickOutcome {
        let mut change = match self.tree.update(graph, self.options.max_depth) {
            Ok(change) => change,
            Err(error) => return self.fail(ChangeKind::STRUCTURE, error),
        };
        if self.artifact.is_none() && self.state == CompilerState::CodeDirty && change.is_empty() {
            // Nothing was ever built for this template.
            change = ChangeKind::CODE;
        }
        log::debug!("tick classified as {}", change.label());

        if change.needs_rebuild() {
            self.state = CompilerState::CodeDirty;
            return match self.rebuild(graph) {
                Ok(artifact) => {
                    log::info!(
                        "rebuilt field shader ({}): {} params, {} resources, {} bytes of WGSL",
                        change.label(),
                        artifact.params.layout().fields().len(),
                        artifact.resources.len(),
                        artifact.source.len()
                    );
                    self.artifact = Some(artifact);
                    self.diagnostics.clear();
                    self.state = CompilerState::Clean;
                    TickOutcome::Rebuilt { change }
                }
                Err(error) => self.fail(change, error),
            };
        }

        if change.contains(ChangeKind::PARAMETERS) {
            if self.state == CompilerState::Clean {
                self.state = CompilerState::ParametersDirty;
            }
            let changed_fields = match self.artifact.as_mut() {
                Some(artifact) => collect_parameters(graph, self.tree.scheme(), &mut artifact.params),
                None => 0,
            };
            if self.state == CompilerState::ParametersDirty {
                self.state = CompilerState::Clean;
            }
            log::debug!("parameter refresh updated {changed_fields} fields");
            return TickOutcome::ParametersUpdated { changed_fields };
        }

        TickOutcome::Unchanged
    }

    fn fail(&mut self, change: ChangeKind, error: CompileError) -> TickOutcome {
        log::warn!("field compile failed, keeping last good artifact: {error}");
        self.state = CompilerState::CodeDirty;
        self.diagnostics = error.diagnostics();
        TickOutcome::Failed { change, error }
    }

    fn rebuild(&mut self, graph: &GraphDSL) -> Result<CompiledArtifact, CompileError> {
        let mut ctx = CodeAssemblyContext::new();
        assemble(&self.tree, graph, &mut ctx, self.options.max_depth)?;
        let code = ctx.finish();

        let layout = ParameterLayout::build(&code.params);
        let float_params = layout.wgsl_struct_members();
        let resources = code
            .resources
            .iter()
            .map(ResourceBinding::wgsl_decl)
            .collect::<Vec<_>>()
            .join("\n");
        let injected = self.template.inject(&InjectedParts {
            globals: &code.globals,
            float_params: &float_params,
            resources: &resources,
            definitions: &code.definitions,
            field_call: &code.calls,
        });

        let mut source_map = SourceMap::default();
        if let Some(s) = injected.section(Placeholder::Definitions) {
            source_map.add_section(s.start_line, code.definition_owners);
        }
        if let Some(s) = injected.section(Placeholder::FieldCall) {
            source_map.add_section(s.start_line, code.call_owners);
        }

        if self.options.validate {
            if let Err(mut diags) = self.backend.compile(&injected.source) {
                source_map.attribute(&mut diags);
                return Err(CompileError::Backend(diags));
            }
        }

        let mut params = ParameterBuffer::new(layout);
        collect_parameters(graph, self.tree.scheme(), &mut params);

        Ok(CompiledArtifact {
            source: injected.source,
            params,
            resources: code.resources,
            structural_hash: self.tree.root_structural_hash().unwrap_or_default(),
            source_map,
        })
    }
}
