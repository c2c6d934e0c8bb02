//! Per-pass accumulator for generated WGSL.
//!
//! A `CodeAssemblyContext` is created fresh for every compile pass. Node
//! compilers write into it through the `FieldOperation` contract; the
//! orchestrator consumes it with [`CodeAssemblyContext::finish`].
//!
//! Branch isolation works through a stack of [`ContextId`]s. The root context
//! is `0`; entering slot `i` of a node at context `c` pushes
//! `<c><depth><letter i>` (the root's `0` is omitted), so the two inputs of a
//! combinator at the root become `1a` and `1b`, and their children `1a2a`,
//! `1a2b`, ... Every context owns a position variable `p<id>` (vec3f) and a
//! field accumulator `f<id>` (vec4f, xyz albedo and w distance).

use std::collections::HashSet;

use super::params::ParamDecl;
use super::types::{ResourceBinding, ResourceKind, ValueType};
use super::utils::sanitize_wgsl_ident;

/// Name of the uniform holding every field parameter.
pub const PARAMS_VAR: &str = "field_params";
/// Bind group of the field parameter uniform and node resources.
pub const FIELD_BIND_GROUP: u32 = 0;
/// First binding available to node resources (0 = frame, 1 = field params).
pub const FIRST_RESOURCE_BINDING: u32 = 2;

const INDENT: &str = "    ";

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ContextId {
    depth: u32,
    path: String,
}

impl ContextId {
    pub fn root() -> Self {
        Self {
            depth: 0,
            path: "0".to_string(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// Id of the branch entered through `slot`.
    pub fn child(&self, slot: usize) -> Self {
        let depth = self.depth + 1;
        let base = if self.depth == 0 { "" } else { self.path.as_str() };
        Self {
            depth,
            path: format!("{base}{depth}{}", slot_suffix(slot)),
        }
    }

    pub fn position(&self) -> String {
        format!("p{}", self.path)
    }

    pub fn field(&self) -> String {
        format!("f{}", self.path)
    }
}

fn slot_suffix(slot: usize) -> String {
    // Letters cover every built-in operator; wider nodes fall back to `z<n>`.
    if slot < 25 {
        char::from(b'a' + slot as u8).to_string()
    } else {
        format!("z{slot}")
    }
}

/// Parameter field name for `port` of the node with `prefix`.
pub fn param_field_name(prefix: &str, port: &str) -> String {
    format!("{prefix}_{}", sanitize_wgsl_ident(port))
}

/// Output of a finished pass, ready for template injection.
#[derive(Clone, Debug, Default)]
pub struct AssembledCode {
    pub globals: String,
    pub definitions: String,
    pub calls: String,
    /// Owning node id per line of `definitions`.
    pub definition_owners: Vec<Option<String>>,
    /// Owning node id per line of `calls`.
    pub call_owners: Vec<Option<String>>,
    pub params: Vec<ParamDecl>,
    pub resources: Vec<ResourceBinding>,
}

#[derive(Debug)]
pub struct CodeAssemblyContext {
    globals: Vec<(String, String)>,
    global_names: HashSet<String>,
    definitions: String,
    definition_owners: Vec<Option<String>>,
    calls: String,
    call_owners: Vec<Option<String>>,
    stack: Vec<ContextId>,
    emitting: Vec<String>,
    params: Vec<ParamDecl>,
    param_names: HashSet<String>,
    resources: Vec<ResourceBinding>,
}

impl Default for CodeAssemblyContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeAssemblyContext {
    pub fn new() -> Self {
        Self {
            globals: Vec::new(),
            global_names: HashSet::new(),
            definitions: String::new(),
            definition_owners: Vec::new(),
            calls: String::new(),
            call_owners: Vec::new(),
            stack: vec![ContextId::root()],
            emitting: Vec::new(),
            params: Vec::new(),
            param_names: HashSet::new(),
            resources: Vec::new(),
        }
    }

    /// Registers a reusable module-scope item. Later calls with the same name are ignored.
    pub fn add_global(&mut self, name: &str, text: &str) -> bool {
        if !self.global_names.insert(name.to_string()) {
            return false;
        }
        self.globals.push((name.to_string(), text.trim_end().to_string()));
        true
    }

    pub fn append_definition(&mut self, text: &str) {
        let owner = self.emitting.last().cloned();
        for line in text.lines() {
            self.definitions.push_str(line);
            self.definitions.push('\n');
            self.definition_owners.push(owner.clone());
        }
    }

    /// Appends statements to the field function body, attributed to the
    /// node currently emitting.
    pub fn append_call(&mut self, text: &str) {
        let owner = self.emitting.last().cloned();
        for line in text.lines() {
            self.calls.push_str(INDENT);
            self.calls.push_str(line);
            self.calls.push('\n');
            self.call_owners.push(owner.clone());
        }
    }

    /// Enters the branch for `slot` of the node at the current context and
    /// declares its branch-local variables.
    pub fn push_context(&mut self, slot: usize) -> ContextId {
        let parent = self.current().clone();
        let child = parent.child(slot);
        let decl = format!(
            "var {} = {};\nvar {}: vec4f;",
            child.position(),
            parent.position(),
            child.field()
        );
        self.append_call(&decl);
        self.stack.push(child.clone());
        child
    }

    pub fn pop_context(&mut self) -> Option<ContextId> {
        // The root context is never popped.
        if self.stack.len() > 1 {
            self.stack.pop()
        } else {
            None
        }
    }

    pub fn current(&self) -> &ContextId {
        // `stack` always holds the root.
        &self.stack[self.stack.len() - 1]
    }

    fn parent(&self) -> &ContextId {
        &self.stack[self.stack.len().saturating_sub(2)]
    }

    pub fn position(&self) -> String {
        self.current().position()
    }

    pub fn field(&self) -> String {
        self.current().field()
    }

    pub fn parent_position(&self) -> String {
        self.parent().position()
    }

    pub fn parent_field(&self) -> String {
        self.parent().field()
    }

    /// Field variable of a sibling branch. Meant for post code, where the
    /// current context is one of the node's branches.
    pub fn branch_field(&self, slot: usize) -> String {
        self.parent().child(slot).field()
    }

    pub fn enter_node(&mut self, node_id: &str) {
        self.emitting.push(node_id.to_string());
    }

    pub fn leave_node(&mut self) {
        self.emitting.pop();
    }

    /// Declares a shader-exposed parameter and returns the expression reading it.
    pub fn declare_param(
        &mut self,
        prefix: &str,
        node_id: &str,
        param: &str,
        ty: ValueType,
    ) -> String {
        let name = param_field_name(prefix, param);
        if self.param_names.insert(name.clone()) {
            self.params.push(ParamDecl {
                name: name.clone(),
                node_id: node_id.to_string(),
                param: param.to_string(),
                ty,
            });
        }
        format!("{PARAMS_VAR}.{name}")
    }

    /// Declares a bound resource and returns its variable name.
    pub fn declare_resource(
        &mut self,
        prefix: &str,
        node_id: &str,
        name: &str,
        kind: ResourceKind,
    ) -> String {
        let var = format!("{prefix}_{}", sanitize_wgsl_ident(name));
        if !self.resources.iter().any(|r| r.name == var) {
            let binding = FIRST_RESOURCE_BINDING + self.resources.len() as u32;
            self.resources.push(ResourceBinding {
                name: var.clone(),
                node_id: node_id.to_string(),
                kind,
                group: FIELD_BIND_GROUP,
                binding,
            });
        }
        var
    }

    pub fn params(&self) -> &[ParamDecl] {
        &self.params
    }

    pub fn resources(&self) -> &[ResourceBinding] {
        &self.resources
    }

    pub fn finish(self) -> AssembledCode {
        let globals = self
            .globals
            .iter()
            .map(|(_, text)| text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        AssembledCode {
            globals,
            definitions: self.definitions,
            calls: self.calls,
            definition_owners: self.definition_owners,
            call_owners: self.call_owners,
            params: self.params,
            resources: self.resources,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_ids_follow_depth_and_slot() {
        let root = ContextId::root();
        assert_eq!(root.as_str(), "0");
        let a = root.child(0);
        let b = root.child(1);
        assert_eq!(a.as_str(), "1a");
        assert_eq!(b.as_str(), "1b");
        assert_eq!(a.child(1).as_str(), "1a2b");
        assert_eq!(a.child(1).position(), "p1a2b");
        assert_eq!(b.field(), "f1b");
    }

    #[test]
    fn push_context_declares_branch_locals() {
        let mut ctx = CodeAssemblyContext::new();
        ctx.enter_node("n");
        let id = ctx.push_context(1);
        assert_eq!(id.as_str(), "1b");
        assert_eq!(ctx.position(), "p1b");
        assert_eq!(ctx.parent_field(), "f0");
        assert_eq!(ctx.branch_field(0), "f1a");
        ctx.pop_context();
        assert_eq!(ctx.field(), "f0");
        assert!(ctx.pop_context().is_none());
        ctx.leave_node();

        let code = ctx.finish();
        assert_eq!(code.calls, "    var p1b = p0;\n    var f1b: vec4f;\n");
        assert_eq!(code.call_owners, vec![Some("n".to_string()); 2]);
    }

    #[test]
    fn first_global_writer_wins() {
        let mut ctx = CodeAssemblyContext::new();
        assert!(ctx.add_global("helper", "fn helper() {}"));
        assert!(!ctx.add_global("helper", "fn helper() { other(); }"));
        ctx.add_global("second", "fn second() {}\n");
        assert_eq!(ctx.finish().globals, "fn helper() {}\n\nfn second() {}");
    }

    #[test]
    fn params_and_resources_are_deduplicated() {
        let mut ctx = CodeAssemblyContext::new();
        let a = ctx.declare_param("node_s", "s", "radius", ValueType::F32);
        let b = ctx.declare_param("node_s", "s", "radius", ValueType::F32);
        assert_eq!(a, "field_params.node_s_radius");
        assert_eq!(a, b);
        assert_eq!(ctx.params().len(), 1);

        let tex = ctx.declare_resource("node_t", "t", "tex", ResourceKind::Texture2D);
        let samp = ctx.declare_resource("node_t", "t", "samp", ResourceKind::Sampler);
        ctx.declare_resource("node_t", "t", "tex", ResourceKind::Texture2D);
        assert_eq!(tex, "node_t_tex");
        assert_eq!(samp, "node_t_samp");
        let bindings: Vec<u32> = ctx.resources().iter().map(|r| r.binding).collect();
        assert_eq!(bindings, vec![2, 3]);
    }
}
