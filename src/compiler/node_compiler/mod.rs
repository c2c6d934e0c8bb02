//! Node compiler infrastructure: the `FieldOperation` contract, the registry
//! resolving node types to operations, and the traversal that drives them.

pub mod combine_nodes;
pub mod input_nodes;
pub mod primitive_nodes;
pub mod texture_nodes;
pub mod transform_nodes;

use std::collections::{HashMap, HashSet};
use std::fmt;

use anyhow::{Result, anyhow, bail};

use crate::dsl::{GraphDSL, GraphIndex, Node};
use crate::schema::{NodeTypeScheme, PortKind};

use super::context::{CodeAssemblyContext, PARAMS_VAR, param_field_name};
use super::error::{CompileError, TopologyError};
use super::wrapper::{GraphNodeWrapper, WrapperInput, WrapperTree};

/// What the traversal does with an unconnected field input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnconnectedInput {
    /// Fail the pass with an unconnected-input topology error.
    Required,
    /// Leave the branch out entirely.
    Skip,
    /// Enter the branch and assign this expression to its accumulator.
    Fragment(String),
}

/// Code contribution contract implemented by every node type.
///
/// For a node with field inputs the traversal calls, in order:
/// `add_definitions`, `declare_resources` (both once per node per pass),
/// `try_build_custom_code`, then for every active field slot
/// `get_pre_code`, the producing subgraph, and `get_post_code`, each inside
/// a freshly pushed branch context.
pub trait FieldOperation: fmt::Debug + Send {
    /// Registers parameter fields, globals and definitions.
    fn add_definitions(&self, node: &EmitNode, ctx: &mut CodeAssemblyContext) -> Result<()> {
        node.declare_values(ctx)
    }

    fn declare_resources(&self, _node: &EmitNode, _ctx: &mut CodeAssemblyContext) -> Result<()> {
        Ok(())
    }

    /// Emits the node's whole contribution. Returning true skips pre/post sequencing.
    fn try_build_custom_code(
        &self,
        _node: &EmitNode,
        _ctx: &mut CodeAssemblyContext,
    ) -> Result<bool> {
        Ok(false)
    }

    fn get_pre_code(
        &self,
        _node: &EmitNode,
        _ctx: &mut CodeAssemblyContext,
        _slot: usize,
    ) -> Result<()> {
        Ok(())
    }

    /// Default: pass the branch result through to the parent accumulator.
    fn get_post_code(
        &self,
        _node: &EmitNode,
        ctx: &mut CodeAssemblyContext,
        _slot: usize,
    ) -> Result<()> {
        let line = format!("{} = {};", ctx.parent_field(), ctx.field());
        ctx.append_call(&line);
        Ok(())
    }

    fn unconnected_input(&self, _node: &EmitNode, _slot: usize) -> UnconnectedInput {
        UnconnectedInput::Required
    }
}

pub type OperationFactory = fn() -> Box<dyn FieldOperation>;

/// Maps node type names to operation factories. Resolved once per wrapper.
#[derive(Clone)]
pub struct NodeRegistry {
    factories: HashMap<String, OperationFactory>,
}

impl fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        types.sort_unstable();
        f.debug_struct("NodeRegistry").field("types", &types).finish()
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::with_builtin_nodes()
    }
}

impl NodeRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn with_builtin_nodes() -> Self {
        let mut r = Self::empty();
        // Value inputs
        r.register("FloatInput", || Box::new(input_nodes::FloatInput));
        r.register("Vector3Input", || Box::new(input_nodes::Vector3Input));

        // Primitives
        r.register("Sphere", || Box::new(primitive_nodes::Sphere));
        r.register("Box", || Box::new(primitive_nodes::BoxField));
        r.register("Torus", || Box::new(primitive_nodes::Torus));
        r.register("Plane", || Box::new(primitive_nodes::Plane));
        r.register("CustomField", || Box::new(primitive_nodes::CustomField));

        // Transforms
        r.register("Translate", || Box::new(transform_nodes::Translate));
        r.register("Scale", || Box::new(transform_nodes::Scale));
        r.register("Repeat", || Box::new(transform_nodes::Repeat));
        r.register("Twist", || Box::new(transform_nodes::Twist));

        // Combinators and modifiers
        r.register("Combine", || Box::new(combine_nodes::Combine));
        r.register("TextureDisplace", || Box::new(texture_nodes::TextureDisplace));
        r
    }

    /// Registers (or replaces) the factory for `node_type`.
    pub fn register(&mut self, node_type: &str, factory: OperationFactory) {
        self.factories.insert(node_type.to_string(), factory);
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.factories.contains_key(node_type)
    }

    pub fn create(&self, node_type: &str) -> Option<Box<dyn FieldOperation>> {
        self.factories.get(node_type).map(|f| f())
    }
}

#[derive(Clone, Debug)]
enum SlotBinding<'a> {
    /// Value port read from the field parameter buffer.
    Constant { kind: PortKind, expr: String },
    /// Value port fed by an upstream value node.
    Linked { expr: String },
    /// Field port and the node producing it, if any.
    Field { source: Option<&'a str> },
}

/// A node as seen by its operation during one pass.
#[derive(Debug)]
pub struct EmitNode<'a> {
    node: &'a Node,
    prefix: &'a str,
    scheme: &'a NodeTypeScheme,
    slots: Vec<SlotBinding<'a>>,
    active: Vec<usize>,
}

impl<'a> EmitNode<'a> {
    pub fn id(&self) -> &'a str {
        &self.node.id
    }

    pub fn node_type(&self) -> &'a str {
        &self.node.node_type
    }

    /// Unique identifier prefix for globals, definitions and params of this node.
    pub fn prefix(&self) -> &'a str {
        self.prefix
    }

    /// String param, falling back to the scheme default.
    pub fn param_str(&self, key: &str) -> Option<&'a str> {
        self.scheme.param(self.node, key).and_then(|v| v.as_str())
    }

    fn slot(&self, port: &str) -> Result<(usize, &SlotBinding<'a>)> {
        let (slot, _) = self
            .scheme
            .port(port)
            .ok_or_else(|| anyhow!("{} has no input '{port}'", self.node.node_type))?;
        Ok((slot, &self.slots[slot]))
    }

    /// Declares every constant-bound value input as a shader parameter.
    pub fn declare_values(&self, ctx: &mut CodeAssemblyContext) -> Result<()> {
        for port in &self.scheme.inputs {
            if port.kind != PortKind::Field {
                self.declare_value(ctx, &port.id)?;
            }
        }
        Ok(())
    }

    /// Declares one value input. Linked inputs need no declaration.
    pub fn declare_value(&self, ctx: &mut CodeAssemblyContext, port: &str) -> Result<()> {
        match self.slot(port)?.1 {
            SlotBinding::Constant { kind, .. } => {
                let ty = kind
                    .value_type()
                    .ok_or_else(|| anyhow!("'{port}' is not a value input"))?;
                ctx.declare_param(self.prefix, self.id(), port, ty);
                Ok(())
            }
            SlotBinding::Linked { .. } => Ok(()),
            SlotBinding::Field { .. } => bail!("'{port}' is a field input, not a value"),
        }
    }

    /// WGSL expression of a value input.
    pub fn value(&self, port: &str) -> Result<&str> {
        match self.slot(port)?.1 {
            SlotBinding::Constant { expr, .. } | SlotBinding::Linked { expr } => Ok(expr),
            SlotBinding::Field { .. } => bail!("'{port}' is a field input, not a value"),
        }
    }

    /// Field slots the traversal will enter, in order.
    pub fn active_field_slots(&self) -> &[usize] {
        &self.active
    }

    /// Whether `slot` is the last branch the traversal enters for this node.
    pub fn is_last_active(&self, slot: usize) -> bool {
        self.active.last() == Some(&slot)
    }
}

enum BranchPlan<'a> {
    Visit(&'a str),
    Neutral(String),
}

/// Walks from the graph's field output and drives every operation into `ctx`.
///
/// `tree` must have been updated against `graph` in the same tick.
pub fn assemble(
    tree: &WrapperTree,
    graph: &GraphDSL,
    ctx: &mut CodeAssemblyContext,
    max_depth: usize,
) -> Result<(), CompileError> {
    let root = graph.field_output().ok_or(TopologyError::MissingRoot)?;
    let mut assembler = Assembler {
        tree,
        index: GraphIndex::new(graph),
        stack: Vec::new(),
        defined: HashSet::new(),
        max_depth,
    };
    let root_node = assembler
        .index
        .node(root)
        .ok_or_else(|| TopologyError::RootNotFound(root.to_string()))?;
    let output = assembler.node_scheme(root_node)?.output;
    if output != PortKind::Field {
        return Err(CompileError::generation(
            root,
            format!(
                "{} produces {}, not a field",
                root_node.node_type,
                output.label()
            ),
        ));
    }
    assembler.emit_field(ctx, root)
}

struct Assembler<'a> {
    tree: &'a WrapperTree,
    index: GraphIndex<'a>,
    stack: Vec<String>,
    defined: HashSet<String>,
    max_depth: usize,
}

fn contract_error(node_id: &str) -> impl Fn(anyhow::Error) -> CompileError + '_ {
    move |e| CompileError::generation(node_id, format!("{e:#}"))
}

impl<'a> Assembler<'a> {
    fn node_scheme(&self, node: &Node) -> Result<&'a NodeTypeScheme, CompileError> {
        let tree: &'a WrapperTree = self.tree;
        tree.scheme().node_type(&node.node_type).ok_or_else(|| {
            CompileError::generation(&node.id, format!("unknown node type: {}", node.node_type))
        })
    }

    fn wrapper(&self, node_id: &str) -> Result<&'a GraphNodeWrapper, CompileError> {
        let tree: &'a WrapperTree = self.tree;
        tree.wrapper(node_id)
            .ok_or_else(|| CompileError::generation(node_id, "node has no wrapper for this pass"))
    }

    fn enter(&mut self, node_id: &str) -> Result<(), CompileError> {
        if let Some(pos) = self.stack.iter().position(|n| n == node_id) {
            let mut path = self.stack[pos..].to_vec();
            path.push(node_id.to_string());
            return Err(TopologyError::Cycle { path }.into());
        }
        if self.stack.len() >= self.max_depth {
            return Err(TopologyError::TooDeep {
                limit: self.max_depth,
            }
            .into());
        }
        self.stack.push(node_id.to_string());
        Ok(())
    }

    fn emit_field(&mut self, ctx: &mut CodeAssemblyContext, node_id: &str) -> Result<(), CompileError> {
        self.enter(node_id)?;
        ctx.enter_node(node_id);
        let result = self.emit_field_body(ctx, node_id);
        ctx.leave_node();
        self.stack.pop();
        result
    }

    fn emit_field_body(
        &mut self,
        ctx: &mut CodeAssemblyContext,
        node_id: &str,
    ) -> Result<(), CompileError> {
        let wrapper = self.wrapper(node_id)?;
        let (emit, plans) = self.bind(ctx, node_id, wrapper)?;
        let op = wrapper.operation();
        let err = contract_error(node_id);

        self.define_once(ctx, &emit, op)?;
        if op.try_build_custom_code(&emit, ctx).map_err(&err)? {
            return Ok(());
        }

        for (slot, plan) in plans {
            ctx.push_context(slot);
            op.get_pre_code(&emit, ctx, slot).map_err(&err)?;
            match plan {
                BranchPlan::Visit(source) => {
                    self.emit_field(ctx, source)?;
                }
                BranchPlan::Neutral(fragment) => {
                    let line = format!("{} = {fragment};", ctx.field());
                    ctx.append_call(&line);
                }
            }
            op.get_post_code(&emit, ctx, slot).map_err(&err)?;
            ctx.pop_context();
        }
        Ok(())
    }

    /// Resolves a value node and returns the expression of its `value` input.
    fn emit_value(&mut self, ctx: &mut CodeAssemblyContext, node_id: &str) -> Result<String, CompileError> {
        self.enter(node_id)?;
        ctx.enter_node(node_id);
        let result = self.emit_value_body(ctx, node_id);
        ctx.leave_node();
        self.stack.pop();
        result
    }

    fn emit_value_body(
        &mut self,
        ctx: &mut CodeAssemblyContext,
        node_id: &str,
    ) -> Result<String, CompileError> {
        let wrapper = self.wrapper(node_id)?;
        let (emit, _) = self.bind(ctx, node_id, wrapper)?;
        self.define_once(ctx, &emit, wrapper.operation())?;
        emit.value("value")
            .map(str::to_string)
            .map_err(contract_error(node_id))
    }

    fn define_once(
        &mut self,
        ctx: &mut CodeAssemblyContext,
        emit: &EmitNode<'a>,
        op: &dyn FieldOperation,
    ) -> Result<(), CompileError> {
        if !self.defined.insert(emit.id().to_string()) {
            return Ok(());
        }
        let err = contract_error(emit.id());
        op.add_definitions(emit, ctx).map_err(&err)?;
        op.declare_resources(emit, ctx).map_err(&err)
    }

    /// Builds the node's view for its operation and the branches to enter.
    fn bind(
        &mut self,
        ctx: &mut CodeAssemblyContext,
        node_id: &str,
        wrapper: &'a GraphNodeWrapper,
    ) -> Result<(EmitNode<'a>, Vec<(usize, BranchPlan<'a>)>), CompileError> {
        let node = self
            .index
            .node(node_id)
            .ok_or_else(|| TopologyError::RootNotFound(node_id.to_string()))?;
        let scheme = self.node_scheme(node)?;

        let mut slots = Vec::with_capacity(scheme.inputs.len());
        for (port, input) in scheme.inputs.iter().zip(wrapper.inputs()) {
            let binding = match input {
                WrapperInput::Dangling { node_id: from } => {
                    return Err(TopologyError::MissingNode {
                        from: from.clone(),
                        to: node_id.to_string(),
                    }
                    .into());
                }
                WrapperInput::Constant => SlotBinding::Constant {
                    kind: port.kind,
                    expr: format!("{PARAMS_VAR}.{}", param_field_name(wrapper.prefix(), &port.id)),
                },
                WrapperInput::Unconnected => SlotBinding::Field { source: None },
                WrapperInput::Linked { key, .. } => {
                    let source = self
                        .index
                        .node(key.as_str())
                        .ok_or_else(|| TopologyError::MissingNode {
                            from: key.as_str().to_string(),
                            to: node_id.to_string(),
                        })?;
                    let produced = self.node_scheme(source)?.output;
                    if produced != port.kind {
                        return Err(TopologyError::PortKindMismatch {
                            node_id: node_id.to_string(),
                            port_id: port.id.clone(),
                            expected: port.kind.label(),
                            actual: produced.label(),
                            from: source.id.clone(),
                        }
                        .into());
                    }
                    if port.kind == PortKind::Field {
                        SlotBinding::Field {
                            source: Some(source.id.as_str()),
                        }
                    } else {
                        let expr = self.emit_value(ctx, &source.id)?;
                        SlotBinding::Linked { expr }
                    }
                }
            };
            slots.push(binding);
        }

        let mut emit = EmitNode {
            node,
            prefix: wrapper.prefix(),
            scheme,
            slots,
            active: Vec::new(),
        };

        let mut plans = Vec::new();
        for (slot, binding) in emit.slots.iter().enumerate() {
            let SlotBinding::Field { source } = binding else {
                continue;
            };
            match source {
                Some(source) => plans.push((slot, BranchPlan::Visit(*source))),
                None => match wrapper.operation().unconnected_input(&emit, slot) {
                    UnconnectedInput::Required => {
                        return Err(TopologyError::UnconnectedInput {
                            node_id: node_id.to_string(),
                            port_id: scheme.inputs[slot].id.clone(),
                        }
                        .into());
                    }
                    UnconnectedInput::Skip => {}
                    UnconnectedInput::Fragment(text) => plans.push((slot, BranchPlan::Neutral(text))),
                },
            }
        }
        emit.active = plans.iter().map(|(slot, _)| *slot).collect();
        Ok((emit, plans))
    }
}


#[cfg(test)]
mod tests {
    use super::test_utils::{assemble_graph, connect};
    use super::*;
    use crate::dsl::Node;
    use serde_json::json;

    #[test]
    fn registry_resolves_builtin_types() {
        let r = NodeRegistry::with_builtin_nodes();
        assert!(r.contains("Combine"));
        assert!(r.create("Sphere").is_some());
        assert!(r.create("Teapot").is_none());
    }

    #[test]
    fn translate_wraps_child_in_a_branch() {
        let mut g = GraphDSL::with_root("g", "t");
        g.nodes.push(Node::new("s", "Sphere"));
        g.nodes.push(Node::new("t", "Translate"));
        connect(&mut g, "s", "t", "field");

        let code = assemble_graph(&g).unwrap();
        let lines: Vec<&str> = code.calls.lines().map(str::trim).collect();
        assert_eq!(lines[0], "var p1a = p0;");
        assert_eq!(lines[1], "var f1a: vec4f;");
        assert!(lines[2].starts_with("p1a = p1a - field_params."));
        assert!(lines[3].starts_with("f1a = vec4f(1.0, 1.0, 1.0, length(p1a) - field_params."));
        assert_eq!(lines[4], "f0 = f1a;");
        assert_eq!(code.call_owners[3].as_deref(), Some("s"));
        assert_eq!(code.call_owners[4].as_deref(), Some("t"));

        let names: Vec<&str> = code.params.iter().map(|p| p.param.as_str()).collect();
        assert_eq!(names, vec!["offset", "radius"]);
    }

    #[test]
    fn unconnected_required_input_is_a_topology_error() {
        let mut g = GraphDSL::with_root("g", "t");
        g.nodes.push(Node::new("t", "Scale"));
        let err = assemble_graph(&g).unwrap_err();
        assert!(matches!(
            err,
            CompileError::Topology(TopologyError::UnconnectedInput { ref node_id, ref port_id })
                if node_id == "t" && port_id == "field"
        ));
    }

    #[test]
    fn cycles_are_reported_with_their_path() {
        let mut g = GraphDSL::with_root("g", "a");
        g.nodes.push(Node::new("a", "Translate"));
        g.nodes.push(Node::new("b", "Scale"));
        connect(&mut g, "b", "a", "field");
        connect(&mut g, "a", "b", "field");
        let err = assemble_graph(&g).unwrap_err();
        match err {
            CompileError::Topology(TopologyError::Cycle { path }) => {
                assert_eq!(path, vec!["a", "b", "a"]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn value_nodes_replace_bound_constants() {
        let mut g = GraphDSL::with_root("g", "s");
        g.nodes.push(Node::new("r", "FloatInput").with_param("value", json!(2.0)));
        g.nodes.push(Node::new("s", "Sphere"));
        g.connections.push(crate::dsl::Connection::between(
            crate::dsl::Endpoint::new("r", "value"),
            crate::dsl::Endpoint::new("s", "radius"),
        ));

        let code = assemble_graph(&g).unwrap();
        assert_eq!(code.params.len(), 1);
        assert_eq!(code.params[0].node_id, "r");
        assert_eq!(code.params[0].param, "value");
        assert!(code.calls.contains(&format!("field_params.{}", code.params[0].name)));
    }

    #[test]
    fn port_kind_mismatch_is_reported() {
        let mut g = GraphDSL::with_root("g", "s");
        g.nodes.push(Node::new("v", "Vector3Input"));
        g.nodes.push(Node::new("s", "Sphere"));
        g.connections.push(crate::dsl::Connection::between(
            crate::dsl::Endpoint::new("v", "value"),
            crate::dsl::Endpoint::new("s", "radius"),
        ));
        let err = assemble_graph(&g).unwrap_err();
        assert!(matches!(
            err,
            CompileError::Topology(TopologyError::PortKindMismatch { expected: "f32", actual: "vec3", .. })
        ));
    }

    #[test]
    fn value_node_cannot_be_the_root() {
        let mut g = GraphDSL::with_root("g", "v");
        g.nodes.push(Node::new("v", "FloatInput"));
        assert!(matches!(
            assemble_graph(&g),
            Err(CompileError::Generation { .. })
        ));
    }

    #[test]
    fn depth_limit_is_enforced() {
        let mut g = GraphDSL::with_root("g", "t0");
        g.nodes.push(Node::new("leaf", "Sphere"));
        let mut prev = "leaf".to_string();
        for i in 0..4 {
            let id = format!("t{}", 3 - i);
            g.nodes.push(Node::new(&id, "Translate"));
            connect(&mut g, &prev, &id, "field");
            prev = id;
        }
        let mut t = test_utils::tree();
        t.update(&g, 64).unwrap();
        let mut ctx = CodeAssemblyContext::new();
        assert!(matches!(
            assemble(&t, &g, &mut ctx, 3),
            Err(CompileError::Topology(TopologyError::TooDeep { limit: 3 }))
        ));
    }
}
