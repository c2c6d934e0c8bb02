//! Compiler-owned shadow tree over the authored graph.
//!
//! Each node reachable from the field output gets one `GraphNodeWrapper`.
//! Wrappers reference their inputs by [`WrapperKey`] instead of graph
//! structs; [`WrapperTree::update`] walks the graph once per tick, inputs
//! before self, and reports what kind of work the orchestrator has to do.

use std::collections::{HashMap, HashSet};

use crate::dsl::{GraphDSL, GraphIndex, Node};
use crate::schema::{NodeScheme, NodeTypeScheme, PortKind};

use super::error::{CompileError, TopologyError};
use super::node_compiler::{FieldOperation, NodeRegistry};
use super::types::ChangeKind;
use super::utils::{StructuralHasher, node_prefix};

/// Identity of a wrapper: the id of the node it shadows.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WrapperKey(pub String);

impl WrapperKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// State of one input slot, ordered like the node scheme's inputs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WrapperInput {
    Linked {
        key: WrapperKey,
        output_port: String,
    },
    /// Value port bound to the node's own param.
    Constant,
    /// Field port with nothing connected.
    Unconnected,
    /// Connected to a node that is not in the graph.
    Dangling { node_id: String },
}

// Slot tags folded into the structural hash.
const SLOT_LINKED: u8 = 1;
const SLOT_CONSTANT: u8 = 2;
const SLOT_UNCONNECTED: u8 = 3;
const SLOT_DANGLING: u8 = 4;
const SLOT_BACK_EDGE: u8 = 5;

#[derive(Debug)]
pub struct GraphNodeWrapper {
    key: WrapperKey,
    node_type: String,
    prefix: String,
    operation: Box<dyn FieldOperation>,
    inputs: Vec<WrapperInput>,
    structural_hash: u64,
    code_hash: u64,
    param_fingerprint: u64,
    code_fingerprint: u64,
    pending: ChangeKind,
    last_change: ChangeKind,
}

impl GraphNodeWrapper {
    pub fn key(&self) -> &WrapperKey {
        &self.key
    }

    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    /// Unique identifier prefix, stable for the wrapper's lifetime.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn operation(&self) -> &dyn FieldOperation {
        self.operation.as_ref()
    }

    pub fn inputs(&self) -> &[WrapperInput] {
        &self.inputs
    }

    /// Fingerprint of the subgraph shape rooted here. Independent of node ids
    /// and param values.
    pub fn structural_hash(&self) -> u64 {
        self.structural_hash
    }

    /// Structural hash folded with every code-affecting param in the subgraph.
    pub fn code_hash(&self) -> u64 {
        self.code_hash
    }

    /// Changes reported for this subgraph by the most recent update.
    pub fn last_change(&self) -> ChangeKind {
        self.last_change
    }
}

#[derive(Debug)]
pub struct WrapperTree {
    wrappers: HashMap<WrapperKey, GraphNodeWrapper>,
    root: Option<WrapperKey>,
    used_prefixes: HashSet<String>,
    registry: NodeRegistry,
    scheme: NodeScheme,
    /// Set when an update stopped partway; the next successful one reports STRUCTURE.
    resync: bool,
}

struct UpdatePass<'g> {
    index: GraphIndex<'g>,
    visited: HashMap<String, ChangeKind>,
    stack: Vec<String>,
    max_depth: usize,
}

impl WrapperTree {
    pub fn new(registry: NodeRegistry, scheme: NodeScheme) -> Self {
        Self {
            wrappers: HashMap::new(),
            root: None,
            used_prefixes: HashSet::new(),
            registry,
            scheme,
            resync: false,
        }
    }

    pub fn scheme(&self) -> &NodeScheme {
        &self.scheme
    }

    pub fn root(&self) -> Option<&WrapperKey> {
        self.root.as_ref()
    }

    pub fn wrapper(&self, node_id: &str) -> Option<&GraphNodeWrapper> {
        self.wrappers.get(&WrapperKey(node_id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.wrappers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wrappers.is_empty()
    }

    pub fn root_structural_hash(&self) -> Option<u64> {
        let root = self.root.as_ref()?;
        self.wrappers.get(root).map(|w| w.structural_hash)
    }

    /// Forces `kind` onto the node's next update. Returns false when the node
    /// has no wrapper yet (it will report STRUCTURE when created anyway).
    pub fn mark_dirty(&mut self, node_id: &str, kind: ChangeKind) -> bool {
        match self.wrappers.get_mut(&WrapperKey(node_id.to_string())) {
            Some(w) => {
                w.pending |= kind;
                true
            }
            None => false,
        }
    }

    /// Synchronizes wrappers with `graph` and returns every change discovered.
    ///
    /// Chains deeper than `max_depth` fail with `TopologyError::TooDeep`. A
    /// failed update may leave some wrappers synchronized and others not, so
    /// the next successful update also reports STRUCTURE.
    pub fn update(&mut self, graph: &GraphDSL, max_depth: usize) -> Result<ChangeKind, CompileError> {
        match self.sync(graph, max_depth) {
            Ok(mut change) => {
                if std::mem::take(&mut self.resync) {
                    change |= ChangeKind::STRUCTURE;
                }
                Ok(change)
            }
            Err(e) => {
                self.resync = true;
                Err(e)
            }
        }
    }

    fn sync(&mut self, graph: &GraphDSL, max_depth: usize) -> Result<ChangeKind, CompileError> {
        let root_id = graph.field_output().ok_or(TopologyError::MissingRoot)?;
        let mut pass = UpdatePass {
            index: GraphIndex::new(graph),
            visited: HashMap::new(),
            stack: Vec::new(),
            max_depth,
        };
        if pass.index.node(root_id).is_none() {
            return Err(TopologyError::RootNotFound(root_id.to_string()).into());
        }

        let mut change = self.update_node(&mut pass, root_id)?;

        let root_key = WrapperKey(root_id.to_string());
        if self.root.as_ref() != Some(&root_key) {
            change |= ChangeKind::STRUCTURE;
            self.root = Some(root_key);
        }

        // Drop wrappers that are no longer reachable from the root.
        let visited = &pass.visited;
        let used_prefixes = &mut self.used_prefixes;
        self.wrappers.retain(|key, w| {
            let keep = visited.contains_key(key.as_str());
            if !keep {
                log::debug!("dropping wrapper for node '{}'", key.as_str());
                used_prefixes.remove(&w.prefix);
            }
            keep
        });

        Ok(change)
    }

    fn update_node(&mut self, pass: &mut UpdatePass<'_>, node_id: &str) -> Result<ChangeKind, CompileError> {
        if let Some(change) = pass.visited.get(node_id) {
            return Ok(*change);
        }
        let Some(node) = pass.index.node(node_id) else {
            return Err(TopologyError::RootNotFound(node_id.to_string()).into());
        };
        let node_scheme = self
            .scheme
            .node_type(&node.node_type)
            .cloned()
            .ok_or_else(|| {
                CompileError::generation(node_id, format!("unknown node type: {}", node.node_type))
            })?;

        if pass.stack.len() >= pass.max_depth {
            return Err(TopologyError::TooDeep {
                limit: pass.max_depth,
            }
            .into());
        }
        pass.stack.push(node_id.to_string());
        let mut change = ChangeKind::empty();
        let mut inputs = Vec::with_capacity(node_scheme.inputs.len());
        let mut hasher = StructuralHasher::new();
        hasher.write_str(&node.node_type);
        hasher.write_u64(node_scheme.inputs.len() as u64);
        let mut child_code_hashes = Vec::new();

        for port in &node_scheme.inputs {
            let input = match pass.index.incoming(node_id, &port.id) {
                Some(conn) if pass.index.node(&conn.from.node_id).is_none() => {
                    hasher.write_u8(SLOT_DANGLING);
                    WrapperInput::Dangling {
                        node_id: conn.from.node_id.clone(),
                    }
                }
                Some(conn) => {
                    let from = conn.from.node_id.as_str();
                    if pass.stack.iter().any(|n| n == from) {
                        // Back edge: not followed here; assembly reports the cycle.
                        hasher.write_u8(SLOT_BACK_EDGE);
                    } else {
                        change |= self.update_node(pass, from)?;
                        let child = self.wrappers.get(&WrapperKey(from.to_string()));
                        hasher.write_u8(SLOT_LINKED);
                        hasher.write_str(&conn.from.port_id);
                        hasher.write_u64(child.map_or(0, |w| w.structural_hash));
                        child_code_hashes.push(child.map_or(0, |w| w.code_hash));
                    }
                    WrapperInput::Linked {
                        key: WrapperKey(from.to_string()),
                        output_port: conn.from.port_id.clone(),
                    }
                }
                None if port.kind == PortKind::Field => {
                    hasher.write_u8(SLOT_UNCONNECTED);
                    WrapperInput::Unconnected
                }
                None => {
                    hasher.write_u8(SLOT_CONSTANT);
                    WrapperInput::Constant
                }
            };
            inputs.push(input);
        }
        pass.stack.pop();

        let structural_hash = hasher.finish();
        let param_fingerprint = param_fingerprint(node, &node_scheme, &inputs);
        let code_fingerprint = code_fingerprint(node, &node_scheme);
        let mut code_hasher = StructuralHasher::new();
        code_hasher.write_u64(structural_hash);
        code_hasher.write_u64(code_fingerprint);
        for h in child_code_hashes {
            code_hasher.write_u64(h);
        }
        let code_hash = code_hasher.finish();

        let key = WrapperKey(node_id.to_string());
        let local = match self.wrappers.get_mut(&key) {
            Some(w) if w.node_type == node.node_type => {
                let mut local = std::mem::take(&mut w.pending);
                if w.inputs != inputs {
                    local |= ChangeKind::STRUCTURE;
                }
                if w.code_fingerprint != code_fingerprint {
                    local |= ChangeKind::CODE;
                }
                if w.param_fingerprint != param_fingerprint {
                    local |= ChangeKind::PARAMETERS;
                }
                local
            }
            Some(w) => {
                // Retyped in place: new operation, same prefix.
                w.operation = create_operation(&self.registry, node)?;
                w.node_type = node.node_type.clone();
                w.pending = ChangeKind::empty();
                ChangeKind::STRUCTURE
            }
            None => {
                let operation = create_operation(&self.registry, node)?;
                let prefix = self.allocate_prefix(node_id);
                self.wrappers.insert(
                    key.clone(),
                    GraphNodeWrapper {
                        key: key.clone(),
                        node_type: node.node_type.clone(),
                        prefix,
                        operation,
                        inputs: Vec::new(),
                        structural_hash: 0,
                        code_hash: 0,
                        param_fingerprint: 0,
                        code_fingerprint: 0,
                        pending: ChangeKind::empty(),
                        last_change: ChangeKind::empty(),
                    },
                );
                ChangeKind::STRUCTURE
            }
        };
        change |= local;

        if let Some(w) = self.wrappers.get_mut(&key) {
            w.inputs = inputs;
            w.structural_hash = structural_hash;
            w.code_hash = code_hash;
            w.param_fingerprint = param_fingerprint;
            w.code_fingerprint = code_fingerprint;
            w.last_change = change;
        }
        if !change.is_empty() {
            log::debug!("node '{node_id}' changed: {:?}", change);
        }
        pass.visited.insert(node_id.to_string(), change);
        Ok(change)
    }

    fn allocate_prefix(&mut self, node_id: &str) -> String {
        let base = node_prefix(node_id);
        let mut candidate = base.clone();
        let mut n = 2;
        while self.used_prefixes.contains(&candidate) {
            candidate = format!("{base}_{n}");
            n += 1;
        }
        self.used_prefixes.insert(candidate.clone());
        candidate
    }
}

fn create_operation(
    registry: &NodeRegistry,
    node: &Node,
) -> Result<Box<dyn FieldOperation>, CompileError> {
    registry.create(&node.node_type).ok_or_else(|| {
        CompileError::generation(
            &node.id,
            format!("no operation registered for node type: {}", node.node_type),
        )
    })
}

/// Hash of the effective values bound to constant value ports.
fn param_fingerprint(node: &Node, scheme: &NodeTypeScheme, inputs: &[WrapperInput]) -> u64 {
    let mut h = StructuralHasher::new();
    for (port, input) in scheme.inputs.iter().zip(inputs) {
        if *input != WrapperInput::Constant {
            continue;
        }
        h.write_str(&port.id);
        write_json(&mut h, scheme.param(node, &port.id));
    }
    h.finish()
}

/// Hash of the effective values of code-affecting params.
fn code_fingerprint(node: &Node, scheme: &NodeTypeScheme) -> u64 {
    let mut h = StructuralHasher::new();
    for key in &scheme.code_params {
        h.write_str(key);
        write_json(&mut h, scheme.param(node, key));
    }
    h.finish()
}

fn write_json(h: &mut StructuralHasher, value: Option<&serde_json::Value>) {
    match value.and_then(|v| serde_json::to_vec(v).ok()) {
        Some(bytes) => {
            h.write_u8(1);
            h.write_u64(bytes.len() as u64);
            h.write_bytes(&bytes);
        }
        None => h.write_u8(0),
    }
}
