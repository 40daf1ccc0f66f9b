use crate::graph::{TaskGraph, TaskStages};
use crate::parser::RawGraph;
use crate::registry::PluginRegistry;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use pipecore::{
    EventBus, GraphError, HandlerChain, InitContext, LockCoordinator, OutputEdge, PluginSpec,
    Resources, SchedulerHandle, Stage, StageConfig, StageWiring, TransferMode, Value, WorkerId,
    RESERVED_FIELDS,
};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Turns raw pipeline definitions into a `TaskGraph`.
pub struct GraphBuilder<'a> {
    pub registry: &'a PluginRegistry,
    pub worker_id: WorkerId,
    pub locks: &'a LockCoordinator,
    pub events: &'a EventBus,
    pub resources: &'a Resources,
    pub scheduler: SchedulerHandle,
    pub default_lock_ex: Duration,
}

impl<'a> GraphBuilder<'a> {
    /// Build every task. Any error aborts the whole build.
    pub async fn build(&self, raw: &RawGraph) -> Result<TaskGraph, GraphError> {
        let mut graph = TaskGraph::default();
        for (task, body) in raw {
            let stages = body.as_object().ok_or_else(|| {
                GraphError::Invalid(format!("task '{}' must be a map of stages", task))
            })?;

            let mut specs = Vec::with_capacity(stages.len());
            for (key, params) in stages {
                specs.push((key.clone(), self.parse_spec(task, key, params)?));
            }
            check_topology(task, &specs)?;

            let mut built = TaskStages::default();
            for (key, spec) in specs {
                built.push(self.create_stage(task, &key, spec).await?);
            }
            tracing::info!("Built task 「{}」 with {} stages", task, built.len());
            graph.insert(task.clone(), built);
        }
        Ok(graph)
    }

    /// Extract the reserved fields; what remains is the stage config.
    pub fn parse_spec(&self, task: &str, key: &str, params: &Value) -> Result<PluginSpec, GraphError> {
        let fields = params
            .as_object()
            .ok_or_else(|| invalid(task, key, "stage", "must be a map"))?;
        let field = |name: &str| fields.get(name).cloned();
        let config: StageConfig = fields
            .iter()
            .filter(|(name, _)| !RESERVED_FIELDS.contains(&name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        let plugin_type = match field("type") {
            Some(Value::String(t)) if !t.is_empty() => t,
            Some(Value::Null) | None => {
                return Err(GraphError::MissingType {
                    task: task.to_string(),
                    key: key.to_string(),
                })
            }
            Some(_) => return Err(invalid(task, key, "type", "must be a string")),
        };

        let start = flag(task, key, "start", field("start"))?;
        let wait = flag(task, key, "wait", field("wait"))?;
        let can_empty = flag(task, key, "canEmpty", field("canEmpty"))?;
        let lock_ex = match field("lockEx") {
            None | Some(Value::Null) => self.default_lock_ex,
            Some(v) => v
                .as_u64()
                .map(Duration::from_secs)
                .ok_or_else(|| invalid(task, key, "lockEx", "must be a number of seconds"))?,
        };
        let name = match field("name") {
            Some(Value::String(name)) => name,
            None | Some(Value::Null) => uuid::Uuid::new_v4().simple().to_string(),
            Some(_) => return Err(invalid(task, key, "name", "must be a string")),
        };
        let handlers = match field("errHandler") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(h)) => vec![h],
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(h) => Ok(h),
                    _ => Err(invalid(task, key, "errHandler", "entries must be handler names")),
                })
                .collect::<Result<_, _>>()?,
            Some(_) => return Err(invalid(task, key, "errHandler", "must be a name or a list")),
        };
        let outputs = parse_outputs(task, key, field("output"), wait)?;

        Ok(PluginSpec {
            plugin_type,
            name,
            config,
            outputs,
            start,
            wait,
            lock_ex,
            can_empty,
            handlers,
        })
    }

    async fn create_stage(&self, task: &str, key: &str, spec: PluginSpec) -> Result<Stage, GraphError> {
        let plugin_error = |source| GraphError::Plugin {
            task: task.to_string(),
            key: key.to_string(),
            source,
        };

        let mut plugin = self
            .registry
            .create_plugin(&spec.plugin_type, &spec.config)
            .ok_or_else(|| GraphError::UnknownPluginType {
                task: task.to_string(),
                key: key.to_string(),
                plugin_type: spec.plugin_type.clone(),
            })?
            .map_err(plugin_error)?;

        let mut handlers = HandlerChain::default();
        for name in &spec.handlers {
            let handler = self
                .registry
                .handler(name)
                .ok_or_else(|| GraphError::UnknownHandler {
                    task: task.to_string(),
                    key: key.to_string(),
                    handler: name.clone(),
                })?;
            handlers.push(handler);
        }

        let ctx = InitContext {
            task,
            key,
            spec: &spec,
            worker_id: self.worker_id,
            locks: self.locks,
            events: self.events,
            resources: self.resources,
        };
        plugin.init(&ctx).await.map_err(plugin_error)?;

        let wiring = StageWiring {
            worker_id: self.worker_id,
            locks: self.locks.clone(),
            emitter: self.events.create_emitter(task, key),
            scheduler: self.scheduler.clone(),
        };
        Ok(Stage::new(task, key, spec, plugin, handlers, wiring))
    }
}

fn invalid(task: &str, key: &str, field: &str, reason: &str) -> GraphError {
    GraphError::InvalidField {
        task: task.to_string(),
        key: key.to_string(),
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn flag(task: &str, key: &str, field: &str, value: Option<Value>) -> Result<bool, GraphError> {
    match value {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(b),
        Some(Value::Number(n)) => Ok(n.as_f64().map(|n| n != 0.0).unwrap_or(false)),
        Some(_) => Err(invalid(task, key, field, "must be a boolean")),
    }
}

/// Normalize the `output` field into edges.
///
/// A string names one edge, a list names several; in a map each value
/// selects the edge's transfer mode and wait flag.
fn parse_outputs(
    task: &str,
    key: &str,
    output: Option<Value>,
    stage_wait: bool,
) -> Result<Vec<OutputEdge>, GraphError> {
    let output = match output {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(output) => output,
    };

    match output {
        Value::String(target) => Ok(vec![OutputEdge::local(target).with_wait(stage_wait)]),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(target) => Ok(OutputEdge::local(target).with_wait(stage_wait)),
                _ => Err(invalid(task, key, "output", "list entries must be stage keys")),
            })
            .collect(),
        Value::Object(map) => map
            .into_iter()
            .map(|(target, mode)| parse_edge(task, key, target, mode, stage_wait))
            .collect(),
        _ => Err(invalid(task, key, "output", "must be a stage key, a list or a map")),
    }
}

fn parse_edge(
    task: &str,
    key: &str,
    target: String,
    mode: Value,
    stage_wait: bool,
) -> Result<OutputEdge, GraphError> {
    let edge = OutputEdge::local(target).with_wait(stage_wait);
    match mode {
        Value::Null => Ok(edge),
        Value::Bool(wait) => Ok(edge.with_wait(wait)),
        Value::Number(n) => n
            .as_i64()
            .map(|n| edge.with_transfer(TransferMode::from_index(n)))
            .ok_or_else(|| invalid(task, key, "output", "worker index must be an integer")),
        Value::String(s) => transfer_by_name(task, key, &s).map(|t| edge.with_transfer(t)),
        Value::Object(fields) => {
            let transfer = match fields.get("transfer") {
                None | Some(Value::Null) => TransferMode::Local,
                Some(Value::Number(n)) => n
                    .as_i64()
                    .map(TransferMode::from_index)
                    .ok_or_else(|| invalid(task, key, "output", "worker index must be an integer"))?,
                Some(Value::String(s)) => transfer_by_name(task, key, s)?,
                Some(_) => return Err(invalid(task, key, "output", "unsupported transfer")),
            };
            let wait = match fields.get("wait") {
                None | Some(Value::Null) => stage_wait,
                Some(Value::Bool(b)) => *b,
                Some(_) => return Err(invalid(task, key, "output", "wait must be a boolean")),
            };
            Ok(edge.with_transfer(transfer).with_wait(wait))
        }
        Value::Array(_) => Err(invalid(task, key, "output", "unsupported edge value")),
    }
}

fn transfer_by_name(task: &str, key: &str, name: &str) -> Result<TransferMode, GraphError> {
    match name {
        "local" => Ok(TransferMode::Local),
        "broadcast" => Ok(TransferMode::Broadcast),
        other => Err(invalid(
            task,
            key,
            "output",
            &format!("unknown transfer mode '{}'", other),
        )),
    }
}

/// Reject edges to stages outside the task; warn about cycles and stages
/// no start stage can reach.
fn check_topology(task: &str, specs: &[(String, PluginSpec)]) -> Result<(), GraphError> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut index: HashMap<&str, NodeIndex> = HashMap::new();
    for (key, _) in specs {
        index.insert(key.as_str(), graph.add_node(key.as_str()));
    }

    for (key, spec) in specs {
        for edge in &spec.outputs {
            let to = index
                .get(edge.target.as_str())
                .ok_or_else(|| GraphError::UnknownOutput {
                    task: task.to_string(),
                    key: key.clone(),
                    target: edge.target.clone(),
                })?;
            graph.add_edge(index[key.as_str()], *to, ());
        }
    }

    if is_cyclic_directed(&graph) {
        tracing::warn!("Task 「{}」 contains a cycle", task);
    }

    let starts: Vec<NodeIndex> = specs
        .iter()
        .filter(|(_, spec)| spec.start)
        .map(|(key, _)| index[key.as_str()])
        .collect();
    if starts.is_empty() {
        tracing::warn!("Task 「{}」 has no start stage and can only be reached by send", task);
        return Ok(());
    }

    let mut reached = HashSet::new();
    for start in starts {
        let mut dfs = Dfs::new(&graph, start);
        while let Some(node) = dfs.next(&graph) {
            reached.insert(node);
        }
    }
    for idx in graph.node_indices() {
        if !reached.contains(&idx) {
            tracing::warn!("Stage {}.{} is unreachable from any start stage", task, graph[idx]);
        }
    }
    Ok(())
}
