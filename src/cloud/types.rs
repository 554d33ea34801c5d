//! Cloud object and model types.
//!
//! `Model::prepare` turns the raw device tree into the two flat tables the
//! broker runs on: `commands` (action-node id → payload template) and
//! `actions` (node name → ready-to-dispatch [`ActionConfig`] with its
//! JSON-RPC payload fully resolved).

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::jsonrpc;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("prepare: action {0}: command not found in commands")]
    CommandNotFound(String),
    #[error("prepare: command {0}: payload should be string")]
    PayloadNotString(String),
    #[error("prepare: param {0}: payload params should be strings")]
    ParamNotString(String),
    #[error("prepare: placeholder {0} not found in action params")]
    PlaceholderNotFound(String),
    #[error("prepare: action {0} outside a subsystem path")]
    OrphanAction(String),
    #[error("prepare: fill payload: {0}")]
    PayloadParse(#[from] serde_json::Error),
}

/// Configuration snapshot for this edge, loaded once at startup.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EdgeObject {
    #[serde(rename = "_id", default)]
    pub oid: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub models: ModelRef,
    /// Hierarchical map backing `{{object.config.X}}` template lookups.
    #[serde(default)]
    pub config: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelRef {
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Model {
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(default)]
    pub data: ModelData,
    #[serde(skip)]
    actions: HashMap<String, ActionConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelData {
    #[serde(default)]
    pub children: Vec<Node>,
    /// Transformation sources keyed by function name (`read.<parent>`,
    /// `write.<parent>`).
    #[serde(default)]
    pub expressions: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Node {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub node_type: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub edge: EdgeSection,
    /// Opaque protocol method of a command node.
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EdgeSection {
    #[serde(default)]
    pub read: ReadSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReadSection {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub interval: String,
}

/// A job extracted from the model: what to send, where, and on which
/// schedule.
#[derive(Debug, Clone, Default)]
pub struct ActionConfig {
    pub id: String,
    /// Connector type, derived from the second-to-last subsystem id on the
    /// node's path.
    pub connector: String,
    /// `schedule` or `subscribe`.
    pub kind: String,
    pub interval: String,
    /// Fully resolved JSON-RPC envelope.
    pub payload: Vec<u8>,
}

struct CapturedCommand {
    command_id: String,
    params: Map<String, Value>,
}

impl Model {
    pub fn actions(&self) -> &HashMap<String, ActionConfig> {
        &self.actions
    }

    pub fn expressions(&self) -> &HashMap<String, String> {
        &self.data.expressions
    }

    pub fn prepare(&mut self) -> Result<(), ModelError> {
        let mut commands: HashMap<String, Node> = HashMap::new();
        let mut action_cmds: HashMap<String, CapturedCommand> = HashMap::new();
        let mut actions: HashMap<String, ActionConfig> = HashMap::new();

        let mut path = Vec::new();
        Self::walk(
            &mut path,
            &mut commands,
            &mut action_cmds,
            &mut actions,
            &self.data.children,
        )?;

        for action in actions.values_mut() {
            let captured = action_cmds
                .get(&action.id)
                .ok_or_else(|| ModelError::CommandNotFound(action.id.clone()))?;
            let command = commands
                .get(&captured.command_id)
                .ok_or_else(|| ModelError::CommandNotFound(action.id.clone()))?;

            let template = command
                .params
                .get("payload")
                .and_then(Value::as_str)
                .ok_or_else(|| ModelError::PayloadNotString(command.id.clone()))?;

            let mut data = captured.params.clone();
            data.insert("parent.id".to_string(), Value::String(action.id.clone()));

            action.payload = fill_payload(template, &data)?;
        }

        self.actions = actions;
        Ok(())
    }

    fn walk(
        path: &mut Vec<String>,
        commands: &mut HashMap<String, Node>,
        action_cmds: &mut HashMap<String, CapturedCommand>,
        actions: &mut HashMap<String, ActionConfig>,
        children: &[Node],
    ) -> Result<(), ModelError> {
        for child in children {
            if !child.active {
                continue;
            }

            // subsystem ids form the path an action's connector is read from
            if child.node_type == "subsystem" {
                path.push(child.id.clone());
                Self::walk(path, commands, action_cmds, actions, &child.children)?;
                path.pop();
                continue;
            }

            if child.node_type == "action" {
                let mut node = child.clone();
                node.children = Vec::new();
                commands.insert(node.id.clone(), node);
                continue;
            }

            if !child.edge.read.command.is_empty() {
                if path.len() < 2 {
                    return Err(ModelError::OrphanAction(child.id.clone()));
                }

                for cc in &child.children {
                    if cc.id == child.edge.read.command {
                        action_cmds.insert(
                            child.id.clone(),
                            CapturedCommand {
                                command_id: cc.command.clone(),
                                params: cc.params.clone(),
                            },
                        );
                    }
                }

                actions.insert(
                    child.name.clone(),
                    ActionConfig {
                        id: child.id.clone(),
                        connector: path[path.len() - 2].clone(),
                        kind: child.edge.read.kind.clone(),
                        interval: child.edge.read.interval.clone(),
                        payload: Vec::new(),
                    },
                );
                continue;
            }

            Self::walk(path, commands, action_cmds, actions, &child.children)?;
        }

        Ok(())
    }
}

/// Resolve a payload template into envelope bytes. Every template param must
/// be a string; `{{name}}` params are replaced by the matching value from
/// `data`, other strings pass through as-is.
fn fill_payload(template: &str, data: &Map<String, Value>) -> Result<Vec<u8>, ModelError> {
    let mut envelope: jsonrpc::Request = serde_json::from_str(template)?;

    for (key, value) in envelope.params.iter_mut() {
        let Value::String(s) = value else {
            return Err(ModelError::ParamNotString(key.clone()));
        };

        if let Some(name) = s.strip_prefix("{{").and_then(|r| r.strip_suffix("}}")) {
            let resolved = data
                .get(name)
                .ok_or_else(|| ModelError::PlaceholderNotFound(name.to_string()))?;
            *value = resolved.clone();
        }
    }

    Ok(serde_json::to_vec(&envelope).expect("json value always serializes"))
}
