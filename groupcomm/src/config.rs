use crate::errors::{GroupCommError, Result};
use crate::id::TaskId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Default deadline for blocking receives.
pub const DEFAULT_TIMEOUT_MS: u64 = 50_000;

/// Default number of name-service lookup attempts per peer during
/// initialization.
pub const DEFAULT_RETRY_COUNT: u32 = 10;

/// Fixed delay between name-service lookup attempts.
pub const NAME_RESOLUTION_BACKOFF: Duration = Duration::from_millis(500);

/// The collective an operator instance implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorKind {
    Broadcast,
    Reduce,
    Scatter,
    Gather,
    AllGather,
}

/// Driver-provided configuration for one operator instance on one task.
///
/// The driver computes the operator's tree and serializes one of these per
/// operator per task. `root_task_id` is this task's upstream node (the tree
/// root for two-level topologies, the parent for deeper ones); a task whose
/// `root_task_id` equals its own id is the root of the tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorConfig {
    pub group_name: String,
    pub operator_name: String,
    pub kind: OperatorKind,
    pub self_task_id: TaskId,
    pub driver_id: TaskId,
    pub root_task_id: TaskId,
    /// Children of this task in the operator tree. The declared order is
    /// authoritative for scatter chunking and all-gather assembly.
    #[serde(default)]
    pub child_task_ids: Vec<TaskId>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_retry_count() -> u32 {
    DEFAULT_RETRY_COUNT
}

impl OperatorConfig {
    /// Parse a driver-serialized operator configuration
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize for the driver→task control channel
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// True iff this task is the root of the operator tree
    pub fn is_root(&self) -> bool {
        self.root_task_id == self.self_task_id
    }

    /// The upstream peer, absent on the root
    pub fn parent_id(&self) -> Option<&TaskId> {
        if self.is_root() {
            None
        } else {
            Some(&self.root_task_id)
        }
    }

    /// Receive deadline as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// All operators of one communication group bound for a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    pub group_name: String,
    pub operators: Vec<OperatorConfig>,
}

impl GroupConfig {
    /// Parse a driver-serialized group configuration
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize for the driver→task control channel
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Check internal consistency: every operator carries this group's name
    /// and operator names are unique within the group
    pub fn validate(&self) -> Result<()> {
        let mut names: HashSet<&str> = HashSet::new();
        for operator in &self.operators {
            if operator.group_name != self.group_name {
                return Err(GroupCommError::InvalidArgument(format!(
                    "operator '{}' names group '{}' but belongs to group '{}'",
                    operator.operator_name, operator.group_name, self.group_name
                )));
            }
            if !names.insert(&operator.operator_name) {
                return Err(GroupCommError::InvalidArgument(format!(
                    "operator '{}' appears more than once in group '{}'",
                    operator.operator_name, self.group_name
                )));
            }
        }
        Ok(())
    }
}

/// Task-wide configuration: every group the driver bound for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupCommConfig {
    pub task_id: TaskId,
    pub groups: Vec<GroupConfig>,
}

impl GroupCommConfig {
    /// Parse a driver-serialized task configuration
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize for the driver→task control channel
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Check internal consistency: group names are unique, every group is
    /// itself consistent, and every operator is configured for this task
    pub fn validate(&self) -> Result<()> {
        let mut names: HashSet<&str> = HashSet::new();
        for group in &self.groups {
            if !names.insert(&group.group_name) {
                return Err(GroupCommError::InvalidArgument(format!(
                    "group '{}' appears more than once",
                    group.group_name
                )));
            }
            group.validate()?;
            for operator in &group.operators {
                if operator.self_task_id != self.task_id {
                    return Err(GroupCommError::InvalidArgument(format!(
                        "operator '{}' in group '{}' is configured for task {}, not {}",
                        operator.operator_name,
                        group.group_name,
                        operator.self_task_id,
                        self.task_id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Flat view over every operator of every group
    pub fn iter_operators(&self) -> impl Iterator<Item = &OperatorConfig> {
        self.groups.iter().flat_map(|group| group.operators.iter())
    }
}
