//! Task parameters handed from the workflow interpreter to executors.
//!
//! [`TaskParams`] is an immutable snapshot taken when a task is created.
//! [`TaskPayload`] is what the params section of a record actually holds:
//! either one task or a master task batching several.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::MasterTaskParams;

/// Key the interpreter's globals use for the builtin namespace; never
/// persisted.
pub const BUILTINS_KEY: &str = "__builtins__";

/// Resource requirements and execution identity of a task.
///
/// All fields are optional; an unset value means "scheduler default".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Runtime {
    /// Expected run time (`"1h"`, `"01:00:00"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub walltime: Option<String>,
    /// Upper bound accepted by the queue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_walltime: Option<String>,
    /// Cores requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cores: Option<u32>,
    /// Upper bound accepted by the queue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cores: Option<u32>,
    /// Memory requested (`"4G"`, or bytes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem: Option<String>,
    /// Upper bound accepted by the queue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_mem: Option<String>,
    /// Job name shown by the scheduler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Working directory of the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cur_dir: Option<PathBuf>,
    /// Home directory on the executing host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbosity: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_mode: Option<String>,
    /// Host path translations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_vars: Option<Value>,
}

/// Runtime keys that must agree across the members of a master task.
pub const IDENTITY_KEYS: [&str; 9] = [
    "walltime",
    "max_walltime",
    "cores",
    "max_cores",
    "mem",
    "max_mem",
    "name",
    "cur_dir",
    "home_dir",
];

impl Runtime {
    /// Textual value of one of the [`IDENTITY_KEYS`], for comparison and
    /// error messages. Unknown keys yield `None`.
    pub fn identity_value(&self, key: &str) -> Option<String> {
        match key {
            "walltime" => self.walltime.clone(),
            "max_walltime" => self.max_walltime.clone(),
            "cores" => self.cores.map(|c| c.to_string()),
            "max_cores" => self.max_cores.map(|c| c.to_string()),
            "mem" => self.mem.clone(),
            "max_mem" => self.max_mem.clone(),
            "name" => self.name.clone(),
            "cur_dir" => self.cur_dir.as_ref().map(|p| p.display().to_string()),
            "home_dir" => self.home_dir.as_ref().map(|p| p.display().to_string()),
            _ => None,
        }
    }
}

/// The environment a task body is evaluated in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskEnv {
    /// Resource requirements.
    #[serde(default)]
    pub runtime: Runtime,
    /// Step input files.
    #[serde(default)]
    pub input: Vec<String>,
    /// Step output files.
    #[serde(default)]
    pub output: Vec<String>,
    /// Extra dependency files.
    #[serde(default)]
    pub depends: Vec<String>,
    /// Name of the workflow step that produced the task.
    #[serde(default)]
    pub step_name: String,
    /// Index of the task within its step.
    #[serde(default)]
    pub index: usize,
    /// Interpreter configuration.
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Other variables exported to the task.
    #[serde(default)]
    pub vars: Map<String, Value>,
}

/// Parameters of one task.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use taskwatch::{TaskEnv, TaskParams};
///
/// let mut env = TaskEnv::default();
/// env.config.insert("__builtins__".into(), json!({"print": "<fn>"}));
/// env.config.insert("sig_mode".into(), json!("default"));
///
/// let params = TaskParams::new("align", "", "bwa mem ref.fa r1.fq", env, vec!["sample1".into()]);
/// assert!(!params.env.config.contains_key("__builtins__"));
/// assert!(params.env.config.contains_key("sig_mode"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskParams {
    /// Display name.
    pub name: String,
    /// Global definitions prepended to the task body.
    pub global_def: String,
    /// Task body.
    pub task: String,
    /// Evaluation environment.
    pub env: TaskEnv,
    /// Tags. Stored in the record header, not in the params section.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl TaskParams {
    /// Creates parameters, dropping any builtin namespace captured in the
    /// environment.
    pub fn new(
        name: impl Into<String>,
        global_def: impl Into<String>,
        task: impl Into<String>,
        mut env: TaskEnv,
        tags: Vec<String>,
    ) -> Self {
        strip_builtins(&mut env);
        Self {
            name: name.into(),
            global_def: global_def.into(),
            task: task.into(),
            env,
            tags,
        }
    }
}

pub(crate) fn strip_builtins(env: &mut TaskEnv) {
    env.config.shift_remove(BUILTINS_KEY);
    env.vars.shift_remove(BUILTINS_KEY);
}

/// Content of a record's params section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskPayload {
    /// A single task.
    Single(TaskParams),
    /// A batch of tasks run by one submission.
    Master(MasterTaskParams),
}

impl TaskPayload {
    /// The parameters describing the submission as a whole.
    pub fn params(&self) -> &TaskParams {
        match self {
            Self::Single(params) => params,
            Self::Master(master) => master.params(),
        }
    }

    /// Tags of the submission.
    pub fn tags(&self) -> &[String] {
        &self.params().tags
    }

    pub(crate) fn take_tags(&mut self) -> Vec<String> {
        match self {
            Self::Single(params) => std::mem::take(&mut params.tags),
            Self::Master(master) => master.take_tags(),
        }
    }

    pub(crate) fn set_tags(&mut self, tags: Vec<String>) {
        match self {
            Self::Single(params) => params.tags = tags,
            Self::Master(master) => master.set_tags(tags),
        }
    }
}

impl From<TaskParams> for TaskPayload {
    fn from(params: TaskParams) -> Self {
        Self::Single(params)
    }
}

impl From<MasterTaskParams> for TaskPayload {
    fn from(master: MasterTaskParams) -> Self {
        Self::Master(master)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtins_are_stripped_from_vars_too() {
        let mut env = TaskEnv::default();
        env.vars.insert(BUILTINS_KEY.into(), json!(1));
        env.vars.insert("x".into(), json!(2));
        let params = TaskParams::new("t", "", "", env, vec![]);
        assert_eq!(params.env.vars.len(), 1);
    }

    #[test]
    fn identity_values_render_paths_and_numbers() {
        let runtime = Runtime {
            cores: Some(4),
            cur_dir: Some(PathBuf::from("/work")),
            ..Runtime::default()
        };
        assert_eq!(runtime.identity_value("cores").as_deref(), Some("4"));
        assert_eq!(runtime.identity_value("cur_dir").as_deref(), Some("/work"));
        assert_eq!(runtime.identity_value("mem"), None);
        assert_eq!(runtime.identity_value("bogus"), None);
    }

    #[test]
    fn payload_tags_round_trip() {
        let mut payload = TaskPayload::from(TaskParams {
            tags: vec!["a".into()],
            ..TaskParams::default()
        });
        assert_eq!(payload.take_tags(), vec!["a".to_string()]);
        assert!(payload.tags().is_empty());
        payload.set_tags(vec!["b".into()]);
        assert_eq!(payload.tags(), ["b".to_string()]);
    }
}
