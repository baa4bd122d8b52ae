//! Master tasks: several sibling tasks submitted as one scheduler job.
//!
//! Members are laid out on a grid of `num_workers` columns; the master's
//! resource request is sized for one row of members running side by side,
//! repeated for as many rows as the batch needs.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::constants::MASTER_MEM_OVERHEAD;
use crate::error::{Result, TaskError};
use crate::quantity::{expand_size, expand_time, format_hhmmss, TimeUnit};
use crate::types::{Runtime, TaskParams, IDENTITY_KEYS};

/// A batch of tasks run by a single submission.
///
/// # Examples
///
/// ```
/// use taskwatch::{MasterTaskParams, Runtime, TaskEnv, TaskParams};
///
/// let member = |cores| TaskParams {
///     env: TaskEnv {
///         runtime: Runtime { cores: Some(cores), walltime: Some("1h".into()), ..Runtime::default() },
///         ..TaskEnv::default()
///     },
///     ..TaskParams::default()
/// };
///
/// let mut master = MasterTaskParams::new(2);
/// for i in 0..5 {
///     master.push(format!("t{i}"), member(2)).unwrap();
/// }
/// assert_eq!(master.id(), "M5_t0");
/// assert_eq!(master.params().env.runtime.cores, Some(5));
/// assert_eq!(master.params().env.runtime.walltime.as_deref(), Some("03:00:00"));
///
/// // Siblings must agree on their resources.
/// assert!(master.push("t5", member(4)).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterTaskParams {
    id: String,
    num_workers: usize,
    params: TaskParams,
    task_stack: Vec<(String, TaskParams)>,
}

impl MasterTaskParams {
    /// An empty batch laid out over `num_workers` columns.
    pub fn new(num_workers: usize) -> Self {
        let id = "M_0".to_string();
        Self {
            params: TaskParams {
                name: id.clone(),
                ..TaskParams::default()
            },
            id,
            num_workers,
            task_stack: Vec::new(),
        }
    }

    /// Batch identifier, `M{batch size}_{first member id}`.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Number of columns of the layout grid.
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Number of members pushed so far.
    pub fn num_tasks(&self) -> usize {
        self.task_stack.len()
    }

    /// Members in push order.
    pub fn task_stack(&self) -> &[(String, TaskParams)] {
        &self.task_stack
    }

    /// Merged parameters of the whole batch.
    pub fn params(&self) -> &TaskParams {
        &self.params
    }

    /// Appends a member.
    ///
    /// # Errors
    ///
    /// [`TaskError::ResourceMismatch`] if any identity key of `params`
    /// differs from the first member's (a value defined on one side only
    /// counts as a difference). The batch is left unchanged.
    /// [`TaskError::InvalidQuantity`] if the first member's walltime or mem
    /// cannot be parsed.
    pub fn push(&mut self, task_id: impl Into<String>, params: TaskParams) -> Result<()> {
        let task_id = task_id.into();
        match self.task_stack.first() {
            None => {
                inherit_runtime(&mut self.params.env.runtime, &params.env.runtime);
                self.params.env.step_name = params.env.step_name.clone();
                self.params.tags = params.tags.clone();
            },
            Some((_, first)) => {
                let merged = self.merged_runtime(&first.env.runtime, &params.env.runtime)?;
                self.params.env.runtime = merged;
                self.params.tags.extend(params.tags.iter().cloned());
            },
        }

        union_into(&mut self.params.env.input, &params.env.input);
        union_into(&mut self.params.env.output, &params.env.output);
        union_into(&mut self.params.env.depends, &params.env.depends);

        self.task_stack.push((task_id, params));
        self.params.tags.sort();
        self.params.tags.dedup();

        self.id = format!("M{}_{}", self.task_stack.len(), self.task_stack[0].0);
        self.params.name = self.id.clone();
        tracing::debug!(
            "Pushed task {} into master {}",
            self.task_stack[self.task_stack.len() - 1].0,
            self.id
        );
        Ok(())
    }

    /// Layout of the batch once one more member is added: `(rows, cols)`.
    fn grid(&self) -> (u64, u64) {
        let n = self.task_stack.len() as u64 + 1;
        let workers = self.num_workers as u64;
        let rows = if workers > 1 { n.div_ceil(workers) } else { 1 };
        let cols = if rows > 1 { workers } else { n };
        (rows, cols)
    }

    fn merged_runtime(&self, first: &Runtime, incoming: &Runtime) -> Result<Runtime> {
        for key in IDENTITY_KEYS {
            let expected = first.identity_value(key);
            let actual = incoming.identity_value(key);
            if expected != actual {
                return Err(TaskError::ResourceMismatch {
                    key,
                    expected,
                    actual,
                });
            }
        }

        let (rows, cols) = self.grid();
        let has_workers = self.num_workers > 0;
        let mut merged = self.params.env.runtime.clone();
        if let Some(walltime) = &first.walltime {
            let seconds = expand_time(walltime, TimeUnit::Seconds)?;
            merged.walltime = Some(format_hhmmss((rows as f64 * seconds).round() as u64));
        }
        if let Some(mem) = &first.mem {
            let overhead = if has_workers { MASTER_MEM_OVERHEAD } else { 0 };
            merged.mem = Some((cols * expand_size(mem)? + overhead).to_string());
        }
        if let Some(cores) = first.cores {
            let extra = u32::from(has_workers);
            merged.cores = Some(cols as u32 * cores + extra);
        }
        if let Some(name) = &first.name {
            merged.name = Some(format!("{name}_{}", self.task_stack.len() + 1));
        }
        Ok(merged)
    }

    pub(crate) fn take_tags(&mut self) -> Vec<String> {
        std::mem::take(&mut self.params.tags)
    }

    pub(crate) fn set_tags(&mut self, tags: Vec<String>) {
        self.params.tags = tags;
    }
}

/// Adopts every runtime value the first member of a batch defines.
fn inherit_runtime(master: &mut Runtime, member: &Runtime) {
    set_if_some(&mut master.walltime, &member.walltime);
    set_if_some(&mut master.max_walltime, &member.max_walltime);
    set_if_some(&mut master.cores, &member.cores);
    set_if_some(&mut master.max_cores, &member.max_cores);
    set_if_some(&mut master.mem, &member.mem);
    set_if_some(&mut master.max_mem, &member.max_mem);
    set_if_some(&mut master.map_vars, &member.map_vars);
    set_if_some(&mut master.name, &member.name);
    set_if_some(&mut master.cur_dir, &member.cur_dir);
    set_if_some(&mut master.home_dir, &member.home_dir);
    set_if_some(&mut master.verbosity, &member.verbosity);
    set_if_some(&mut master.sig_mode, &member.sig_mode);
    set_if_some(&mut master.run_mode, &member.run_mode);
}

fn set_if_some<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
    if value.is_some() {
        target.clone_from(value);
    }
}

fn union_into(target: &mut Vec<String>, extra: &[String]) {
    let mut seen: IndexSet<String> = target.drain(..).collect();
    seen.extend(extra.iter().cloned());
    target.extend(seen);
}
