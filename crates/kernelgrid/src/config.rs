//! Runtime configuration
//!
//! A [`RuntimeConfig`] can be assembled from defaults, a TOML document or
//! `KERNELGRID_*` environment variables. For example:
//!
//! ```toml
//! executor = "parallel"
//! max_work_group_size = 512
//! max_concurrent_groups = 4
//! ```

use crate::error::Error;
use crate::executor::{Executor, ExecutorKind, ParallelExecutor, SerialExecutor};
use serde::Deserialize;

const ENV_EXECUTOR: &str = "KERNELGRID_EXECUTOR";
const ENV_MAX_WORK_GROUP_SIZE: &str = "KERNELGRID_MAX_WORK_GROUP_SIZE";
const ENV_DEFAULT_LOCAL_SIZE: &str = "KERNELGRID_DEFAULT_LOCAL_SIZE";
const ENV_MAX_CONCURRENT_GROUPS: &str = "KERNELGRID_MAX_CONCURRENT_GROUPS";

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// which backend drives the work-groups
    pub executor: ExecutorKind,
    /// the largest allowed number of work-items per group
    pub max_work_group_size: usize,
    /// upper bound on the local size that the runtime picks when a grid
    /// doesn't specify one
    pub default_local_size: usize,
    /// number of groups that the parallel executor may run at once. `None`
    /// uses rayon's global pool.
    pub max_concurrent_groups: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            executor: ExecutorKind::Serial,
            max_work_group_size: 1024,
            default_local_size: 256,
            max_concurrent_groups: None,
        }
    }
}

fn parse_positive(var: &str, value: &str) -> Result<usize, Error> {
    match value.trim().parse::<usize>() {
        Ok(0) | Err(_) => Err(Error::config(format!(
            "{var} must be a positive integer (got \"{value}\")"
        ))),
        Ok(parsed) => Ok(parsed),
    }
}

impl RuntimeConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, Error> {
        let config: RuntimeConfig =
            toml::from_str(text).map_err(|e| Error::config(e.message().to_owned()))?;
        config.validate()?;
        Ok(config)
    }

    /// The defaults, overridden by any `KERNELGRID_*` environment variables
    pub fn from_env() -> Result<Self, Error> {
        Self::default().overlay_env(|var| std::env::var(var).ok())
    }

    /// Override fields with the values that `lookup` returns for the
    /// `KERNELGRID_*` variables.
    ///
    /// This is what [`RuntimeConfig::from_env`] uses; tests can supply their
    /// own lookup instead of touching the process environment.
    pub fn overlay_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        if let Some(value) = lookup(ENV_EXECUTOR) {
            self.executor = value.parse()?;
        }
        if let Some(value) = lookup(ENV_MAX_WORK_GROUP_SIZE) {
            self.max_work_group_size = parse_positive(ENV_MAX_WORK_GROUP_SIZE, &value)?;
        }
        if let Some(value) = lookup(ENV_DEFAULT_LOCAL_SIZE) {
            self.default_local_size = parse_positive(ENV_DEFAULT_LOCAL_SIZE, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_CONCURRENT_GROUPS) {
            self.max_concurrent_groups =
                Some(parse_positive(ENV_MAX_CONCURRENT_GROUPS, &value)?);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.max_work_group_size == 0 {
            Err(Error::config("max_work_group_size must be positive"))
        } else if self.default_local_size == 0 {
            Err(Error::config("default_local_size must be positive"))
        } else if self.max_concurrent_groups == Some(0) {
            Err(Error::config("max_concurrent_groups must be positive"))
        } else {
            Ok(())
        }
    }

    /// the local size budget used when a grid leaves its local size unset
    pub(crate) fn local_size_budget(&self) -> usize {
        self.default_local_size.min(self.max_work_group_size)
    }

    pub(crate) fn build_executor(&self) -> Result<Box<dyn Executor>, Error> {
        self.validate()?;
        Ok(match self.executor {
            ExecutorKind::Serial => Box::new(SerialExecutor),
            ExecutorKind::Parallel => Box::new(ParallelExecutor::new(self.max_concurrent_groups)?),
        })
    }
}
