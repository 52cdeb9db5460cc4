//! Ordered before/after hook lists for a job.
//!
//! A hook is a named action plus an argument source. Fixed arguments are
//! captured at registration; deferred arguments are produced by a closure
//! when the hook runs, so values changed after registration are picked up.
//! After-hooks additionally receive the job's `error_case` flag through
//! [`HookContext::error_case`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use tracing::{debug, error, info};

use crate::error::{BackupError, Result};
use crate::types::Phase;

pub type HookArgs = BTreeMap<String, String>;

pub type HookFn = Box<dyn FnMut(&HookContext) -> Result<()>>;

pub enum ArgSource {
    Fixed(HookArgs),
    Deferred(Box<dyn Fn() -> HookArgs>),
}

impl ArgSource {
    pub fn fixed<K: Into<String>, V: Into<String>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        ArgSource::Fixed(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    pub fn deferred(source: impl Fn() -> HookArgs + 'static) -> Self {
        ArgSource::Deferred(Box::new(source))
    }

    fn resolve(&self) -> HookArgs {
        match self {
            ArgSource::Fixed(args) => args.clone(),
            ArgSource::Deferred(source) => source(),
        }
    }
}

impl Default for ArgSource {
    fn default() -> Self {
        ArgSource::Fixed(HookArgs::new())
    }
}

impl fmt::Debug for ArgSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgSource::Fixed(args) => f.debug_tuple("Fixed").field(args).finish(),
            ArgSource::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HookContext {
    pub args: HookArgs,
    pub error_case: bool,
}

impl HookContext {
    pub fn arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).map(String::as_str)
    }

    pub fn require(&self, key: &str) -> Result<&str> {
        self.arg(key)
            .ok_or_else(|| BackupError::message(format!("hook argument {} is missing", key)))
    }

    pub fn parse<T>(&self, key: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let raw = self.require(key)?;
        raw.parse::<T>()
            .map_err(|e| BackupError::message(format!("hook argument {}={}: {}", key, raw, e)))
    }
}

pub struct Hook {
    name: String,
    action: HookFn,
    args: ArgSource,
}

impl Hook {
    pub fn new(name: impl Into<String>, action: impl FnMut(&HookContext) -> Result<()> + 'static) -> Self {
        Self {
            name: name.into(),
            action: Box::new(action),
            args: ArgSource::default(),
        }
    }

    pub fn with_args(mut self, args: ArgSource) -> Self {
        self.args = args;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&mut self, error_case: bool) -> Result<()> {
        let ctx = HookContext {
            args: self.args.resolve(),
            error_case,
        };
        (self.action)(&ctx).map_err(|source| BackupError::HookFailed {
            hook: self.name.clone(),
            source: Box::new(source),
        })
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("name", &self.name)
            .field("args", &self.args)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct HookPipeline {
    before: Vec<Hook>,
    after: Vec<Hook>,
}

impl HookPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    fn list_mut(&mut self, phase: Phase) -> &mut Vec<Hook> {
        match phase {
            Phase::Before => &mut self.before,
            Phase::After => &mut self.after,
        }
    }

    fn list(&self, phase: Phase) -> &[Hook] {
        match phase {
            Phase::Before => &self.before,
            Phase::After => &self.after,
        }
    }

    pub fn add(&mut self, phase: Phase, hook: Hook) {
        self.list_mut(phase).push(hook);
    }

    /// Inserts so that the hook ends up at `index`; indexes past the end
    /// append.
    pub fn insert(&mut self, phase: Phase, index: usize, hook: Hook) {
        let list = self.list_mut(phase);
        let index = index.min(list.len());
        list.insert(index, hook);
    }

    pub fn delete(&mut self, phase: Phase, index: usize) -> Result<Hook> {
        let list = self.list_mut(phase);
        if index >= list.len() {
            return Err(BackupError::HookIndex {
                phase: phase.as_str(),
                index,
                len: list.len(),
            });
        }
        Ok(list.remove(index))
    }

    pub fn add_before(&mut self, hook: Hook) {
        self.add(Phase::Before, hook);
    }

    pub fn add_after(&mut self, hook: Hook) {
        self.add(Phase::After, hook);
    }

    pub fn insert_before(&mut self, index: usize, hook: Hook) {
        self.insert(Phase::Before, index, hook);
    }

    pub fn insert_after(&mut self, index: usize, hook: Hook) {
        self.insert(Phase::After, index, hook);
    }

    pub fn delete_before(&mut self, index: usize) -> Result<Hook> {
        self.delete(Phase::Before, index)
    }

    pub fn delete_after(&mut self, index: usize) -> Result<Hook> {
        self.delete(Phase::After, index)
    }

    pub fn names(&self, phase: Phase) -> Vec<&str> {
        self.list(phase).iter().map(Hook::name).collect()
    }

    /// Runs before-hooks in order and stops at the first failure.
    pub fn run_before(&mut self) -> Result<()> {
        info!("processing pre-job hooks...");
        for hook in &mut self.before {
            debug!("pre-job hook {}", hook.name);
            hook.invoke(false)?;
        }
        Ok(())
    }

    /// Runs every after-hook, even when earlier ones fail, and reports all
    /// failures together.
    pub fn run_after(&mut self, error_case: bool) -> Result<()> {
        if error_case {
            error!("processing post-job hooks for error case...");
        } else {
            info!("processing post-job hooks...");
        }
        let mut failures = Vec::new();
        for hook in &mut self.after {
            debug!("post-job hook {}", hook.name);
            if let Err(err) = hook.invoke(error_case) {
                error!("{}", err);
                failures.push(err);
            }
        }
        BackupError::collect(failures)
    }
}
