//! Hook pipelines.
//!
//! Every CRUD action runs an ordered list of named steps. The default steps
//! are registered under `ormlink:`-prefixed names; any of them can be
//! replaced or removed, and user steps can be placed before or after them.
//!
//! A step returns [`Flow::Stop`] to skip the rest of its own pipeline. An
//! error aborts the pipeline; a transaction opened by
//! `ormlink:begin_transaction` is committed when the pipeline finishes and
//! rolled back when it fails.

pub(crate) mod common;
mod create;
mod delete;
mod query;
mod update;

use ormlink_core::{ConfigErrorKind, Error, Result};
use std::fmt;
use std::sync::Arc;

use crate::scope::Scope;

pub use common::{BEGIN_TRANSACTION, now};

/// CRUD action a pipeline belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Create,
    Query,
    Update,
    Delete,
}

impl Action {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Query => "query",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// What the pipeline does after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Skip the remaining steps of this pipeline.
    Stop,
}

/// A pipeline step.
pub type Step = Arc<dyn Fn(&mut Scope<'_>) -> Result<Flow> + Send + Sync>;

/// Ordered, named steps for one action.
#[derive(Clone, Default)]
pub struct Pipeline {
    steps: Vec<(String, Step)>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

fn unknown_step(name: &str) -> Error {
    Error::config(
        ConfigErrorKind::UnknownName,
        format!("no pipeline step named '{name}'"),
    )
}

impl Pipeline {
    /// Step names in execution order.
    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|(n, _)| n.as_str()).collect()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|(n, _)| n == name)
    }

    fn check_new(&self, name: &str) -> Result<()> {
        if self.position(name).is_some() {
            return Err(Error::config(
                ConfigErrorKind::UnknownName,
                format!("pipeline step '{name}' is already registered"),
            ));
        }
        Ok(())
    }

    /// Append a step.
    #[allow(clippy::result_large_err)]
    pub fn register<F>(&mut self, name: impl Into<String>, step: F) -> Result<&mut Self>
    where
        F: Fn(&mut Scope<'_>) -> Result<Flow> + Send + Sync + 'static,
    {
        let name = name.into();
        self.check_new(&name)?;
        self.steps.push((name, Arc::new(step)));
        Ok(self)
    }

    /// Insert a step right before `anchor`.
    #[allow(clippy::result_large_err)]
    pub fn before<F>(&mut self, anchor: &str, name: impl Into<String>, step: F) -> Result<&mut Self>
    where
        F: Fn(&mut Scope<'_>) -> Result<Flow> + Send + Sync + 'static,
    {
        let name = name.into();
        self.check_new(&name)?;
        let at = self.position(anchor).ok_or_else(|| unknown_step(anchor))?;
        self.steps.insert(at, (name, Arc::new(step)));
        Ok(self)
    }

    /// Insert a step right after `anchor`.
    #[allow(clippy::result_large_err)]
    pub fn after<F>(&mut self, anchor: &str, name: impl Into<String>, step: F) -> Result<&mut Self>
    where
        F: Fn(&mut Scope<'_>) -> Result<Flow> + Send + Sync + 'static,
    {
        let name = name.into();
        self.check_new(&name)?;
        let at = self.position(anchor).ok_or_else(|| unknown_step(anchor))?;
        self.steps.insert(at + 1, (name, Arc::new(step)));
        Ok(self)
    }

    /// Swap the implementation of an existing step, keeping its position.
    #[allow(clippy::result_large_err)]
    pub fn replace<F>(&mut self, name: &str, step: F) -> Result<&mut Self>
    where
        F: Fn(&mut Scope<'_>) -> Result<Flow> + Send + Sync + 'static,
    {
        let at = self.position(name).ok_or_else(|| unknown_step(name))?;
        self.steps[at].1 = Arc::new(step);
        Ok(self)
    }

    #[allow(clippy::result_large_err)]
    pub fn remove(&mut self, name: &str) -> Result<&mut Self> {
        let at = self.position(name).ok_or_else(|| unknown_step(name))?;
        self.steps.remove(at);
        Ok(self)
    }

    /// Run every step in order, settling any transaction a step opened.
    #[allow(clippy::result_large_err)]
    pub(crate) fn run(&self, action: Action, scope: &mut Scope<'_>) -> Result<()> {
        let span = tracing::debug_span!("pipeline", action = action.as_str(), table = %scope.table());
        let _enter = span.enter();

        let result = self.run_steps(scope);
        let result = common::settle_transaction(scope, result);
        result.map_err(|err| err.with_context(action.as_str(), scope.table().to_string()))
    }

    #[allow(clippy::result_large_err)]
    fn run_steps(&self, scope: &mut Scope<'_>) -> Result<()> {
        for (name, step) in &self.steps {
            tracing::trace!(step = %name, "running step");
            match step(scope) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => {
                    tracing::warn!(step = %name, "pipeline stopped early");
                    break;
                }
                Err(err) => {
                    tracing::debug!(step = %name, error = %err, "pipeline step failed");
                    return Err(err);
                }
            }
        }
        Ok(())
    }
}

/// The four pipelines of a handle.
#[derive(Debug, Clone)]
pub struct Callbacks {
    create: Pipeline,
    query: Pipeline,
    update: Pipeline,
    delete: Pipeline,
}

impl Default for Callbacks {
    fn default() -> Self {
        Self {
            create: create::pipeline(),
            query: query::pipeline(),
            update: update::pipeline(),
            delete: delete::pipeline(),
        }
    }
}

impl Callbacks {
    /// Pipelines with no steps at all.
    pub fn empty() -> Self {
        Self {
            create: Pipeline::default(),
            query: Pipeline::default(),
            update: Pipeline::default(),
            delete: Pipeline::default(),
        }
    }

    pub fn pipeline(&self, action: Action) -> &Pipeline {
        match action {
            Action::Create => &self.create,
            Action::Query => &self.query,
            Action::Update => &self.update,
            Action::Delete => &self.delete,
        }
    }

    pub fn pipeline_mut(&mut self, action: Action) -> &mut Pipeline {
        match action {
            Action::Create => &mut self.create,
            Action::Query => &mut self.query,
            Action::Update => &mut self.update,
            Action::Delete => &mut self.delete,
        }
    }

    pub fn create(&mut self) -> &mut Pipeline {
        &mut self.create
    }

    pub fn query(&mut self) -> &mut Pipeline {
        &mut self.query
    }

    pub fn update(&mut self) -> &mut Pipeline {
        &mut self.update
    }

    pub fn delete(&mut self) -> &mut Pipeline {
        &mut self.delete
    }
}

/// Build a step from a closure; shorthand for registering defaults.
fn step<F>(name: &str, f: F) -> (String, Step)
where
    F: Fn(&mut Scope<'_>) -> Result<Flow> + Send + Sync + 'static,
{
    (format!("ormlink:{name}"), Arc::new(f))
}

impl FromIterator<(String, Step)> for Pipeline {
    fn from_iter<I: IntoIterator<Item = (String, Step)>>(iter: I) -> Self {
        Self {
            steps: iter.into_iter().collect(),
        }
    }
}
