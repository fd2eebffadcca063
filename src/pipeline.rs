//! Middleware pipeline: named before/after action chains wrapping a single
//! operation, with parent-linked inheritance and per-invocation context.
//!
//! Grounded on `ihashmap.cache.Pipeline`/`PipelineManager`/`PipelineContext`
//! (`examples/original_source`). The Python source reaches each pipeline
//! dynamically via subclass-aware `__call__` dispatch and stores ad-hoc
//! attributes on the context; this translation keeps the shape (ordered
//! before/after actions, stable-sorted by priority, namespace-filtered,
//! parent-chain inheritance) but makes it explicit: `Action` wraps a boxed
//! closure, and `Context`'s scratch map is a type-erased `serde_json::Value`
//! map keyed by a stable string, per spec.md's design notes.

use crate::error::CacheResult;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-invocation mutable record shared between `before` and `after` actions
/// and the wrapped call.
pub struct Context {
    pub namespace: String,
    /// Positional arguments the wrapped operation was called with (e.g. the
    /// entity being set, or the key being fetched).
    pub args: Vec<Value>,
    /// Slot the wrapped function writes its outcome into.
    pub result: Option<Value>,
    scratch: HashMap<String, Value>,
}

impl Context {
    pub fn new(namespace: impl Into<String>, args: Vec<Value>) -> Self {
        Self { namespace: namespace.into(), args, result: None, scratch: HashMap::new() }
    }

    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    pub fn scratch_get(&self, key: &str) -> Option<&Value> {
        self.scratch.get(key)
    }

    pub fn scratch_set(&mut self, key: impl Into<String>, value: Value) {
        self.scratch.insert(key.into(), value);
    }

    pub fn scratch_take(&mut self, key: &str) -> Option<Value> {
        self.scratch.remove(key)
    }
}

type ActionFn = Arc<dyn Fn(&mut Context) -> CacheResult<()> + Send + Sync>;

/// A callable, a priority, and an optional namespace filter.
#[derive(Clone)]
pub struct Action {
    pub priority: i32,
    pub namespace: Option<String>,
    f: ActionFn,
}

impl Action {
    pub fn new(
        priority: i32,
        namespace: Option<String>,
        f: impl Fn(&mut Context) -> CacheResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self { priority, namespace, f: Arc::new(f) }
    }

    pub fn applies_to(&self, namespace: &str) -> bool {
        match &self.namespace {
            None => true,
            Some(ns) => ns == namespace,
        }
    }

    pub fn call(&self, ctx: &mut Context) -> CacheResult<()> {
        (self.f)(ctx)
    }
}

/// A named ordered pair of before/after action lists, optionally inheriting
/// from a parent pipeline.
pub struct Pipeline {
    pub name: String,
    parent: Option<Arc<Mutex<Pipeline>>>,
    before: Vec<Action>,
    after: Vec<Action>,
}

impl Pipeline {
    fn new(name: impl Into<String>, parent: Option<Arc<Mutex<Pipeline>>>) -> Self {
        Self { name: name.into(), parent, before: Vec::new(), after: Vec::new() }
    }

    /// Parent's effective `before` ++ own `before`, stable-sorted by priority.
    fn effective_before(&self) -> Vec<Action> {
        let mut actions = match &self.parent {
            Some(p) => p.lock().effective_before(),
            None => Vec::new(),
        };
        actions.extend(self.before.iter().cloned());
        actions.sort_by_key(|a| a.priority);
        actions
    }

    fn effective_after(&self) -> Vec<Action> {
        let mut actions = match &self.parent {
            Some(p) => p.lock().effective_after(),
            None => Vec::new(),
        };
        actions.extend(self.after.iter().cloned());
        actions.sort_by_key(|a| a.priority);
        actions
    }
}

/// Holds pipelines by name; a child manager clones the parent's pipelines as
/// new parent-linked pipelines so extension never mutates the parent.
pub struct PipelineManager {
    pipelines: Mutex<HashMap<String, Arc<Mutex<Pipeline>>>>,
}

impl Default for PipelineManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineManager {
    pub fn new() -> Self {
        Self { pipelines: Mutex::new(HashMap::new()) }
    }

    /// Builds a child manager whose pipelines are parent-linked clones of
    /// `parent`'s — extending the child never mutates `parent`.
    pub fn with_parent(parent: &PipelineManager) -> Self {
        let mut pipelines = HashMap::new();
        for (name, pipe) in parent.pipelines.lock().iter() {
            pipelines.insert(name.clone(), Arc::new(Mutex::new(Pipeline::new(name.clone(), Some(pipe.clone())))));
        }
        Self { pipelines: Mutex::new(pipelines) }
    }

    fn get_or_create(&self, name: &str) -> Arc<Mutex<Pipeline>> {
        self.pipelines
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Pipeline::new(name.to_string(), None))))
            .clone()
    }

    pub fn add_before(&self, pipeline: &str, action: Action) {
        self.get_or_create(pipeline).lock().before.push(action);
    }

    pub fn add_after(&self, pipeline: &str, action: Action) {
        self.get_or_create(pipeline).lock().after.push(action);
    }

    /// Runs `before` actions matching `ctx.namespace` to completion, then `f`
    /// (which must populate `ctx.result`), then matching `after` actions. An
    /// error in any phase aborts the remaining actions of that phase and
    /// propagates, per the pipeline's documented propagation policy.
    pub fn run<F>(&self, pipeline: &str, ctx: &mut Context, f: F) -> CacheResult<()>
    where
        F: FnOnce(&mut Context) -> CacheResult<()>,
    {
        let pipe = self.get_or_create(pipeline);
        let (before, after) = {
            let p = pipe.lock();
            (p.effective_before(), p.effective_after())
        };
        for action in &before {
            if action.applies_to(&ctx.namespace) {
                action.call(ctx)?;
            }
        }
        f(ctx)?;
        for action in &after {
            if action.applies_to(&ctx.namespace) {
                action.call(ctx)?;
            }
        }
        Ok(())
    }
}
