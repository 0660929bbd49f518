//! Scoped variable storage for one item's run
//!
//! Lookup order for a bare name:
//! 1. loop frames, innermost first
//! 2. the reserved namespaces `loop`, `row` and `parsed`
//! 3. job-level variables created by `set`
//! 4. the item's seed bindings
//!
//! Seed bindings never change. Assigning a seed name creates a job-level
//! variable that shadows it, while `row.<name>` keeps returning the seed.

use super::error::RuntimeError;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Namespace holding the item's seed bindings
pub const ROW_NAMESPACE: &str = "row";

/// Namespace holding fields merged from response parsing
pub const PARSED_NAMESPACE: &str = "parsed";

/// Loop metadata for the innermost frame (`loop.index`, `loop.length`, ...)
pub const LOOP_NAMESPACE: &str = "loop";

/// Names that `set` may not target
pub const RESERVED_NAMES: &[&str] = &[ROW_NAMESPACE, PARSED_NAMESPACE, LOOP_NAMESPACE];

/// One active `for_each`
#[derive(Debug, Clone)]
struct LoopFrame {
    var: String,
    current: Value,
    items: Vec<Value>,
    index: usize,
}

impl LoopFrame {
    fn metadata(&self) -> Value {
        let mut meta = Map::new();
        meta.insert("index".into(), Value::from(self.index));
        meta.insert("length".into(), Value::from(self.items.len()));
        meta.insert("first".into(), Value::Bool(self.index == 0));
        meta.insert("last".into(), Value::Bool(self.index + 1 == self.items.len()));
        Value::Object(meta)
    }
}

/// Execution context owned by exactly one job item
#[derive(Debug, Clone, Default)]
pub struct Environment {
    seed: Map<String, Value>,
    globals: HashMap<String, Value>,
    frames: Vec<LoopFrame>,
    parsed: Map<String, Value>,
}

impl Environment {
    /// Create an environment seeded with an item's input bindings
    pub fn new(seed: Map<String, Value>) -> Self {
        Self {
            seed,
            ..Default::default()
        }
    }

    /// Resolve a bare name
    pub fn get(&self, name: &str) -> Result<Value, RuntimeError> {
        if let Some(frame) = self.frames.iter().rev().find(|f| f.var == name) {
            return Ok(frame.current.clone());
        }

        match name {
            LOOP_NAMESPACE => {
                if let Some(frame) = self.frames.last() {
                    return Ok(frame.metadata());
                }
            }
            ROW_NAMESPACE => return Ok(Value::Object(self.seed.clone())),
            PARSED_NAMESPACE => return Ok(Value::Object(self.parsed.clone())),
            _ => {}
        }

        self.globals
            .get(name)
            .or_else(|| self.seed.get(name))
            .cloned()
            .ok_or_else(|| RuntimeError::UndefinedVariable { name: name.into() })
    }

    /// Assign to the nearest loop variable of that name, else the job scope
    pub fn set(&mut self, name: &str, value: Value) {
        if let Some(frame) = self.frames.iter_mut().rev().find(|f| f.var == name) {
            frame.current = value;
            return;
        }
        self.globals.insert(name.to_string(), value);
    }

    /// Enter a loop; returns false (and pushes nothing) for an empty list
    pub fn push_frame(&mut self, var: &str, items: Vec<Value>) -> bool {
        let Some(first) = items.first().cloned() else {
            return false;
        };
        self.frames.push(LoopFrame {
            var: var.to_string(),
            current: first,
            items,
            index: 0,
        });
        true
    }

    /// Move the innermost loop to its next element
    ///
    /// Returns false once the list is exhausted; the frame is popped then.
    pub fn advance_frame(&mut self) -> bool {
        let Some(frame) = self.frames.last_mut() else {
            return false;
        };

        frame.index += 1;
        match frame.items.get(frame.index) {
            Some(next) => {
                frame.current = next.clone();
                true
            }
            None => {
                self.frames.pop();
                false
            }
        }
    }

    /// Number of active loop frames
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Drop loop frames until `depth` remain (used when `goto` leaves loops)
    pub fn truncate_frames(&mut self, depth: usize) {
        self.frames.truncate(depth);
    }

    /// Merge parsed response fields into the `parsed` namespace
    pub fn merge_parsed(&mut self, fields: Map<String, Value>) {
        self.parsed.extend(fields);
    }

    /// Flatten every visible binding for template rendering
    ///
    /// Later layers win in the same order `get` resolves them: seed, job
    /// variables, the reserved namespaces, then loop variables.
    pub fn snapshot(&self) -> Map<String, Value> {
        let mut vars = self.seed.clone();

        for (name, value) in &self.globals {
            vars.insert(name.clone(), value.clone());
        }

        vars.insert(ROW_NAMESPACE.into(), Value::Object(self.seed.clone()));
        vars.insert(PARSED_NAMESPACE.into(), Value::Object(self.parsed.clone()));
        if let Some(frame) = self.frames.last() {
            vars.insert(LOOP_NAMESPACE.into(), frame.metadata());
        }

        for frame in &self.frames {
            vars.insert(frame.var.clone(), frame.current.clone());
        }

        vars
    }
}
