//! The `Update` interface used by `findAndModify`: an ordered list of
//! field-path-keyed operations applied to each matched document in turn.

use serde_json::Value;

use crate::error::Result;
use crate::Error;

/// A single field-level mutation.
#[derive(Debug, Clone)]
pub enum FieldOp {
    /// Overwrite the field at `path` with `value`.
    Set { path: String, value: Value },
    /// Remove the field at `path`, if present.
    Unset { path: String },
    /// Add `by` to the numeric field at `path` (creating it at `by` if
    /// absent).
    Increment { path: String, by: f64 },
}

/// An ordered update specification. Operations apply in declared order.
#[derive(Debug, Clone, Default)]
pub struct Update {
    ops: Vec<FieldOp>,
}

impl Update {
    pub fn new() -> Self {
        Self { ops: Vec::new() }
    }

    pub fn set(mut self, path: impl Into<String>, value: Value) -> Self {
        self.ops.push(FieldOp::Set {
            path: path.into(),
            value,
        });
        self
    }

    pub fn unset(mut self, path: impl Into<String>) -> Self {
        self.ops.push(FieldOp::Unset { path: path.into() });
        self
    }

    pub fn increment(mut self, path: impl Into<String>, by: f64) -> Self {
        self.ops.push(FieldOp::Increment {
            path: path.into(),
            by,
        });
        self
    }

    /// Apply every operation, in order, to `doc`.
    pub fn apply(&self, doc: &mut Value) -> Result<()> {
        for op in &self.ops {
            match op {
                FieldOp::Set { path, value } => set_path(doc, path, value.clone()),
                FieldOp::Unset { path } => unset_path(doc, path),
                FieldOp::Increment { path, by } => increment_path(doc, path, *by)?,
            }
        }
        Ok(())
    }
}

fn set_path(doc: &mut Value, path: &str, value: Value) {
    let mut segments = path.split('.').peekable();
    let mut current = doc;
    while let Some(segment) = segments.next() {
        if !current.is_object() {
            *current = Value::Object(serde_json::Map::new());
        }
        let map = current.as_object_mut().expect("just coerced to object");
        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return;
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
}

fn unset_path(doc: &mut Value, path: &str) {
    let Some((parent, last)) = path.rsplit_once('.') else {
        if let Some(map) = doc.as_object_mut() {
            map.remove(path);
        }
        return;
    };
    let mut current = doc;
    for segment in parent.split('.') {
        match current.as_object_mut().and_then(|m| m.get_mut(segment)) {
            Some(next) => current = next,
            None => return,
        }
    }
    if let Some(map) = current.as_object_mut() {
        map.remove(last);
    }
}

fn increment_path(doc: &mut Value, path: &str, by: f64) -> Result<()> {
    let current = lookup_mut_path(doc, path);
    let new_value = match current {
        None => by,
        Some(Value::Null) => by,
        Some(Value::Number(n)) => {
            n.as_f64().ok_or_else(|| {
                Error::InvalidDocument(format!("field '{path}' is not a representable number"))
            })? + by
        }
        Some(_) => {
            return Err(Error::InvalidDocument(format!(
                "field '{path}' is not numeric"
            )))
        }
    };
    let number = serde_json::Number::from_f64(new_value)
        .ok_or_else(|| Error::InvalidDocument(format!("increment of '{path}' is not finite")))?;
    set_path(doc, path, Value::Number(number));
    Ok(())
}

fn lookup_mut_path<'a>(doc: &'a mut Value, path: &str) -> Option<&'a Value> {
    let mut current: &Value = doc;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}
