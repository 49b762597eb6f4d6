// Execution context projections - declared parameters and value intrinsics
use serde_json::{Map, Value};

use super::error::NodeError;
use super::path::JsonPath;
use crate::jobs::derive_job_name;

/// The item a Map branch was spawned for, visible to item selectors
#[derive(Debug, Clone, Copy)]
pub struct MapScope<'a> {
    pub item: &'a Value,
    pub index: usize,
}

/// Where a parameter value comes from
#[derive(Debug, Clone, PartialEq)]
pub enum ValueSource {
    /// Copy the value at a context path
    Path(JsonPath),
    /// A constant
    Literal(Value),
    /// String template with `{}` placeholders filled from paths in order
    Format { template: String, args: Vec<JsonPath> },
    /// Split the string at a path and take one part (negative counts from the end)
    SplitPart { path: JsonPath, separator: String, index: isize },
    /// Deterministic async job name for (run id, stage tag, optional item index)
    JobName { run_id: JsonPath, tag: String, index: Option<JsonPath> },
    /// Parse the JSON document stored as a string at a path
    ParseJson(JsonPath),
    /// Nested object built from its own parameters
    Object(Parameters),
    /// The current Map item, or a path inside it. Map item selectors only.
    MapItem(Option<JsonPath>),
    /// The current Map item index. Map item selectors only.
    MapIndex,
}

impl ValueSource {
    pub fn path(raw: &str) -> Self {
        ValueSource::Path(JsonPath::new(raw))
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        ValueSource::Literal(value.into())
    }

    pub fn format(template: &str, args: &[&str]) -> Self {
        ValueSource::Format {
            template: template.to_string(),
            args: args.iter().map(|a| JsonPath::new(a)).collect(),
        }
    }

    pub fn split_part(path: &str, separator: &str, index: isize) -> Self {
        ValueSource::SplitPart {
            path: JsonPath::new(path),
            separator: separator.to_string(),
            index,
        }
    }

    pub fn job_name(run_id: &str, tag: &str, index: Option<&str>) -> Self {
        ValueSource::JobName {
            run_id: JsonPath::new(run_id),
            tag: tag.to_string(),
            index: index.map(JsonPath::new),
        }
    }

    pub fn map_item(path: Option<&str>) -> Self {
        ValueSource::MapItem(path.map(JsonPath::new))
    }

    pub(crate) fn resolve(&self, ctx: &Value, scope: Option<MapScope<'_>>) -> Result<Value, NodeError> {
        match self {
            ValueSource::Path(path) => lookup(ctx, path).cloned(),
            ValueSource::Literal(value) => Ok(value.clone()),
            ValueSource::Format { template, args } => {
                let mut rendered = String::with_capacity(template.len());
                let mut pieces = template.split("{}");
                if let Some(first) = pieces.next() {
                    rendered.push_str(first);
                }
                for (piece, arg) in pieces.zip(args) {
                    rendered.push_str(&render_scalar(lookup(ctx, arg)?));
                    rendered.push_str(piece);
                }
                Ok(Value::String(rendered))
            }
            ValueSource::SplitPart { path, separator, index } => {
                let text = lookup_str(ctx, path)?;
                let parts: Vec<&str> = text.split(separator.as_str()).collect();
                let position = if *index < 0 {
                    parts.len().checked_sub(index.unsigned_abs())
                } else {
                    Some(*index as usize)
                };
                position
                    .and_then(|p| parts.get(p))
                    .map(|part| Value::String(part.to_string()))
                    .ok_or_else(|| {
                        NodeError::Runtime(format!(
                            "'{}' at {} has no part {} when split on '{}'",
                            text, path, index, separator
                        ))
                    })
            }
            ValueSource::JobName { run_id, tag, index } => {
                let run_id = lookup_str(ctx, run_id)?;
                let index = match index {
                    Some(path) => Some(parse_index(lookup(ctx, path)?, path)?),
                    None => None,
                };
                Ok(Value::String(derive_job_name(run_id, tag, index)))
            }
            ValueSource::ParseJson(path) => {
                let text = lookup_str(ctx, path)?;
                serde_json::from_str(text).map_err(|e| {
                    NodeError::Runtime(format!("value at {} is not valid JSON: {}", path, e))
                })
            }
            ValueSource::Object(parameters) => parameters.resolve_scoped(ctx, scope),
            ValueSource::MapItem(path) => {
                let scope = scope.ok_or_else(|| {
                    NodeError::Runtime("map item referenced outside a map item selector".into())
                })?;
                match path {
                    Some(path) => lookup(scope.item, path).cloned(),
                    None => Ok(scope.item.clone()),
                }
            }
            ValueSource::MapIndex => scope
                .map(|s| Value::from(s.index))
                .ok_or_else(|| NodeError::Runtime("map index referenced outside a map item selector".into())),
        }
    }

    fn validate(&self, allow_map_scope: bool) -> Result<(), String> {
        match self {
            ValueSource::Path(path) | ValueSource::ParseJson(path) => path.validate(),
            ValueSource::Literal(_) => Ok(()),
            ValueSource::Format { template, args } => {
                let placeholders = template.matches("{}").count();
                if placeholders != args.len() {
                    return Err(format!(
                        "template '{}' has {} placeholders but {} arguments",
                        template,
                        placeholders,
                        args.len()
                    ));
                }
                args.iter().try_for_each(JsonPath::validate)
            }
            ValueSource::SplitPart { path, separator, .. } => {
                if separator.is_empty() {
                    return Err(format!("empty separator for {}", path));
                }
                path.validate()
            }
            ValueSource::JobName { run_id, tag, index } => {
                if tag.is_empty() {
                    return Err("job name tag must not be empty".to_string());
                }
                run_id.validate()?;
                index.as_ref().map_or(Ok(()), JsonPath::validate)
            }
            ValueSource::Object(parameters) => parameters.validate(allow_map_scope),
            ValueSource::MapItem(_) | ValueSource::MapIndex if !allow_map_scope => {
                Err("map item values are only available in map item selectors".to_string())
            }
            ValueSource::MapItem(path) => path.as_ref().map_or(Ok(()), JsonPath::validate),
            ValueSource::MapIndex => Ok(()),
        }
    }
}

/// Declared projection of the context into a JSON object.
///
/// Used for Pass mappings, worker request payloads, result selectors and Map
/// item selectors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    fields: Vec<(String, ValueSource)>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, key: &str, source: ValueSource) -> Self {
        self.fields.push((key.to_string(), source));
        self
    }

    /// Shorthand for copying a context path into `key`
    pub fn copy(self, key: &str, path: &str) -> Self {
        self.field(key, ValueSource::path(path))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn resolve(&self, ctx: &Value) -> Result<Value, NodeError> {
        self.resolve_scoped(ctx, None)
    }

    pub fn resolve_scoped(&self, ctx: &Value, scope: Option<MapScope<'_>>) -> Result<Value, NodeError> {
        let mut object = Map::with_capacity(self.fields.len());
        for (key, source) in &self.fields {
            let value = source
                .resolve(ctx, scope)
                .map_err(|e| NodeError::Runtime(format!("parameter '{}': {}", key, e)))?;
            object.insert(key.clone(), value);
        }
        Ok(Value::Object(object))
    }

    pub fn validate(&self, allow_map_scope: bool) -> Result<(), String> {
        for (key, source) in &self.fields {
            source
                .validate(allow_map_scope)
                .map_err(|reason| format!("parameter '{}': {}", key, reason))?;
        }
        Ok(())
    }
}

fn lookup<'v>(ctx: &'v Value, path: &JsonPath) -> Result<&'v Value, NodeError> {
    path.get(ctx)
        .ok_or_else(|| NodeError::Runtime(format!("path {} not found in context", path)))
}

fn lookup_str<'v>(ctx: &'v Value, path: &JsonPath) -> Result<&'v str, NodeError> {
    lookup(ctx, path)?
        .as_str()
        .ok_or_else(|| NodeError::Runtime(format!("value at {} is not a string", path)))
}

fn parse_index(value: &Value, path: &JsonPath) -> Result<usize, NodeError> {
    match value {
        Value::Number(n) => n.as_u64().map(|n| n as usize),
        Value::String(s) => s.parse::<usize>().ok(),
        _ => None,
    }
    .ok_or_else(|| NodeError::Runtime(format!("value at {} is not an item index", path)))
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
