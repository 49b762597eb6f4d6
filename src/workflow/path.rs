// Path expressions over the execution context (`$`, `$.a.b`, `$.items[0]`)
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Field(String),
    Index(usize),
}

/// A parsed path into a JSON-like context.
///
/// Parsing never fails at construction time so graphs can be declared with
/// plain string literals; an invalid expression is kept with its reason and
/// rejected when the owning graph is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    raw: String,
    segments: Result<Vec<Segment>, String>,
}

impl JsonPath {
    pub fn new(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            segments: parse(raw),
        }
    }

    /// The root path `$`
    pub fn root() -> Self {
        Self::new("$")
    }

    /// Returns the parse failure, if any
    pub fn validate(&self) -> Result<(), String> {
        self.segments.as_ref().map(|_| ()).map_err(|e| e.clone())
    }

    pub fn get<'v>(&self, root: &'v Value) -> Option<&'v Value> {
        let segments = self.segments.as_ref().ok()?;
        let mut current = root;
        for segment in segments {
            current = match segment {
                Segment::Field(name) => current.as_object()?.get(name)?,
                Segment::Index(i) => current.as_array()?.get(*i)?,
            };
        }
        Some(current)
    }

    /// Write `value` at this path, creating intermediate objects.
    ///
    /// Writing an object at `$` merges its keys into the root instead of
    /// replacing it, so fields written by earlier nodes survive.
    pub fn set(&self, root: &mut Value, value: Value) -> Result<(), String> {
        let segments = self.segments.as_ref().map_err(|e| e.clone())?;

        let Some((last, parents)) = segments.split_last() else {
            return merge_root(root, value, &self.raw);
        };

        let mut current = root;
        for segment in parents {
            current = step_mut(current, segment, &self.raw)?;
        }

        match last {
            Segment::Field(name) => {
                if current.is_null() {
                    *current = Value::Object(Map::new());
                }
                let object = current
                    .as_object_mut()
                    .ok_or_else(|| format!("cannot write field '{}' of a non-object at {}", name, self.raw))?;
                object.insert(name.clone(), value);
            }
            Segment::Index(i) => {
                let slot = current
                    .as_array_mut()
                    .and_then(|items| items.get_mut(*i))
                    .ok_or_else(|| format!("index {} out of bounds at {}", i, self.raw))?;
                *slot = value;
            }
        }
        Ok(())
    }
}

impl From<&str> for JsonPath {
    fn from(raw: &str) -> Self {
        JsonPath::new(raw)
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn step_mut<'v>(current: &'v mut Value, segment: &Segment, raw: &str) -> Result<&'v mut Value, String> {
    match segment {
        Segment::Field(name) => {
            if current.is_null() {
                *current = Value::Object(Map::new());
            }
            let object = current
                .as_object_mut()
                .ok_or_else(|| format!("cannot descend into field '{}' of a non-object at {}", name, raw))?;
            Ok(object.entry(name.clone()).or_insert(Value::Null))
        }
        Segment::Index(i) => current
            .as_array_mut()
            .and_then(|items| items.get_mut(*i))
            .ok_or_else(|| format!("index {} out of bounds at {}", i, raw)),
    }
}

fn merge_root(root: &mut Value, value: Value, raw: &str) -> Result<(), String> {
    if root.is_null() {
        *root = value;
        return Ok(());
    }
    match (root, value) {
        (Value::Object(target), Value::Object(source)) => {
            target.extend(source);
            Ok(())
        }
        (_, other) => Err(format!(
            "cannot merge a non-object ({}) into the context root at {}",
            type_name(&other),
            raw
        )),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn parse(raw: &str) -> Result<Vec<Segment>, String> {
    let rest = raw
        .strip_prefix('$')
        .ok_or_else(|| "path must start with '$'".to_string())?;

    let mut segments = Vec::new();
    let mut chars = rest.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                let mut name = String::new();
                while let Some(&next) = chars.peek() {
                    if next == '.' || next == '[' {
                        break;
                    }
                    name.push(next);
                    chars.next();
                }
                if name.is_empty() {
                    return Err("empty field name".to_string());
                }
                segments.push(Segment::Field(name));
            }
            '[' => {
                let mut digits = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(d) if d.is_ascii_digit() => digits.push(d),
                        Some(other) => return Err(format!("unexpected '{}' in index", other)),
                        None => return Err("unterminated index".to_string()),
                    }
                }
                let index = digits
                    .parse::<usize>()
                    .map_err(|_| "empty index".to_string())?;
                segments.push(Segment::Index(index));
            }
            other => return Err(format!("unexpected '{}'", other)),
        }
    }

    Ok(segments)
}

/// Where a node's output lands in the context
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultPath {
    /// Drop the output; the context passes through unchanged
    Discard,
    /// Write the output at a path (`$` merges into the root)
    At(JsonPath),
}

impl ResultPath {
    pub fn at(raw: &str) -> Self {
        ResultPath::At(JsonPath::new(raw))
    }

    pub fn apply(&self, context: &mut Value, output: Value) -> Result<(), String> {
        match self {
            ResultPath::Discard => Ok(()),
            ResultPath::At(path) => path.set(context, output),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            ResultPath::Discard => Ok(()),
            ResultPath::At(path) => path.validate(),
        }
    }
}
