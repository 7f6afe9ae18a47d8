//! # External Value
//!
//! Conversion between snapshots and the JSON document value held by the
//! persistence layer.
//!
//! ```json
//! [
//!   { "_key": "b1", "_type": "block", "style": "normal",
//!     "children": [{ "_key": "s1", "_type": "span", "text": "Hello", "marks": [] }] },
//!   { "_key": "img", "_type": "image", "url": "..." }
//! ]
//! ```

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::{Block, BlockBody, DocumentSnapshot, ModelError, Span};

/// Type names the translator needs to know about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockSchema {
    /// `_type` of rich text blocks
    #[serde(default = "default_block_type")]
    pub block_type: String,

    /// `_type` of spans inside text blocks
    #[serde(default = "default_span_type")]
    pub span_type: String,

    /// Allowed object block types. Empty allows any type.
    #[serde(default)]
    pub object_types: Vec<String>,

    /// The block type declares its own span type (legacy schema)
    #[serde(default)]
    pub span_declared_on_block: bool,

    /// Object types declared with the legacy inline option
    #[serde(default)]
    pub inline_object_types: Vec<String>,
}

/// Schema shapes the editor no longer supports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaDeprecation {
    Span,
    Inline,
}

fn default_block_type() -> String {
    "block".to_string()
}

fn default_span_type() -> String {
    "span".to_string()
}

impl Default for BlockSchema {
    fn default() -> Self {
        Self {
            block_type: default_block_type(),
            span_type: default_span_type(),
            object_types: vec![],
            span_declared_on_block: false,
            inline_object_types: vec![],
        }
    }
}

impl BlockSchema {
    pub fn allows_object(&self, type_name: &str) -> bool {
        self.object_types.is_empty() || self.object_types.iter().any(|t| t == type_name)
    }

    pub fn deprecation(&self) -> Option<SchemaDeprecation> {
        if self.span_declared_on_block {
            Some(SchemaDeprecation::Span)
        } else if !self.inline_object_types.is_empty() {
            Some(SchemaDeprecation::Inline)
        } else {
            None
        }
    }
}

/// Whether an external value can be edited
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueStatus {
    Valid,
    /// Not an array (and not absent)
    Invalid { actual_type: String },
    /// Text blocks use the legacy `spans` field
    Deprecated,
}

/// Classify an external value before deserializing it
pub fn classify_value(value: &Value) -> ValueStatus {
    match value {
        Value::Null => ValueStatus::Valid,
        Value::Array(items) => {
            let deprecated = items.iter().any(|item| {
                item.get("_type").and_then(Value::as_str) == Some("block") && item.get("spans").is_some()
            });
            if deprecated {
                ValueStatus::Deprecated
            } else {
                ValueStatus::Valid
            }
        }
        other => ValueStatus::Invalid {
            actual_type: json_type_name(other).to_string(),
        },
    }
}

pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Serialize a snapshot to the external value
pub fn serialize(snapshot: &DocumentSnapshot, schema: &BlockSchema) -> Value {
    Value::Array(snapshot.blocks().iter().map(|b| block_to_value(b, schema)).collect())
}

/// Deserialize an external value. `null` is the empty document.
pub fn deserialize(value: &Value, schema: &BlockSchema) -> Result<DocumentSnapshot, ModelError> {
    match value {
        Value::Null => Ok(DocumentSnapshot::empty()),
        Value::Array(items) => {
            let blocks = items
                .iter()
                .map(|item| value_to_block(item, schema))
                .collect::<Result<Vec<_>, _>>()?;
            DocumentSnapshot::new(blocks)
        }
        other => Err(ModelError::InvalidValue(format!(
            "expected an array of blocks, got {}",
            json_type_name(other)
        ))),
    }
}

pub fn block_to_value(block: &Block, schema: &BlockSchema) -> Value {
    match &block.body {
        BlockBody::Text { style, spans } => json!({
            "_key": block.key,
            "_type": block.block_type,
            "style": style,
            "children": spans.iter().map(|s| span_to_value(s, schema)).collect::<Vec<_>>(),
        }),
        BlockBody::Object { fields } => {
            let mut map = Map::new();
            map.insert("_key".to_string(), Value::String(block.key.clone()));
            map.insert("_type".to_string(), Value::String(block.block_type.clone()));
            for (name, value) in fields {
                map.insert(name.clone(), value.clone());
            }
            Value::Object(map)
        }
    }
}

pub fn span_to_value(span: &Span, schema: &BlockSchema) -> Value {
    json!({
        "_key": span.key,
        "_type": schema.span_type,
        "text": span.text,
        "marks": span.marks,
    })
}

pub fn value_to_block(value: &Value, schema: &BlockSchema) -> Result<Block, ModelError> {
    let map = value
        .as_object()
        .ok_or_else(|| ModelError::InvalidValue(format!("block must be an object, got {}", json_type_name(value))))?;
    let key = string_field(map, "_key")?;
    let block_type = string_field(map, "_type")?;

    if block_type == schema.block_type {
        let style = map
            .get("style")
            .and_then(Value::as_str)
            .unwrap_or("normal")
            .to_string();
        let spans = match map.get("children") {
            None | Some(Value::Null) => vec![],
            Some(Value::Array(children)) => children
                .iter()
                .map(|c| value_to_span(c, schema))
                .collect::<Result<Vec<_>, _>>()?,
            Some(other) => {
                return Err(ModelError::InvalidValue(format!(
                    "children of {} must be an array, got {}",
                    key,
                    json_type_name(other)
                )))
            }
        };
        return Ok(Block {
            key,
            block_type,
            body: BlockBody::Text { style, spans },
        });
    }

    if !schema.allows_object(&block_type) {
        return Err(ModelError::InvalidValue(format!("unknown block type {}", block_type)));
    }

    let fields = map
        .iter()
        .filter(|(name, _)| name.as_str() != "_key" && name.as_str() != "_type")
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    Ok(Block {
        key,
        block_type,
        body: BlockBody::Object { fields },
    })
}

pub fn value_to_span(value: &Value, schema: &BlockSchema) -> Result<Span, ModelError> {
    let map = value
        .as_object()
        .ok_or_else(|| ModelError::InvalidValue(format!("span must be an object, got {}", json_type_name(value))))?;
    let key = string_field(map, "_key")?;

    if let Some(span_type) = map.get("_type").and_then(Value::as_str) {
        if span_type != schema.span_type {
            return Err(ModelError::InvalidValue(format!("unknown span type {}", span_type)));
        }
    }

    let text = map.get("text").and_then(Value::as_str).unwrap_or_default().to_string();
    let marks: BTreeSet<String> = match map.get("marks") {
        Some(Value::Array(marks)) => marks.iter().filter_map(Value::as_str).map(str::to_string).collect(),
        _ => BTreeSet::new(),
    };

    Ok(Span { key, text, marks })
}

fn string_field(map: &Map<String, Value>, name: &str) -> Result<String, ModelError> {
    map.get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ModelError::InvalidValue(format!("missing string field {}", name)))
}

/// Block keys of an external value, in order. Non-arrays yield nothing.
pub fn external_block_keys(value: &Value) -> Vec<&str> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("_key").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default()
}
