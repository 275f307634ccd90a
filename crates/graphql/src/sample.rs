use crate::{Error, MergePolicy};
use serde_json::Value;
use std::collections::BTreeMap;

/// Sample is the deep-merged shape of every value observed for one field.
/// It is what remains of the values once only their JSON types matter.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Sample {
    Null,
    Bool,
    Int,
    Float,
    Str,
    /// An arbitrary JSON value; the field degraded to the JSON scalar.
    Any,
    /// An array whose elements all share the contained shape; None for an
    /// array never observed with elements.
    Array(Option<Box<Sample>>),
    Object(BTreeMap<String, Sample>),
    /// The properties pattern: an array of `{type: string, value: any}`
    /// objects, collapsed regardless of how many variants appear.
    Properties,
}

impl Sample {
    /// The shape of one observed value. Array elements are merged under the
    /// invariant that they all share one JSON type.
    pub fn of(value: &Value, policy: MergePolicy, path: &str) -> Result<Self, Error> {
        Ok(match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Bool,
            Value::Number(n) if n.is_i64() || n.is_u64() => Self::Int,
            Value::Number(_) => Self::Float,
            Value::String(_) => Self::Str,
            Value::Array(items) => {
                if is_properties(items) {
                    return Ok(Self::Properties);
                }
                let path = format!("{path}[]");
                let mut element: Option<Sample> = None;
                for item in items {
                    let sample = Self::of(item, policy, &path)?;
                    element = Some(match element {
                        None => sample,
                        Some(prior) => prior.merge(sample, policy, &path)?,
                    });
                }
                Self::Array(element.map(Box::new))
            }
            Value::Object(fields) => Self::Object(
                fields
                    .iter()
                    .map(|(key, value)| {
                        Ok((
                            key.clone(),
                            Self::of(value, policy, &format!("{path}.{key}"))?,
                        ))
                    })
                    .collect::<Result<_, Error>>()?,
            ),
        })
    }

    /// Deep-merge two shapes of one field.
    pub fn merge(self, other: Self, policy: MergePolicy, path: &str) -> Result<Self, Error> {
        Ok(match (self, other) {
            (a, b) if a == b => a,
            (Self::Null, x) | (x, Self::Null) => x,
            (Self::Any, _) | (_, Self::Any) => Self::Any,
            (Self::Int, Self::Float) | (Self::Float, Self::Int) => Self::Float,
            (Self::Array(None), Self::Array(x)) | (Self::Array(x), Self::Array(None)) => {
                Self::Array(x)
            }
            (Self::Array(Some(a)), Self::Array(Some(b))) => Self::Array(Some(Box::new(
                a.merge(*b, policy, &format!("{path}[]"))?,
            ))),
            (Self::Object(mut a), Self::Object(b)) => {
                for (key, value) in b {
                    let merged = match a.remove(&key) {
                        None => value,
                        Some(prior) => prior.merge(value, policy, &format!("{path}.{key}"))?,
                    };
                    a.insert(key, merged);
                }
                Self::Object(a)
            }
            (left, right) => match policy {
                MergePolicy::Widen => Self::Any,
                MergePolicy::Strict => {
                    return Err(Error::Merge {
                        path: path.to_string(),
                        left: left.kind_name(),
                        right: right.kind_name(),
                    })
                }
            },
        })
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool => "boolean",
            Self::Int => "integer",
            Self::Float => "number",
            Self::Str => "string",
            Self::Any => "any",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Properties => "properties",
        }
    }
}

fn is_properties(items: &[Value]) -> bool {
    !items.is_empty()
        && items.iter().all(|item| {
            let Value::Object(fields) = item else {
                return false;
            };
            fields.len() == 2
                && fields.get("type").is_some_and(Value::is_string)
                && fields.contains_key("value")
        })
}
