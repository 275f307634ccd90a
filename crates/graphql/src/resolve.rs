use crate::jq;
use crate::typegen::Kind;
use async_graphql::dynamic::{FieldValue, ResolverContext};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Scope is the per-request view of one catalog: the raw file opened at
/// request time (so the whole request observes one file generation, even
/// across a concurrent swap) and the loaded sparse index. Resolvers find it
/// in the request's context data; resolving without it is a not-found error.
pub struct Scope {
    raw: tokio::sync::Mutex<tokio::fs::File>,
    index: Arc<content::Index>,
}

impl Scope {
    pub fn new(raw: tokio::fs::File, index: Arc<content::Index>) -> Self {
        Self {
            raw: tokio::sync::Mutex::new(raw),
            index,
        }
    }

    /// Decode the blobs matching the given keys, in raw-file offset order.
    async fn query(
        &self,
        schema: &str,
        package: &str,
        name: &str,
    ) -> async_graphql::Result<Vec<Value>> {
        let sections = self.index.sections(schema, package, name);
        let mut raw = self.raw.lock().await;

        let mut blobs = Vec::with_capacity(sections.len());
        for section in sections {
            let bytes = content::read::read_section(&mut raw, section)
                .await
                .map_err(|err| {
                    async_graphql::Error::new(format!("reading catalog content: {err}"))
                })?;
            blobs.push(serde_json::from_slice(&bytes).map_err(|err| {
                async_graphql::Error::new(format!("decoding catalog blob: {err}"))
            })?);
        }
        Ok(blobs)
    }
}

/// JqCache memoizes compiled jq programs for the lifetime of one request,
/// keyed by program text.
#[derive(Default)]
pub struct JqCache {
    programs: Mutex<HashMap<String, Arc<jq::Filter>>>,
}

impl JqCache {
    fn compile(&self, program: &str) -> Result<Arc<jq::Filter>, jq::Error> {
        let mut programs = self.programs.lock().unwrap();
        if let Some(filter) = programs.get(program) {
            return Ok(filter.clone());
        }
        let filter = Arc::new(jq::compile(program)?);
        programs.insert(program.to_string(), filter.clone());
        Ok(filter)
    }
}

/// Resolve a root query field: stream the blobs of `source_schema` matching
/// the optional `name` and `package` arguments through the index.
pub(crate) async fn root(
    ctx: ResolverContext<'_>,
    source_schema: String,
) -> async_graphql::Result<Option<FieldValue<'_>>> {
    let scope = ctx.data::<Scope>()?;
    let name = string_argument(&ctx, "name")?;
    let package = string_argument(&ctx, "package")?;

    let blobs = scope.query(&source_schema, &package, &name).await?;
    Ok(Some(FieldValue::list(
        blobs.into_iter().map(FieldValue::owned_any),
    )))
}

/// Resolve a generated object field: extract `src_key` from the parent blob
/// value and present it according to `kind`.
pub(crate) async fn field(
    ctx: ResolverContext<'_>,
    src_key: String,
    kind: Kind,
) -> async_graphql::Result<Option<FieldValue<'_>>> {
    let parent = ctx.parent_value.try_downcast_ref::<Value>()?;
    let Some(value) = parent.get(&src_key) else {
        return Ok(None);
    };
    if value.is_null() {
        return Ok(None);
    }

    match kind {
        Kind::Object => Ok(Some(FieldValue::owned_any(value.clone()))),
        Kind::ObjectList => {
            let Value::Array(items) = value else {
                return Ok(None);
            };
            Ok(Some(FieldValue::list(
                items.iter().cloned().map(FieldValue::owned_any),
            )))
        }
        Kind::Properties => {
            let Value::Array(members) = value else {
                return Ok(None);
            };
            let wanted = match ctx.args.get("type") {
                Some(arg) if !arg.is_null() => Some(arg.string()?.to_string()),
                _ => None,
            };
            let members: Vec<Value> = members
                .iter()
                .filter(|member| match &wanted {
                    None => true,
                    Some(wanted) => {
                        member.get("type").and_then(Value::as_str) == Some(wanted.as_str())
                    }
                })
                .cloned()
                .collect();
            Ok(Some(FieldValue::list(
                members.into_iter().map(FieldValue::owned_any),
            )))
        }
        Kind::Json => {
            let transformed = apply_jq(&ctx, value.clone())?;
            Ok(Some(FieldValue::value(to_graphql_value(transformed)?)))
        }
        Kind::Scalar => Ok(Some(FieldValue::value(to_graphql_value(value.clone())?))),
    }
}

fn string_argument(ctx: &ResolverContext<'_>, name: &str) -> async_graphql::Result<String> {
    match ctx.args.get(name) {
        Some(value) if !value.is_null() => Ok(value.string()?.to_string()),
        _ => Ok(String::new()),
    }
}

fn to_graphql_value(value: Value) -> async_graphql::Result<async_graphql::Value> {
    async_graphql::Value::from_json(value)
        .map_err(|err| async_graphql::Error::new(format!("presenting field value: {err}")))
}

/// Run the field's `jq:` argument, if present, over the value. Programs are
/// compiled once per request per program text; failures surface as field
/// errors rather than failing the request.
fn apply_jq(ctx: &ResolverContext<'_>, value: Value) -> async_graphql::Result<Value> {
    let program = match ctx.args.get("jq") {
        Some(arg) if !arg.is_null() => arg.string()?.to_string(),
        _ => return Ok(value),
    };
    let cache = ctx.data::<JqCache>()?;
    let filter = cache
        .compile(&program)
        .map_err(|err| async_graphql::Error::new(err.to_string()))?;
    jq::run(&filter, value).map_err(|err| async_graphql::Error::new(err.to_string()))
}
