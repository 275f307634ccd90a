use crate::conditional;
use crate::error::ApiError;
use axum::extract::{Path, Request, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use lazy_static::lazy_static;
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceExt;

lazy_static! {
    static ref JSONL: mime::Mime = "application/jsonl".parse().unwrap();
}

/// `GET|HEAD /:catalog/api/v1/all`: the catalog's entire raw file, served
/// with standard content semantics (Range, Last-Modified, conditional
/// requests).
pub(crate) async fn all(
    State(store): State<Arc<catalog::Store>>,
    Path(catalog): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let path = store.raw_path(&catalog)?;
    serve_raw(path, request).await
}

/// `GET|HEAD /:catalog/api/v1/metas[?schema=…&package=…&name=…]`: the
/// filtered subset of the catalog's blobs as JSONL. Filters outside the
/// allow-list are rejected; no filters at all is the full raw file.
pub(crate) async fn metas(
    State(store): State<Arc<catalog::Store>>,
    Path(catalog): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let (schema, package, name) = filter_params(request.uri().query().unwrap_or(""))?;

    let mod_time = store.raw_mod_time(&catalog)?;
    if let Some(response) = conditional::check(request.method(), request.headers(), mod_time) {
        return Ok(response);
    }
    if schema.is_empty() && package.is_empty() && name.is_empty() {
        let path = store.raw_path(&catalog)?;
        return serve_raw(path, request).await;
    }

    let headers = [
        (header::CONTENT_TYPE, JSONL.as_ref().parse().unwrap()),
        (header::LAST_MODIFIED, conditional::http_date(mod_time)),
    ];
    if request.method() == Method::HEAD {
        return Ok((StatusCode::OK, headers).into_response());
    }

    let stream = store.metas(&catalog, &schema, &package, &name).await?;
    let body = axum::body::Body::from_stream(stream);
    Ok((StatusCode::OK, headers, body).into_response())
}

#[derive(serde::Deserialize)]
pub(crate) struct GraphqlRequest {
    query: String,
}

/// `POST /:catalog/api/v1/graphql`: execute one query against the catalog's
/// generated schema. Engine errors travel in the response body.
pub(crate) async fn graphql(
    State(store): State<Arc<catalog::Store>>,
    Path(catalog): Path<String>,
    axum::Json(request): axum::Json<GraphqlRequest>,
) -> Result<Response, ApiError> {
    if !store.content_exists(&catalog) {
        return Err(catalog::Error::NotFound(catalog).into());
    }
    let response = store.graphql(&catalog, request.query).await?;
    Ok(axum::Json(response).into_response())
}

// Extract the allow-listed filter parameters; anything else is a 400. A
// repeated key keeps its first value.
fn filter_params(query: &str) -> Result<(String, String, String), ApiError> {
    let (mut schema, mut package, mut name) = (None, None, None);
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        let slot = match key.as_ref() {
            "schema" => &mut schema,
            "package" => &mut package,
            "name" => &mut name,
            other => {
                return Err(ApiError::bad_request(anyhow::anyhow!(
                    "unexpected query parameter {other:?}"
                )))
            }
        };
        slot.get_or_insert_with(|| value.into_owned());
    }
    Ok((
        schema.unwrap_or_default(),
        package.unwrap_or_default(),
        name.unwrap_or_default(),
    ))
}

async fn serve_raw(path: PathBuf, request: Request) -> Result<Response, ApiError> {
    let serve = tower_http::services::ServeFile::new_with_mime(path, &JSONL);
    let response = serve.oneshot(request).await.map_err(|err| {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            anyhow::anyhow!("serving raw content: {err}"),
        )
    })?;
    Ok(response.map(axum::body::Body::new))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_filter_params_allow_list() {
        assert_eq!(
            filter_params("schema=olm.bundle&package=p&name=b").unwrap(),
            (
                "olm.bundle".to_string(),
                "p".to_string(),
                "b".to_string(),
            ),
        );
        assert_eq!(
            filter_params("").unwrap(),
            (String::new(), String::new(), String::new()),
        );
        assert_eq!(
            filter_params("name=first&name=second").unwrap().2,
            "first",
        );
        assert!(filter_params("foo=bar").is_err());
        assert!(filter_params("schema=olm.bundle&foo=bar").is_err());
    }
}
