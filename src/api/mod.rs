//! The record API: four JSON endpoints over a [`RecordStore`].
//!
//! | Route              | Success                    | Failure                                   |
//! |--------------------|----------------------------|-------------------------------------------|
//! | `GET /`            | `{"message":"ok"}`         | —                                         |
//! | `POST /record`     | the created record         | 400 undecodable body, 500 storage failure |
//! | `GET /record/:id`  | the record                 | 404 `{"error":"Record not found"}`        |
//! | `GET /records`     | array of every record      | 500 `{"error":"Error retrieving records"}` |
//!
//! Every failure is a JSON object with a single `error` field.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::context::Context;
use crate::middleware::{CompressionMiddleware, LoggerMiddleware, Pipeline};
use crate::records::{RecordStore, StoreError};
use crate::{Response, Router, StatusCode};

const LIST_FAILED_MESSAGE: &str = "Error retrieving records";

/// Failures a handler reports to the client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request body could not be decoded.
    #[error("{0}")]
    Validation(String),

    #[error("Record not found")]
    NotFound,

    #[error("{0}")]
    Storage(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BadRequest,
            Self::NotFound => StatusCode::NotFound,
            Self::Storage(_) => StatusCode::InternalServerError,
        }
    }

    pub fn into_response(self) -> Response {
        Response::json(
            self.status(),
            &ErrorBody {
                error: self.to_string(),
            },
        )
    }
}

fn respond<T: Serialize>(result: Result<T, ApiError>) -> Response {
    match result {
        Ok(value) => Response::json(StatusCode::Ok, &value),
        Err(e) => e.into_response(),
    }
}

/// Body of `POST /record`. A client-sent `id` must still be a valid
/// identifier to decode, but it is never stored.
#[derive(Debug, Deserialize)]
struct NewRecord {
    #[serde(default, rename = "id")]
    _id: Option<u64>,
    #[serde(default)]
    data: Option<String>,
}

async fn index(_ctx: Context) -> Response {
    Response::json(StatusCode::Ok, &json!({ "message": "ok" }))
}

async fn create_record(store: RecordStore, ctx: Context) -> Response {
    let result = async {
        // A `null` body is an empty record, like `{}`.
        let input: Option<NewRecord> = ctx
            .json()
            .map_err(|e| ApiError::Validation(e.to_string()))?;
        let data = input.and_then(|record| record.data).unwrap_or_default();

        store
            .create(data)
            .await
            .map_err(|e| {
                error!(error = %e, "failed to create record");
                ApiError::Storage(e.to_string())
            })
    }
    .await;
    respond(result)
}

async fn get_record(store: RecordStore, ctx: Context) -> Response {
    let result = async {
        // Unparseable ids are answered exactly like absent ones.
        let id = ctx
            .param("id")
            .and_then(|raw| raw.parse::<i64>().ok())
            .ok_or(ApiError::NotFound)?;

        store.get_by_id(id).await.map_err(|e| {
            if let StoreError::Storage(err) = &e {
                error!(id, error = %err, "failed to load record");
            }
            ApiError::NotFound
        })
    }
    .await;
    respond(result)
}

async fn list_records(store: RecordStore, _ctx: Context) -> Response {
    let result = store.list_all().await.map_err(|e| {
        error!(error = %e, "failed to list records");
        ApiError::Storage(LIST_FAILED_MESSAGE.to_owned())
    });
    respond(result)
}

/// Registers the four record routes, each holding its own handle to `store`.
pub fn routes(store: RecordStore) -> Router {
    let mut router = Router::new();

    router.get("/", index);

    let s = store.clone();
    router.post("/record", move |ctx| create_record(s.clone(), ctx));

    let s = store.clone();
    router.get("/record/:id", move |ctx| get_record(s.clone(), ctx));

    router.get("/records", move |ctx| list_records(store.clone(), ctx));

    router
}

/// The full application: request logging, gzip, then the record routes.
pub fn app(store: RecordStore, gzip_level: u32) -> Pipeline {
    Pipeline::new(routes(store))
        .with(Arc::new(LoggerMiddleware))
        .with(Arc::new(CompressionMiddleware::new(gzip_level)))
}
