use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::header::{
    CONTENT_LENGTH, CONTENT_TYPE, DATE, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED,
    LOCATION,
};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use cask_storage::{ObjectRead, StoreError};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use futures::{StreamExt, TryStreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error};

use crate::AppState;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Buffer size for the download body's MPSC channel.
const BODY_CHANNEL_CAPACITY: usize = 10;

/// How much of an object is inspected to detect its Content-Type.
const SNIFF_LEN: u64 = 512;

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Store an upload. Requires a well-formed `name` query parameter plus
/// parseable `Content-Type` and `Content-Length` headers; responds with the
/// handle the upload is retrievable under.
pub async fn store_object(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, (StatusCode, String)> {
    let name = object_name(&params)?;
    check_upload_headers(&headers)?;

    let stream = body.into_data_stream().map_err(io::Error::other).boxed();
    let mtime = SystemTime::now();

    match state.store.post(name, stream, mtime).await {
        Ok(handle) => {
            debug!("Stored {name} as {handle}");
            let headers = [
                (LOCATION, format!("/?name={handle}")),
                (DATE, http_date(mtime)),
            ];
            Ok((StatusCode::CREATED, headers).into_response())
        }
        Err(StoreError::BadHandle(_)) => Err(bad_request()),
        Err(e) => {
            error!("Error storing {name}: {e}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error storing file".to_string(),
            ))
        }
    }
}

/// Retrieve an upload (GET) or just its headers (HEAD). Supports
/// `If-None-Match` against the handle's random identifier and
/// `If-Modified-Since` against the stored mtime.
pub async fn fetch_object(
    State(state): State<AppState>,
    method: Method,
    Query(params): Query<HashMap<String, String>>,
    request_headers: HeaderMap,
) -> Result<Response, (StatusCode, String)> {
    let name = object_name(&params)?;

    let object = match state.store.get(name).await {
        Ok(object) => object,
        Err(StoreError::BadHandle(_)) => return Err(bad_request()),
        Err(StoreError::NotFound) => {
            return Err((StatusCode::NOT_FOUND, "Not found".to_string()))
        }
        Err(e) => {
            error!("Error fetching {name}: {e}");
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error fetching file".to_string(),
            ));
        }
    };

    // The random identifier doubles as a strong validator.
    let (etag, basename) = name.split_once('/').unwrap_or((name, name));
    let last_modified = http_date(object.mtime);

    if not_modified(&request_headers, etag, object.mtime) {
        let headers = [
            (ETAG, etag.to_string()),
            (LAST_MODIFIED, last_modified),
        ];
        return Ok((StatusCode::NOT_MODIFIED, headers).into_response());
    }

    let (reader, content_type) = match sniff_content_type(object.reader, basename.to_string()).await
    {
        Ok(pair) => pair,
        Err(e) => {
            error!("Error sniffing {name}: {e}");
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error fetching file".to_string(),
            ));
        }
    };

    let headers = [
        (ETAG, etag.to_string()),
        (LAST_MODIFIED, last_modified),
        (CONTENT_TYPE, content_type),
        (CONTENT_LENGTH, object.size.to_string()),
    ];

    if method == Method::HEAD {
        return Ok((StatusCode::OK, headers).into_response());
    }
    Ok((StatusCode::OK, headers, stream_body(reader)).into_response())
}

/// Remove an upload. Deliberately reports every failure the same way:
/// clients have no business distinguishing a missing record from an I/O
/// problem here.
pub async fn remove_object(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, (StatusCode, String)> {
    let name = object_name(&params)?;

    match state.store.delete(name).await {
        Ok(()) => Ok(StatusCode::OK.into_response()),
        Err(e) => {
            error!("Couldn't delete {name}: {e}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Couldn't delete".to_string(),
            ))
        }
    }
}

/// The `name` query parameter, which every verb requires in `dir/file`
/// form. For GET and DELETE that is the handle a post returned.
fn object_name(params: &HashMap<String, String>) -> Result<&str, (StatusCode, String)> {
    let name = params.get("name").map(String::as_str).unwrap_or("");
    match name.rsplit_once('/') {
        Some((dir, file)) if !dir.is_empty() && !file.is_empty() => Ok(name),
        _ => Err(bad_request()),
    }
}

fn check_upload_headers(headers: &HeaderMap) -> Result<(), (StatusCode, String)> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if content_type.parse::<mime::Mime>().is_err() {
        return Err(bad_request());
    }

    let content_length = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if content_length.parse::<u64>().is_err() {
        return Err(bad_request());
    }

    Ok(())
}

fn bad_request() -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, "Invalid request".to_string())
}

fn not_modified(request: &HeaderMap, etag: &str, mtime: SystemTime) -> bool {
    if let Some(matches) = request.get(IF_NONE_MATCH).and_then(|v| v.to_str().ok()) {
        return matches.split(',').any(|candidate| {
            let candidate = candidate.trim().trim_matches('"');
            candidate == "*" || candidate == etag
        });
    }
    if let Some(since) = request
        .get(IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date)
    {
        // HTTP dates have second granularity.
        return unix_seconds(mtime) <= unix_seconds(since);
    }
    false
}

/// Detect the Content-Type to serve. Magic bytes in the object's first
/// [`SNIFF_LEN`] bytes win over the basename's extension: uploads carry
/// arbitrary names, and the content is what it is. The extension is only a
/// hint for types with no recognizable signature (plain text, mostly),
/// with octet-stream as the last resort. The reader comes back rewound to
/// the start.
async fn sniff_content_type(
    mut reader: Box<dyn ObjectRead>,
    basename: String,
) -> io::Result<(Box<dyn ObjectRead>, String)> {
    tokio::task::spawn_blocking(move || {
        let mut prefix = Vec::with_capacity(SNIFF_LEN as usize);
        (&mut reader).take(SNIFF_LEN).read_to_end(&mut prefix)?;
        reader.seek(SeekFrom::Start(0))?;

        let content_type = match infer::get(&prefix) {
            Some(kind) => kind.mime_type().to_string(),
            None => mime_guess::from_path(&basename)
                .first_or_octet_stream()
                .to_string(),
        };
        Ok((reader, content_type))
    })
    .await
    .map_err(io::Error::other)?
}

/// Serve the object's bytes off a blocking task, handing blocks to the
/// response through a bounded channel so a slow client cannot pull the
/// whole object into memory.
fn stream_body(mut reader: Box<dyn ObjectRead>) -> Body {
    let (tx, rx) = mpsc::channel::<io::Result<Vec<u8>>>(BODY_CHANNEL_CAPACITY);
    tokio::task::spawn_blocking(move || {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.blocking_send(Ok(buf[..n].to_vec())).is_err() {
                        break; // client went away
                    }
                }
                Err(e) => {
                    let _ = tx.blocking_send(Err(e));
                    break;
                }
            }
        }
    });
    Body::from_stream(ReceiverStream::new(rx))
}

fn http_date(t: SystemTime) -> String {
    DateTime::<Utc>::from(t).format(HTTP_DATE_FORMAT).to_string()
}

fn parse_http_date(s: &str) -> Option<SystemTime> {
    NaiveDateTime::parse_from_str(s, HTTP_DATE_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive).into())
}

fn unix_seconds(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
