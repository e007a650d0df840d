//! HTTP surface: routes the compute server's resource tree onto the
//! shared [`crate::server::ServerState`].

use crate::server::chunkstate::ChunkState;
use crate::server::ServerState;
use gdalcube::prelude::Cube;
use gdalcube::{Error, Result};
use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tiny_http::{Header, Method, Request, Response};

static UPLOAD_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Dispatches one request to completion, logging and replying on
/// error rather than propagating — the server loop never aborts on a
/// single bad request.
pub fn handle(state: &ServerState, request: Request) {
    let method = request.method().clone();
    let url = request.url().to_string();
    let mut request = Some(request);
    let result = route(state, &mut request);
    if let Err(e) = result {
        let (code, body) = status_for(&e);
        log::warn!("{method} {url} -> {code}: {e}");
        if let Some(request) = request.take() {
            let _ = request.respond(Response::from_string(body).with_status_code(code));
        }
    }
}

fn route(state: &ServerState, request: &mut Option<Request>) -> Result<()> {
    let (path, query) = split_url(request.as_ref().expect("request already consumed").url());
    let segments = relative_segments(state, &path)?;
    let method = request.as_ref().expect("request already consumed").method().clone();

    match (method, segments.as_slice()) {
        (Method::Get, ["version"]) => {
            let body = format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
            respond_text(request, 200, body)
        }
        (Method::Post, ["file"]) => handle_file_upload(state, request, &query),
        (Method::Head, ["file"]) => handle_file_head(state, request, &query),
        (Method::Post, ["cube"]) => handle_cube_create(state, request),
        (Method::Get, ["cube", id]) => handle_cube_describe(state, request, id),
        (Method::Post, ["cube", id, chunk, "start"]) => handle_chunk_start(state, request, id, chunk),
        (Method::Get, ["cube", id, chunk, "status"]) => handle_chunk_status(state, request, id, chunk),
        (Method::Get, ["cube", id, chunk, "download"]) => handle_chunk_download(state, request, id, chunk),
        _ => {
            respond_text(request, 404, "no such route".to_string())
        }
    }
}

fn relative_segments<'a>(state: &ServerState, path: &'a str) -> Result<Vec<&'a str>> {
    let trimmed = path
        .strip_prefix(state.base_path.as_str())
        .ok_or_else(|| Error::NotFound(format!("path '{path}' outside base path")))?;
    Ok(trimmed.split('/').filter(|s| !s.is_empty()).collect())
}

fn split_url(url: &str) -> (String, std::collections::HashMap<String, String>) {
    match url.split_once('?') {
        None => (url.to_string(), std::collections::HashMap::new()),
        Some((path, query)) => {
            let params = query
                .split('&')
                .filter_map(|pair| pair.split_once('='))
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            (path.to_string(), params)
        }
    }
}

fn respond_text(request: &mut Option<Request>, status: u16, body: String) -> Result<()> {
    let header = Header::from_bytes(&b"Content-Type"[..], &b"text/plain"[..]).unwrap();
    let response = Response::from_string(body).with_status_code(status).with_header(header);
    request.take().expect("request already consumed").respond(response).map_err(Error::from)
}

fn status_for(e: &Error) -> (u16, String) {
    let code = match e {
        Error::InvalidConfiguration(_) => 400,
        Error::InvalidState(_) => 400,
        Error::NotFound(_) => 404,
        Error::Conflict(_) => 409,
        Error::Io(_) => 500,
        Error::Other(_) => 500,
    };
    (code, e.to_string())
}

// --- /file -----------------------------------------------------------

fn handle_file_upload(
    state: &ServerState,
    request: &mut Option<Request>,
    query: &std::collections::HashMap<String, String>,
) -> Result<()> {
    let name = query.get("name").cloned().unwrap_or_else(generate_file_name);
    let path = state.workdir.join(&name);

    let content_length = request.as_ref().expect("request already consumed").body_length();

    if path.exists() {
        let existing_len = std::fs::metadata(&path)?.len();
        return match content_length {
            Some(len) if len as u64 == existing_len => respond_text(request, 200, path.display().to_string()),
            _ => respond_text(request, 409, "file exists with different size".to_string()),
        };
    }

    let mut file = std::fs::File::create(&path)?;
    std::io::copy(&mut request.as_mut().expect("request already consumed").as_reader(), &mut file)?;
    respond_text(request, 200, path.display().to_string())
}

fn handle_file_head(
    state: &ServerState,
    request: &mut Option<Request>,
    query: &std::collections::HashMap<String, String>,
) -> Result<()> {
    let name = match query.get("name") {
        Some(n) => n,
        None => return respond_text(request, 400, "missing name".to_string()),
    };
    let path = state.workdir.join(name);
    if !path.exists() {
        return respond_text(request, 204, String::new());
    }
    let existing_len = std::fs::metadata(&path)?.len();
    match query.get("size").and_then(|s| s.parse::<u64>().ok()) {
        Some(size) if size == existing_len => respond_text(request, 200, String::new()),
        _ => respond_text(request, 409, String::new()),
    }
}

fn generate_file_name() -> String {
    let n = UPLOAD_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("upload-{}-{n}", std::process::id())
}

// --- /cube -------------------------------------------------------------

fn handle_cube_create(state: &ServerState, request: &mut Option<Request>) -> Result<()> {
    let mut body = String::new();
    request.as_mut().expect("request already consumed").as_reader().read_to_string(&mut body)?;
    let json: serde_json::Value = serde_json::from_str(&body)?;

    let cube = gdalcube::factory::create_from_json(&json, &state.factory_ctx)?;
    let id = state.registry.insert(cube);
    respond_text(request, 200, id.to_string())
}

fn handle_cube_describe(state: &ServerState, request: &mut Option<Request>, id: &str) -> Result<()> {
    let cube = lookup_cube(state, id)?;
    let json = cube.make_constructible_json();
    let header = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).unwrap();
    let response = Response::from_string(json.to_string()).with_header(header);
    request.take().expect("request already consumed").respond(response).map_err(Error::from)
}

fn lookup_cube(state: &ServerState, id: &str) -> Result<std::sync::Arc<dyn Cube>> {
    let id: u32 = id.parse().map_err(|_| Error::NotFound(format!("bad cube id '{id}'")))?;
    state.registry.get(id).ok_or_else(|| Error::NotFound(format!("no cube {id}")))
}

fn chunk_key(state: &ServerState, id: &str, chunk: &str) -> Result<(u32, u64, std::sync::Arc<dyn Cube>)> {
    let cube = lookup_cube(state, id)?;
    let chunk_id: u64 = chunk.parse().map_err(|_| Error::NotFound(format!("bad chunk id '{chunk}'")))?;
    if chunk_id >= cube.count_chunks() {
        return Err(Error::NotFound(format!("chunk {chunk_id} out of range")));
    }
    let cube_id: u32 = id.parse().unwrap();
    Ok((cube_id, chunk_id, cube))
}

fn handle_chunk_start(state: &ServerState, request: &mut Option<Request>, id: &str, chunk: &str) -> Result<()> {
    let (cube_id, chunk_id, _cube) = chunk_key(state, id, chunk)?;
    state.workers.start((cube_id, chunk_id));
    respond_text(request, 200, String::new())
}

fn handle_chunk_status(state: &ServerState, request: &mut Option<Request>, id: &str, chunk: &str) -> Result<()> {
    let (cube_id, chunk_id, _cube) = chunk_key(state, id, chunk)?;
    let status = state.states.status((cube_id, chunk_id)).as_status_str();
    respond_text(request, 200, status.to_string())
}

fn handle_chunk_download(state: &ServerState, request: &mut Option<Request>, id: &str, chunk: &str) -> Result<()> {
    let (cube_id, chunk_id, _cube) = chunk_key(state, id, chunk)?;
    let key = (cube_id, chunk_id);

    // spec.md's HTTP surface documents this one case as a plain 404
    // rather than the generic 4xx an invalid-state error would map
    // to, so it is handled directly instead of via `status_for`.
    if matches!(state.states.status(key), ChunkState::NotRequested) {
        return respond_text(request, 404, format!("chunk {chunk_id} of cube {cube_id} was never requested"));
    }

    match state.states.wait_until_done(key) {
        None => respond_text(request, 404, format!("chunk {chunk_id} of cube {cube_id} was never requested")),
        Some(ChunkState::Failed(msg)) => Err(Error::Io(format!("chunk computation failed: {msg}"))),
        Some(_) => {
            let buffer = state.cache.get(key).ok_or_else(|| {
                Error::Other(anyhow::anyhow!("chunk finished but missing from cache"))
            })?;
            let body = encode_chunk(&buffer);
            let header = Header::from_bytes(&b"Content-Type"[..], &b"application/octet-stream"[..]).unwrap();
            let response = Response::from_data(body).with_header(header);
            request.take().expect("request already consumed").respond(response).map_err(Error::from)
        }
    }
}

/// 16-byte header of four little-endian `u32`s `(B, T, Y, X)`
/// followed by the buffer's values as little-endian `f64`s in the
/// same `[bands][t][y][x]` order used internally.
fn encode_chunk(buffer: &gdalcube::chunkbuf::ChunkBuffer) -> Vec<u8> {
    let (b, t, y, x) = buffer.size();
    let mut out = Vec::with_capacity(16 + buffer.total_size_bytes() as usize);
    for dim in [b, t, y, x] {
        out.extend_from_slice(&dim.to_le_bytes());
    }
    if let Some(slice) = buffer.as_slice() {
        for v in slice {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
    out
}

pub fn upload_dir(path: &PathBuf) -> std::io::Result<()> {
    std::fs::create_dir_all(path)
}
