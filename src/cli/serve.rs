//! `serve` command: answer `/<workflow>/<version>/<name>` from the engine.
//!
//! The version segment is optional and only busts browser caches; the
//! engine always serves the current nut. Numeric first path segments are
//! reserved for it, so a nut name never collides with a version.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::{Result, anyhow};
use percent_encoding::percent_decode_str;
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};

use assetflow::nut::Nut;
use assetflow::scheduler::{ExecutionContext, ThreadPoolContext};
use assetflow::{Engine, EngineError, debug, log};

use super::{is_shutdown, register_server};

/// Maximum number of port binding attempts.
const MAX_PORT_RETRIES: u16 = 10;

const PLAIN: &str = "text/plain; charset=utf-8";

/// A parsed request path.
#[derive(Debug, PartialEq, Eq)]
pub struct Route {
    pub workflow: String,
    pub version: Option<u64>,
    pub name: String,
}

/// Split a request URL into workflow, optional version and nut name.
pub fn parse_route(url: &str) -> Option<Route> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let decoded = percent_decode_str(path).decode_utf8().ok()?;
    let trimmed = decoded.trim_matches('/');
    if trimmed.split('/').any(|s| s == "..") {
        return None;
    }

    let numeric = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    let (workflow, rest) = trimmed.split_once('/')?;
    let (version, name) = match rest.split_once('/') {
        Some((first, name)) if numeric(first) => (Some(first.parse().ok()?), name),
        _ if numeric(rest) => return None,
        _ => (None, rest),
    };
    if workflow.is_empty() || name.is_empty() {
        return None;
    }
    Some(Route {
        workflow: workflow.to_string(),
        version,
        name: name.to_string(),
    })
}

/// Bind to the specified interface and port, with automatic port retry.
pub fn bind_with_retry(interface: IpAddr, base_port: u16) -> Result<(Server, SocketAddr)> {
    let mut last_error = None;
    for offset in 0..MAX_PORT_RETRIES {
        let port = base_port.saturating_add(offset);
        let addr = SocketAddr::new(interface, port);
        match Server::http(addr) {
            Ok(server) => {
                if offset > 0 {
                    log!("serve"; "port {} in use, using {} instead", base_port, port);
                }
                return Ok((server, addr));
            }
            Err(e) => last_error = Some(e),
        }
    }
    Err(anyhow!(
        "Failed to bind after {} attempts (ports {}-{}): {}",
        MAX_PORT_RETRIES,
        base_port,
        base_port.saturating_add(MAX_PORT_RETRIES - 1),
        last_error.map(|e| e.to_string()).unwrap_or_default()
    ))
}

/// Serve until Ctrl+C.
pub fn serve(engine: Arc<Engine>, interface: IpAddr, port: u16) -> Result<()> {
    let (server, addr) = bind_with_retry(interface, port)?;
    let server = Arc::new(server);
    register_server(Arc::clone(&server));
    log!("serve"; "http://{}", addr);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(4)
        .build()
        .map_err(|e| anyhow!("failed to create thread pool: {e}"))?;

    for request in server.incoming_requests() {
        let engine = Arc::clone(&engine);
        pool.spawn(move || {
            if let Err(e) = handle_request(request, &engine) {
                log!("serve"; "request error: {e}");
            }
        });
    }
    Ok(())
}

fn handle_request(request: Request, engine: &Engine) -> Result<()> {
    if is_shutdown() {
        return send_body(request, 503, PLAIN, b"503 Service Unavailable".to_vec());
    }
    if !matches!(request.method(), Method::Get | Method::Head) {
        return send_body(request, 405, PLAIN, b"405 Method Not Allowed".to_vec());
    }

    let Some(route) = parse_route(request.url()) else {
        return send_body(request, 404, PLAIN, b"404 Not Found".to_vec());
    };

    let context: Arc<dyn ExecutionContext> = Arc::new(ThreadPoolContext);
    let nut = match engine.run_one(&route.workflow, &route.name, context) {
        Ok(nut) => nut,
        Err(e) if e.is_not_found() => {
            debug!("serve"; "{}: {e}", request.url());
            return send_body(request, 404, PLAIN, format!("404 {e}").into_bytes());
        }
        Err(e) => return respond_error(request, &e),
    };
    if let Some(requested) = route.version
        && nut.version().ok() != Some(requested)
    {
        debug!("serve"; "{} requested at stale version {requested}", route.name);
    }

    let execution = match nut.transform() {
        Ok(execution) => execution,
        Err(e) => return respond_error(request, &e),
    };
    let length = execution.content_length();
    let headers = content_headers(&nut)?;

    if request.method() == &Method::Head {
        let mut response = Response::empty(StatusCode(200))
            .with_header(make_header("Content-Length", &length.to_string())?);
        for header in headers {
            response.add_header(header);
        }
        request.respond(response)?;
        return Ok(());
    }

    let response = Response::new(StatusCode(200), headers, execution.as_bytes(), Some(length), None);
    request.respond(response)?;
    Ok(())
}

/// Content type, plus the encoding of compressed nuts.
///
/// The encoding is sent whatever the client's `Accept-Encoding`.
pub fn content_headers(nut: &Nut) -> Result<Vec<Header>> {
    let mut headers = vec![make_header("Content-Type", nut.nut_type().mime_type())?];
    if let Some(encoding) = nut.content_encoding() {
        headers.push(make_header("Content-Encoding", encoding)?);
    }
    Ok(headers)
}

fn respond_error(request: Request, error: &EngineError) -> Result<()> {
    log!("error"; "{}: {error}", request.url());
    send_body(request, 500, PLAIN, format!("500 {error}").into_bytes())
}

fn send_body(request: Request, status: u16, content_type: &str, body: Vec<u8>) -> Result<()> {
    let response = Response::from_data(body)
        .with_status_code(StatusCode(status))
        .with_header(make_header("Content-Type", content_type)?);
    request.respond(response)?;
    Ok(())
}

fn make_header(key: &str, value: &str) -> Result<Header> {
    Header::from_bytes(key, value).map_err(|()| anyhow!("invalid header {key}: {value}"))
}
