use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{ALLOW, CONTENT_LENGTH, CONTENT_TYPE, ETAG, HOST, LAST_MODIFIED};
use axum::http::request::Parts;
use axum::http::{HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum_extra::headers::authorization::Basic;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;
use bytes::Bytes;
use duckcloud_fs::path;
use duckcloud_fs::spacefs::{Handle, OpenFlags, SpaceFs};
use duckcloud_fs::spaces::SpaceService;
use futures::StreamExt;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument};
use url::Url;

use crate::locks::{parse_if_header, LockDetails, LockError, LockGuard, LockSystem};
use crate::props::{content_type, etag, http_date, DeadProps};
use crate::sessions::{AuthError, SessionService};
use crate::{AppState, DavMethod, Error};

mod copy_move;
mod lock;
mod propfind;

pub use self::propfind::{walk, Visit};
pub(crate) use self::copy_move::MAX_COPY_RECURSION;

/// Largest XML body accepted by PROPFIND, PROPPATCH and LOCK.
const MAX_XML_BODY: usize = 1024 * 1024;

const ALLOW_MISSING: &str = "OPTIONS, LOCK, PUT, MKCOL";
const ALLOW_DIR: &str = "OPTIONS, LOCK, DELETE, PROPPATCH, COPY, MOVE, UNLOCK, PROPFIND";
const ALLOW_FILE: &str =
    "OPTIONS, LOCK, GET, HEAD, POST, DELETE, PROPPATCH, COPY, MOVE, UNLOCK, PROPFIND, PUT";

/// Characters escaped in hrefs.
const PATH_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

pub(crate) fn escape_path(p: &str) -> String {
    utf8_percent_encode(p, PATH_SET).to_string()
}

/// Whether the error means there's nothing at the requested path.
fn is_missing(e: &duckcloud_fs::Error) -> bool {
    e.is_not_found() || matches!(e, duckcloud_fs::Error::NotADirectory(_))
}

/// Everything a single request works with: the space of the authenticated
/// session, and its locks and dead properties.
pub(crate) struct Ctx {
    prefix: Arc<str>,
    fs: SpaceFs,
    locks: Arc<dyn LockSystem>,
    dead_props: Arc<DeadProps>,
    max_copy_depth: usize,
}

impl Ctx {
    /// Removes the mount prefix from an URL path. The prefix itself maps to
    /// an empty path.
    fn strip_prefix(&self, p: &str) -> Result<String, Error> {
        let decoded = percent_decode_str(p)
            .decode_utf8()
            .map_err(|_| Error::bad_request("invalid path encoding"))?;
        let p = path::clean(&decoded);

        if self.prefix.is_empty() {
            return Ok(p);
        }
        if p == *self.prefix {
            return Ok(String::new());
        }

        p.strip_prefix(&*self.prefix)
            .filter(|rest| rest.starts_with('/'))
            .map(ToOwned::to_owned)
            .ok_or_else(|| Error::new(StatusCode::NOT_FOUND, "prefix mismatch"))
    }

    /// The path inside the space the request is about.
    fn request_path(&self, parts: &Parts) -> Result<String, Error> {
        Ok(path::clean(&self.strip_prefix(parts.uri.path())?))
    }

    /// The escaped href of a path, directories end with a slash.
    fn href(&self, p: &str, is_dir: bool) -> String {
        let mut href = match p {
            "/" => self.prefix.to_string(),
            p => format!("{}{}", self.prefix, p),
        };
        if href.is_empty() {
            href.push('/');
        }
        if is_dir && href != "/" {
            href.push('/');
        }

        escape_path(&href)
    }

    /// Makes sure `src` and `dst` aren't locked by someone else for the
    /// duration of the request.
    ///
    /// Without an If header, temporary zero depth locks are taken so that
    /// concurrent lock holders are respected. With one, one of its lists
    /// must hold the locks covering both paths.
    fn confirm_locks(&self, parts: &Parts, src: &str, dst: &str) -> Result<LockGuard, Error> {
        let now = Instant::now();

        let Some(header) = parts.headers.get("If") else {
            let mut tokens = Vec::new();
            for name in [src, dst].into_iter().filter(|n| !n.is_empty()) {
                let details = LockDetails {
                    root: name.to_string(),
                    duration: None,
                    owner_xml: String::new(),
                    zero_depth: true,
                };

                match self.locks.create(now, details) {
                    Ok(token) => tokens.push(token),
                    Err(e) => {
                        drop(LockGuard::temporary(self.locks.clone(), tokens));
                        return Err(lock_error(e));
                    }
                }
            }

            return Ok(LockGuard::temporary(self.locks.clone(), tokens));
        };

        let lists = header
            .to_str()
            .ok()
            .and_then(parse_if_header)
            .ok_or_else(|| Error::bad_request("invalid If header"))?;

        for list in lists {
            let lsrc = if list.resource_tag.is_empty() {
                src.to_string()
            } else {
                let Ok(u) = Url::parse(&list.resource_tag) else {
                    continue;
                };
                if Some(url_host(&u).as_str()) != host(parts) {
                    continue;
                }
                path::clean(&self.strip_prefix(u.path())?)
            };

            match self.locks.confirm(now, &lsrc, dst, &list.tokens()) {
                Ok(held) => return Ok(LockGuard::held(self.locks.clone(), held)),
                Err(LockError::ConfirmationFailed) => continue,
                Err(e) => return Err(Error::internal(e.to_string())),
            }
        }

        Err(Error::new(
            StatusCode::PRECONDITION_FAILED,
            "no If list holds the locks",
        ))
    }
}

fn lock_error(e: LockError) -> Error {
    let status = match e {
        LockError::Locked => StatusCode::LOCKED,
        LockError::NoSuchLock | LockError::ConfirmationFailed => StatusCode::PRECONDITION_FAILED,
    };

    Error::new(status, e.to_string())
}

fn host(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| parts.uri.authority().map(|a| a.as_str()))
}

/// The host of an URL, with the port if any, as found in a Host header.
fn url_host(u: &Url) -> String {
    match (u.host_str(), u.port()) {
        (Some(h), Some(port)) => format!("{}:{}", h, port),
        (Some(h), None) => h.to_string(),
        (None, _) => String::new(),
    }
}

async fn read_body(body: Body) -> Result<Bytes, Error> {
    axum::body::to_bytes(body, MAX_XML_BODY)
        .await
        .map_err(|e| Error::bad_request(format!("failed to read body: {}", e)))
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(axum::http::header::WWW_AUTHENTICATE, r#"Basic realm="fs""#)],
        crate::errors::status_text(StatusCode::UNAUTHORIZED),
    )
        .into_response()
}

/// Entry point of every DAV request: authenticates the session, opens its
/// space and dispatches on the method.
pub async fn handle(
    State(state): State<AppState>,
    auth: Option<TypedHeader<Authorization<Basic>>>,
    request: Request,
) -> Response {
    let Some(TypedHeader(auth)) = auth else {
        return unauthorized();
    };

    let session = match state
        .sessions
        .authenticate(auth.username(), auth.password())
        .await
    {
        Ok(session) => session,
        Err(AuthError::InvalidCredentials) => {
            debug!(username = auth.username(), "invalid credentials");
            return unauthorized();
        }
        Err(e) => return Error::internal(e.to_string()).into_response(),
    };

    let space = match state
        .spaces
        .get_user_space(&session.user_id, &session.space_id)
        .await
    {
        Ok(space) => space,
        Err(e) => return Error::internal(format!("session space: {}", e)).into_response(),
    };

    let locks: Arc<dyn LockSystem> = state.locks.get(&space.id);
    let ctx = Ctx {
        prefix: state.prefix.clone(),
        locks,
        dead_props: state.dead_props.get(&space.id),
        fs: SpaceFs::new(space, state.inodes.clone(), state.blob_service.clone()),
        max_copy_depth: state.max_copy_depth,
    };

    let (parts, body) = request.into_parts();
    let Some(method) = DavMethod::from_http(&parts.method) else {
        return Error::status(StatusCode::METHOD_NOT_ALLOWED).into_response();
    };

    dispatch(&ctx, method, parts, body)
        .await
        .unwrap_or_else(IntoResponse::into_response)
}

#[instrument(skip_all, fields(dav.method = method.as_str(), dav.path = %parts.uri.path()))]
async fn dispatch(
    ctx: &Ctx,
    method: DavMethod,
    parts: Parts,
    body: Body,
) -> Result<Response, Error> {
    match method {
        DavMethod::Options => options(ctx, &parts).await,
        DavMethod::Get | DavMethod::Head | DavMethod::Post => {
            get_head_post(ctx, method, &parts).await
        }
        DavMethod::Delete => delete(ctx, &parts).await,
        DavMethod::Put => put(ctx, &parts, body).await,
        DavMethod::Mkcol => mkcol(ctx, &parts, body).await,
        DavMethod::Copy | DavMethod::Move => copy_move::copy_move(ctx, method, &parts).await,
        DavMethod::Lock => lock::lock(ctx, &parts, body).await,
        DavMethod::Unlock => lock::unlock(ctx, &parts),
        DavMethod::Propfind => propfind::propfind(ctx, &parts, body).await,
        DavMethod::Proppatch => propfind::proppatch(ctx, &parts, body).await,
    }
}

async fn options(ctx: &Ctx, parts: &Parts) -> Result<Response, Error> {
    let p = ctx.request_path(parts)?;

    let allow = match ctx.fs.get(&p).await {
        Ok(node) if node.is_dir() => ALLOW_DIR,
        Ok(_) => ALLOW_FILE,
        Err(e) if is_missing(&e) => ALLOW_MISSING,
        Err(e) => return Err(e.into()),
    };

    Ok((
        StatusCode::OK,
        [
            (ALLOW, allow),
            (HeaderName::from_static("dav"), "1, 2"),
            (HeaderName::from_static("ms-author-via"), "DAV"),
        ],
    )
        .into_response())
}

async fn get_head_post(ctx: &Ctx, method: DavMethod, parts: &Parts) -> Result<Response, Error> {
    let p = ctx.request_path(parts)?;

    let node = ctx
        .fs
        .get(&p)
        .await
        .map_err(|e| Error::from(e).with_status(StatusCode::NOT_FOUND))?;
    if node.is_dir() {
        return Err(Error::status(StatusCode::METHOD_NOT_ALLOWED));
    }

    let reader = ctx
        .fs
        .download(&node)
        .await
        .map_err(|e| Error::from(e).with_status(StatusCode::INTERNAL_SERVER_ERROR))?;

    let body = match method {
        DavMethod::Head => Body::empty(),
        _ => Body::from_stream(ReaderStream::new(reader)),
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(ETAG, etag(&node))
        .header(CONTENT_TYPE, content_type(&node))
        .header(CONTENT_LENGTH, node.size)
        .header(LAST_MODIFIED, http_date(&node.last_modified_at))
        .body(body)
        .map_err(|e| Error::internal(e.to_string()))
}

async fn delete(ctx: &Ctx, parts: &Parts) -> Result<Response, Error> {
    let p = ctx.request_path(parts)?;
    let _guard = ctx.confirm_locks(parts, &p, "")?;

    // remove_all succeeds on missing paths, DELETE must not.
    if let Err(e) = ctx.fs.get(&p).await {
        let status = if is_missing(&e) {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::METHOD_NOT_ALLOWED
        };
        return Err(Error::from(e).with_status(status));
    }

    ctx.fs
        .remove_all(&p)
        .await
        .map_err(|e| Error::from(e).with_status(StatusCode::METHOD_NOT_ALLOWED))?;
    ctx.dead_props.remove_tree(&p);

    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Status of a failed file write.
fn write_error(e: duckcloud_fs::Error) -> Error {
    let status = match &e {
        e if is_missing(e) => StatusCode::CONFLICT,
        duckcloud_fs::Error::IsADirectory(_) => StatusCode::METHOD_NOT_ALLOWED,
        duckcloud_fs::Error::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    Error::from(e).with_status(status)
}

async fn put(ctx: &Ctx, parts: &Parts, body: Body) -> Result<Response, Error> {
    let p = ctx.request_path(parts)?;
    let _guard = ctx.confirm_locks(parts, &p, "")?;

    let mut handle = ctx
        .fs
        .open_file(
            &p,
            OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNC,
        )
        .await
        .map_err(write_error)?;
    if let Handle::Directory(_) = handle {
        return Err(Error::status(StatusCode::METHOD_NOT_ALLOWED));
    }

    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| Error::bad_request(format!("failed to read body: {}", e)))?;
        handle.write(&chunk).await.map_err(write_error)?;
    }

    let node = handle
        .close()
        .await
        .map_err(write_error)?
        .ok_or_else(|| Error::internal("file closed without a node"))?;

    Ok((StatusCode::CREATED, [(ETAG, etag(&node))]).into_response())
}

async fn mkcol(ctx: &Ctx, parts: &Parts, body: Body) -> Result<Response, Error> {
    let p = ctx.request_path(parts)?;
    let _guard = ctx.confirm_locks(parts, &p, "")?;

    let body = axum::body::to_bytes(body, MAX_XML_BODY)
        .await
        .map_err(|e| Error::new(StatusCode::UNSUPPORTED_MEDIA_TYPE, e.to_string()))?;
    if !body.is_empty() {
        return Err(Error::status(StatusCode::UNSUPPORTED_MEDIA_TYPE));
    }

    match ctx.fs.get(&p).await {
        Ok(_) => return Err(Error::status(StatusCode::METHOD_NOT_ALLOWED)),
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e.into()),
    }

    let (dir, _) = path::split(&p);
    match ctx.fs.get(&dir).await {
        Ok(parent) if parent.is_dir() => {}
        Ok(_) => return Err(Error::new(StatusCode::CONFLICT, "parent is a file")),
        Err(e) if is_missing(&e) => return Err(Error::from(e).with_status(StatusCode::CONFLICT)),
        Err(e) => return Err(e.into()),
    }

    ctx.fs.create_dir(&p).await.map_err(|e| {
        let status = if is_missing(&e) {
            StatusCode::CONFLICT
        } else {
            StatusCode::METHOD_NOT_ALLOWED
        };
        Error::from(e).with_status(status)
    })?;

    Ok(StatusCode::CREATED.into_response())
}
