use std::time::Instant;

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::request::Parts;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use duckcloud_fs::spacefs::OpenFlags;
use tracing::{debug, instrument};

use super::{escape_path, is_missing, lock_error, read_body, Ctx};
use crate::locks::{parse_if_header, parse_timeout, LockDetails, LockError};
use crate::xml::{lock_discovery, read_lockinfo};
use crate::{Depth, Error};

#[instrument(skip_all, err(level = tracing::Level::DEBUG))]
pub(super) async fn lock(ctx: &Ctx, parts: &Parts, body: Body) -> Result<Response, Error> {
    let now = Instant::now();
    let duration = parse_timeout(
        parts
            .headers
            .get("Timeout")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default(),
    )?;
    let info = read_lockinfo(&read_body(body).await?)?;

    let mut created = false;
    let mut lock_token = None;
    let (token, details) = match info {
        // An empty body refreshes the lock named in the If header.
        None => {
            let lists = parts
                .headers
                .get("If")
                .and_then(|v| v.to_str().ok())
                .and_then(parse_if_header)
                .ok_or_else(|| Error::bad_request("invalid If header"))?;

            let token = match lists.as_slice() {
                [list] if list.conditions.len() == 1 => list.conditions[0].token.clone(),
                _ => String::new(),
            };
            if token.is_empty() {
                return Err(Error::bad_request("bad lock token"));
            }

            let details = ctx
                .locks
                .refresh(now, &token, duration)
                .map_err(lock_error)?;
            (token, details)
        }
        Some(info) => {
            let depth = Depth::from_headers(&parts.headers, Depth::Infinity)?;
            if depth == Depth::One {
                return Err(Error::bad_request("LOCK depth must be 0 or infinity"));
            }

            let p = ctx.request_path(parts)?;
            let details = LockDetails {
                root: p.clone(),
                duration,
                owner_xml: info.owner_xml,
                zero_depth: depth == Depth::Zero,
            };
            let token = ctx
                .locks
                .create(now, details.clone())
                .map_err(lock_error)?;
            created = match create_missing(ctx, &p).await {
                Ok(created) => created,
                Err(e) => {
                    if let Err(err) = ctx.locks.unlock(now, &token) {
                        debug!(err=%err, lock.token=%token, "failed to drop new lock");
                    }
                    return Err(e);
                }
            };

            lock_token = Some(token.clone());
            (token, details)
        }
    };

    let root_href = escape_path(&format!("{}{}", ctx.prefix, details.root));
    let mut response = (
        if created {
            StatusCode::CREATED
        } else {
            StatusCode::OK
        },
        [(CONTENT_TYPE, "application/xml; charset=utf-8")],
        lock_discovery(&token, &details, &root_href),
    )
        .into_response();

    if let Some(token) = lock_token {
        let value = HeaderValue::from_str(&format!("<{}>", token))
            .map_err(|e| Error::internal(e.to_string()))?;
        response
            .headers_mut()
            .insert(HeaderName::from_static("lock-token"), value);
    }

    Ok(response)
}

/// Creates an empty file at `p` when nothing lives there yet. Returns
/// whether it did.
async fn create_missing(ctx: &Ctx, p: &str) -> Result<bool, Error> {
    match ctx.fs.get(p).await {
        Ok(_) => Ok(false),
        Err(e) if is_missing(&e) => {
            let handle = ctx
                .fs
                .open_file(p, OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNC)
                .await
                .map_err(|e| Error::internal(e.to_string()))?;
            handle
                .close()
                .await
                .map_err(|e| Error::internal(e.to_string()))?;
            Ok(true)
        }
        Err(e) => Err(Error::internal(e.to_string())),
    }
}

pub(super) fn unlock(ctx: &Ctx, parts: &Parts) -> Result<Response, Error> {
    let token = parts
        .headers
        .get("Lock-Token")
        .and_then(|v| v.to_str().ok())
        .and_then(|t| t.strip_prefix('<'))
        .and_then(|t| t.strip_suffix('>'))
        .ok_or_else(|| Error::bad_request("bad lock token"))?;

    match ctx.locks.unlock(Instant::now(), token) {
        Ok(()) => Ok(StatusCode::NO_CONTENT.into_response()),
        Err(LockError::Locked) => Err(Error::status(StatusCode::LOCKED)),
        Err(e @ LockError::NoSuchLock) => {
            debug!(lock.token = token, "unknown lock");
            Err(Error::new(StatusCode::CONFLICT, e.to_string()))
        }
        Err(e) => Err(Error::internal(e.to_string())),
    }
}
