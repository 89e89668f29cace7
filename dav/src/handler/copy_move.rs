use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use duckcloud_fs::{path, Node};
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::instrument;
use url::Url;

use super::{host, is_missing, url_host, Ctx};
use crate::{DavMethod, Depth, Error};

/// How deep a COPY may recurse before giving up, unless configured
/// otherwise.
pub(crate) const MAX_COPY_RECURSION: usize = 1000;

/// Children fetched per page while copying a directory.
const COPY_PAGE_SIZE: usize = 100;

/// Resolves the Destination header to a path inside the space.
fn destination(ctx: &Ctx, parts: &Parts) -> Result<String, Error> {
    let header = parts
        .headers
        .get("Destination")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::bad_request("missing Destination header"))?;

    let dst_path = if header.starts_with('/') {
        header.split(['?', '#']).next().unwrap_or_default().to_string()
    } else {
        let u = Url::parse(header).map_err(|e| Error::bad_request(e.to_string()))?;
        if Some(url_host(&u).as_str()) != host(parts) {
            return Err(Error::new(
                StatusCode::BAD_GATEWAY,
                "destination on another host",
            ));
        }
        u.path().to_string()
    };

    let dst = ctx.strip_prefix(&dst_path)?;
    if dst.is_empty() {
        return Err(Error::new(StatusCode::BAD_GATEWAY, "empty destination"));
    }

    Ok(path::clean(&dst))
}

fn overwrite(parts: &Parts) -> bool {
    parts
        .headers
        .get("Overwrite")
        .map_or(true, |v| !v.as_bytes().eq_ignore_ascii_case(b"F"))
}

fn is_within(p: &str, root: &str) -> bool {
    root == "/" || p == root || p.starts_with(&format!("{}/", root))
}

pub(super) async fn copy_move(
    ctx: &Ctx,
    method: DavMethod,
    parts: &Parts,
) -> Result<Response, Error> {
    let src = ctx.request_path(parts)?;
    let dst = destination(ctx, parts)?;

    if src == dst {
        return Err(Error::new(StatusCode::FORBIDDEN, "source is destination"));
    }

    let node = match ctx.fs.get(&src).await {
        Ok(node) => node,
        Err(e) if is_missing(&e) => return Err(Error::from(e).with_status(StatusCode::CONFLICT)),
        Err(e) => return Err(e.into()),
    };

    let status = match method {
        DavMethod::Copy => {
            let _guard = ctx.confirm_locks(parts, "", &dst)?;

            let depth = Depth::from_headers(&parts.headers, Depth::Infinity)?;
            if depth == Depth::One {
                return Err(Error::bad_request("COPY depth must be 0 or infinity"));
            }

            let status = copy_files(ctx, src.clone(), dst.clone(), overwrite(parts), depth, 0).await?;
            ctx.dead_props.copy_tree(&src, &dst);
            status
        }
        _ => {
            let _guard = ctx.confirm_locks(parts, &src, &dst)?;

            if parts.headers.contains_key("Depth")
                && Depth::from_headers(&parts.headers, Depth::Infinity)? != Depth::Infinity
            {
                return Err(Error::bad_request("MOVE depth must be infinity"));
            }

            let status = move_files(ctx, &node, &src, &dst, overwrite(parts)).await?;
            ctx.dead_props.move_tree(&src, &dst);
            status
        }
    };

    Ok(status.into_response())
}

/// Clears `dst` for a new node. Returns whether it was free.
async fn clear_destination(ctx: &Ctx, dst: &str, overwrite: bool) -> Result<bool, Error> {
    match ctx.fs.get(dst).await {
        Ok(_) if !overwrite => Err(Error::new(
            StatusCode::PRECONDITION_FAILED,
            "destination exists",
        )),
        Ok(_) => {
            ctx.fs
                .remove_all(dst)
                .await
                .map_err(|e| Error::from(e).with_status(StatusCode::FORBIDDEN))?;
            Ok(false)
        }
        Err(e) if is_missing(&e) => Ok(true),
        Err(e) => Err(Error::from(e).with_status(StatusCode::FORBIDDEN)),
    }
}

fn created_status(created: bool) -> StatusCode {
    if created {
        StatusCode::CREATED
    } else {
        StatusCode::NO_CONTENT
    }
}

#[instrument(skip(ctx, node), fields(node.id=%node.id), err(level = tracing::Level::DEBUG))]
async fn move_files(
    ctx: &Ctx,
    node: &Node,
    src: &str,
    dst: &str,
    overwrite: bool,
) -> Result<StatusCode, Error> {
    if node.is_dir() && is_within(dst, src) {
        return Err(Error::new(
            StatusCode::FORBIDDEN,
            "cannot move a collection into itself",
        ));
    }

    let (dir, _) = path::split(dst);
    match ctx.fs.get(&dir).await {
        Ok(parent) if parent.is_dir() => {}
        Ok(_) => return Err(Error::new(StatusCode::CONFLICT, "destination parent is a file")),
        Err(e) if is_missing(&e) => return Err(Error::from(e).with_status(StatusCode::CONFLICT)),
        Err(e) => return Err(e.into()),
    }

    let created = match ctx.fs.get(dst).await {
        Ok(_) if !overwrite => {
            return Err(Error::new(
                StatusCode::PRECONDITION_FAILED,
                "destination exists",
            ))
        }
        Ok(_) => false,
        Err(e) if is_missing(&e) => true,
        Err(e) => return Err(Error::from(e).with_status(StatusCode::FORBIDDEN)),
    };

    // move_to clears the destination itself.
    ctx.fs
        .move_to(node, dst)
        .await
        .map_err(|e| Error::from(e).with_status(StatusCode::FORBIDDEN))?;

    Ok(created_status(created))
}

/// Copies the node at `src` to `dst`, descending into directories when
/// `depth` is infinity.
fn copy_files<'a>(
    ctx: &'a Ctx,
    src: String,
    dst: String,
    overwrite: bool,
    depth: Depth,
    recursion: usize,
) -> BoxFuture<'a, Result<StatusCode, Error>> {
    async move {
        let recursion = recursion + 1;
        if recursion > ctx.max_copy_depth {
            return Err(Error::internal("copy recursion too deep"));
        }

        let node = match ctx.fs.get(&src).await {
            Ok(node) => node,
            Err(e) if is_missing(&e) => {
                return Err(Error::from(e).with_status(StatusCode::NOT_FOUND))
            }
            Err(e) => return Err(Error::internal(e.to_string())),
        };

        let created = clear_destination(ctx, &dst, overwrite).await?;

        if node.is_dir() {
            ctx.fs.create_dir(&dst).await.map_err(|e| {
                let status = if is_missing(&e) {
                    StatusCode::CONFLICT
                } else {
                    StatusCode::FORBIDDEN
                };
                Error::from(e).with_status(status)
            })?;

            if depth == Depth::Infinity {
                let mut cursor: Option<String> = None;
                loop {
                    let page = ctx
                        .fs
                        .list_children(&node, cursor.as_deref(), COPY_PAGE_SIZE)
                        .await
                        .map_err(|e| Error::from(e).with_status(StatusCode::FORBIDDEN))?;

                    for child in &page {
                        copy_files(
                            ctx,
                            path::join(&src, &child.name),
                            path::join(&dst, &child.name),
                            overwrite,
                            depth,
                            recursion,
                        )
                        .await?;
                    }

                    match page.last() {
                        Some(last) if page.len() == COPY_PAGE_SIZE => {
                            cursor = Some(last.name.clone())
                        }
                        _ => break,
                    }
                }
            }
        } else {
            copy_file(ctx, &node, &dst).await?;
        }

        Ok(created_status(created))
    }
    .boxed()
}

async fn copy_file(ctx: &Ctx, node: &Node, dst: &str) -> Result<(), Error> {
    let to_error = |e: duckcloud_fs::Error| {
        let status = if is_missing(&e) {
            StatusCode::CONFLICT
        } else {
            StatusCode::FORBIDDEN
        };
        Error::from(e).with_status(status)
    };

    let reader = ctx.fs.download(node).await.map_err(to_error)?;
    ctx.fs.upload(dst, reader).await.map_err(to_error)?;

    Ok(())
}
