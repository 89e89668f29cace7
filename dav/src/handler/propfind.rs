use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use duckcloud_fs::spacefs::SpaceFs;
use duckcloud_fs::{path, Node};
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::instrument;

use super::{is_missing, read_body, Ctx};
use crate::props::Resource;
use crate::xml::{read_propfind, read_proppatch, MultiStatus, Propfind, Property, Propstat};
use crate::{Depth, Error};

/// Children fetched per page while walking a directory.
const WALK_PAGE_SIZE: usize = 100;

/// What a [walk] visitor wants next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visit {
    Continue,
    /// Don't descend into the visited directory, the rest of the walk goes
    /// on.
    SkipSubtree,
}

/// Visits `node`, found at `p`, and its descendants up to `depth`.
///
/// Any visitor error stops the whole walk.
pub fn walk<'a, F>(
    fs: &'a SpaceFs,
    p: String,
    node: Node,
    depth: Depth,
    visit: &'a mut F,
) -> BoxFuture<'a, Result<(), Error>>
where
    F: FnMut(&str, &Node) -> Result<Visit, Error> + Send,
{
    async move {
        if visit(&p, &node)? == Visit::SkipSubtree || !node.is_dir() {
            return Ok(());
        }
        let Some(depth) = depth.descend() else {
            return Ok(());
        };

        let mut cursor: Option<String> = None;
        loop {
            let page = fs
                .list_children(&node, cursor.as_deref(), WALK_PAGE_SIZE)
                .await
                .map_err(|e| Error::internal(e.to_string()))?;
            let last_page = page.len() < WALK_PAGE_SIZE;
            cursor = page.last().map(|n| n.name.clone());

            for child in page {
                walk(fs, path::join(&p, &child.name), child, depth, &mut *visit).await?;
            }

            if last_page {
                return Ok(());
            }
        }
    }
    .boxed()
}

fn multistatus(body: String) -> Response {
    (
        StatusCode::MULTI_STATUS,
        [(CONTENT_TYPE, "text/xml; charset=utf-8")],
        Body::from(body),
    )
        .into_response()
}

/// Looks up the target of a property request.
async fn target(ctx: &Ctx, p: &str) -> Result<Node, Error> {
    ctx.fs.get(p).await.map_err(|e| {
        let status = if is_missing(&e) {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::METHOD_NOT_ALLOWED
        };
        Error::from(e).with_status(status)
    })
}

#[instrument(skip_all, err(level = tracing::Level::DEBUG))]
pub(super) async fn propfind(ctx: &Ctx, parts: &Parts, body: Body) -> Result<Response, Error> {
    let p = ctx.request_path(parts)?;
    let node = target(ctx, &p).await?;

    let depth = Depth::from_headers(&parts.headers, Depth::Infinity)?;
    let pf = read_propfind(&read_body(body).await?)?;

    let locks = ctx.locks.as_ref();
    let mut ms = MultiStatus::default();
    let mut visit = |p: &str, node: &Node| -> Result<Visit, Error> {
        let res = Resource {
            path: p,
            node,
            locks,
            prefix: &ctx.prefix,
        };
        let dead = ctx.dead_props.get(p);

        let pstats = match &pf {
            Propfind::PropName => {
                let mut ps = Propstat::new(StatusCode::OK);
                ps.props = res
                    .propnames(&dead)
                    .into_iter()
                    .map(Property::empty)
                    .collect();
                vec![ps]
            }
            Propfind::AllProp(include) => res.allprop(&dead, include),
            Propfind::Prop(names) => res.props(&dead, names),
        };

        ms.push(&ctx.href(p, node.is_dir()), &pstats);
        Ok(Visit::Continue)
    };

    walk(&ctx.fs, p, node, depth, &mut visit).await?;

    Ok(multistatus(ms.finish()))
}

#[instrument(skip_all, err(level = tracing::Level::DEBUG))]
pub(super) async fn proppatch(ctx: &Ctx, parts: &Parts, body: Body) -> Result<Response, Error> {
    let p = ctx.request_path(parts)?;
    let _guard = ctx.confirm_locks(parts, &p, "")?;
    let node = target(ctx, &p).await?;

    let patches = read_proppatch(&read_body(body).await?)?;
    let pstats = ctx.dead_props.patch(&p, &patches);

    let mut ms = MultiStatus::default();
    ms.push(&ctx.href(&p, node.is_dir()), &pstats);

    Ok(multistatus(ms.finish()))
}
