use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use duckcloud_dav::sessions::MemorySessionService;
use duckcloud_dav::AppState;
use duckcloud_fs::inodes::Inodes;
use duckcloud_fs::spaces::SpaceService;
use duckcloud_fs::tasks::{FileUploadTask, FsGcTask, FsMoveTask, FsRefreshSizeTask, TaskRunner};
use duckcloud_fs::{blobservice, nodestore, spaces, uploads};
use duckcloud_tracing::{LogFormat, TracingBuilder};
use tracing::{info, warn, Level};
use uuid::Uuid;

/// Serves the files of a space over WebDAV.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(long, env, default_value = "memory://")]
    node_service_addr: String,

    #[arg(long, env, default_value = "memory://")]
    blob_service_addr: String,

    #[arg(long, env, default_value = "memory://")]
    upload_service_addr: String,

    #[arg(long, env, default_value = "memory://")]
    space_service_addr: String,

    /// The path the WebDAV tree is served under.
    #[arg(long, env, default_value = "/dav")]
    prefix: String,

    /// Seconds between two runs of the background tasks.
    #[arg(long, env, default_value_t = 60)]
    gc_interval: u64,

    /// How many directory levels a COPY may descend.
    #[arg(long, env, default_value_t = 1000)]
    max_copy_depth: usize,

    #[arg(long, env)]
    log_level: Option<Level>,

    /// Whether to log in JSON
    #[arg(long, env)]
    json_logs: bool,

    #[arg(long, env, default_value = "admin")]
    bootstrap_user: String,

    #[arg(long, env)]
    bootstrap_password: String,

    #[arg(long, env, default_value = "My files")]
    bootstrap_space: String,

    /// The address to listen on.
    #[clap(flatten)]
    listen_args: tokio_listener::ListenerAddressLFlag,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    TracingBuilder::default()
        .level(cli.log_level.unwrap_or(Level::INFO))
        .format(if cli.json_logs {
            LogFormat::Json
        } else {
            LogFormat::Compact
        })
        .build()?;

    // initialize stores
    let inodes = Inodes::new(nodestore::from_addr(&cli.node_service_addr).await?);
    let blob_service = blobservice::from_addr(&cli.blob_service_addr).await?;
    let upload_service = uploads::from_addr(&cli.upload_service_addr).await?;

    let spaces = spaces::from_addr(&cli.space_service_addr, inodes.clone()).await?;
    let sessions = Arc::new(MemorySessionService::new());

    // Derived from the name, so the user finds its space again after a
    // restart.
    let user_id = Uuid::new_v5(&Uuid::NAMESPACE_OID, cli.bootstrap_user.as_bytes());
    let space = spaces.get_or_create(&user_id, &cli.bootstrap_space).await?;
    if let Err(e) = inodes.get_by_id(&space.root).await {
        warn!(err=%e, space.id=%space.id, "space root is missing from the node store");
    }
    sessions.create(&cli.bootstrap_user, &cli.bootstrap_password, user_id, space.id);
    info!(user=%cli.bootstrap_user, space.id=%space.id, "bootstrapped user space");

    let mut tasks = TaskRunner::default();
    tasks.register(Arc::new(FileUploadTask::new(
        inodes.clone(),
        blob_service.clone(),
        upload_service,
    )));
    tasks.register(Arc::new(FsGcTask::new(inodes.clone(), blob_service.clone())));
    tasks.register(Arc::new(FsMoveTask::new(inodes.clone(), spaces.clone())));
    tasks.register(Arc::new(FsRefreshSizeTask::new(inodes.clone())));

    let gc_interval = Duration::from_secs(cli.gc_interval.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(gc_interval);
        loop {
            ticker.tick().await;
            for name in ["file-upload", "fs-gc"] {
                // failures are logged by the runner, the next tick retries.
                let _ = tasks.run(name, serde_json::Value::Null).await;
            }
        }
    });

    let state = AppState::new(&cli.prefix, sessions, spaces, inodes, blob_service)
        .with_max_copy_depth(cli.max_copy_depth);
    let app = duckcloud_dav::gen_router().with_state(state);

    let listen_address = &cli.listen_args.listen_address.unwrap_or_else(|| {
        "[::]:8000"
            .parse()
            .expect("invalid fallback listen address")
    });

    let listener = tokio_listener::Listener::bind(
        listen_address,
        &Default::default(),
        &cli.listen_args.listener_options,
    )
    .await?;

    info!(listen_address=%listen_address, "starting daemon");

    tokio_listener::axum07::serve(
        listener,
        app.into_make_service_with_connect_info::<tokio_listener::SomeSocketAddrClonable>(),
    )
    .await?;

    Ok(())
}
