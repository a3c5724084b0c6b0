mod args;

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn, Level};

use xformd::error::ConfigError;
use xformd::relay;
use xformd::router::{ClientReply, Dispatch, Router, RouterEffects};
use xformd::types::catalog::Catalog;
use xformd::types::update::Update;
use xformd::{manager, router};

use crate::args::Args;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if args.debug {
        tracing_subscriber::fmt().with_max_level(Level::TRACE).init();
    } else {
        tracing_subscriber::fmt().json().init();
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "xformd exited with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let catalog = load_catalog(&args.config)?;
    info!(transformations = catalog.len(), "configuration loaded");

    relay::ensure_rendezvous(&args.rendezvous)
        .with_context(|| format!("failed to create rendezvous FIFO at {}", args.rendezvous.display()))?;

    let (updates_tx, updates_rx) = mpsc::unbounded_channel::<Update>();

    let relay_updates = updates_tx.clone();
    let rendezvous = args.rendezvous.clone();
    let relay_handle = tokio::spawn(async move {
        if let Err(err) = relay::run(rendezvous, relay_updates).await {
            error!(error = %err, "relay exited with an error");
        }
    });

    let router = Router::new(
        catalog,
        xformd::router::sorter::DEFAULT_QUEUE_CAPACITY,
        args.max_concurrent_jobs,
    );
    let bin_path = args.bin_path.clone();
    let manager_updates = updates_tx.clone();

    let mut sink = ReplySink::new();
    router::run(router, updates_rx, |effects: RouterEffects| {
        dispatch_effects(effects, &mut sink, &bin_path, manager_updates.clone());
    })
    .await;

    relay_handle.await.context("relay task panicked")?;
    info!("xformd exiting");
    Ok(())
}

fn load_catalog(path: &std::path::Path) -> Result<Catalog> {
    Catalog::load(path).map_err(|err: ConfigError| {
        anyhow::anyhow!(err).context(format!("failed to load configuration from {}", path.display()))
    })
}

fn dispatch_effects(
    effects: RouterEffects,
    sink: &mut ReplySink,
    bin_path: &std::path::Path,
    updates: mpsc::UnboundedSender<Update>,
) {
    for reply in effects.replies {
        sink.send(reply);
    }

    if let Some(dispatch) = effects.dispatch {
        spawn_manager(dispatch, bin_path.to_path_buf(), updates);
    }
}

fn spawn_manager(dispatch: Dispatch, bin_path: PathBuf, updates: mpsc::UnboundedSender<Update>) {
    tokio::spawn(async move {
        manager::run(
            dispatch.seq,
            dispatch.input,
            dispatch.output,
            dispatch.op_names,
            dispatch.op_indices,
            bin_path,
            updates,
        )
        .await;
    });
}

/// Routes [`ClientReply`] values to a per-client writer task, opening each
/// reply FIFO once and keeping it open across a request's Pending,
/// Processing, and terminal messages. FIFO writes
/// being message-atomic up to `PIPE_BUF`.
struct ReplySink {
    writers: HashMap<PathBuf, mpsc::UnboundedSender<(String, bool)>>,
}

impl ReplySink {
    fn new() -> Self {
        ReplySink {
            writers: HashMap::new(),
        }
    }

    fn send(&mut self, reply: ClientReply) {
        let terminal = reply.terminal;
        let tx = self
            .writers
            .entry(reply.reply_path.clone())
            .or_insert_with(|| spawn_reply_writer(reply.reply_path.clone()));

        if tx.send((reply.message, terminal)).is_err() {
            warn!(path = %reply.reply_path.display(), "reply writer task is gone");
        }

        if terminal {
            self.writers.remove(&reply.reply_path);
        }
    }
}

fn spawn_reply_writer(path: PathBuf) -> mpsc::UnboundedSender<(String, bool)> {
    let (tx, mut rx) = mpsc::unbounded_channel::<(String, bool)>();

    tokio::spawn(async move {
        let open_path = path.clone();
        let file = match tokio::task::spawn_blocking(move || {
            std::fs::OpenOptions::new().write(true).open(&open_path)
        })
        .await
        {
            Ok(Ok(file)) => file,
            Ok(Err(err)) => {
                error!(error = %err, path = %path.display(), "failed to open client reply FIFO");
                return;
            }
            Err(err) => {
                error!(error = %err, "reply writer open task panicked");
                return;
            }
        };

        let mut file = file;
        while let Some((message, terminal)) = rx.recv().await {
            let mut payload = message.into_bytes();
            payload.push(0);

            let result = tokio::task::spawn_blocking(move || file.write_all(&payload).map(|_| file)).await;
            match result {
                Ok(Ok(returned)) => file = returned,
                Ok(Err(err)) => {
                    error!(error = %err, path = %path.display(), "failed writing client reply");
                    break;
                }
                Err(err) => {
                    error!(error = %err, "reply writer task panicked");
                    break;
                }
            }

            if terminal {
                break;
            }
        }
    });

    tx
}
