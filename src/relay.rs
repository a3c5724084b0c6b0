//! Reads client submissions off the rendezvous FIFO and forwards them to
//! the router.
//!
//! Grounded on the original relay's read-loop (`runRelay` in the reference
//! implementation), generalized from a raw byte-pipe reader to a
//! [`tokio_util::codec`] `FramedRead` over the request wire form.

use std::path::{Path, PathBuf};

use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;
use tracing::{info, instrument, warn};

use crate::types::update::Update;
use crate::wire::request_codec::Decoder;

/// Creates the rendezvous FIFO at `path` if it does not already exist.
/// Matches the reference server's `mkfifo(SERVER_NAME, 0660)` mode.
pub fn ensure_rendezvous(path: &Path) -> nix::Result<()> {
    match mkfifo(path, Mode::from_bits_truncate(0o660)) {
        Ok(()) => Ok(()),
        Err(nix::errno::Errno::EEXIST) => Ok(()),
        Err(err) => Err(err),
    }
}

/// Opens `rendezvous` for reading and relays every decoded request to
/// `updates` until the writing side closes, at which point it emits
/// [`Update::ServerDisconnected`] and returns.
///
/// Uses `tokio::net::unix::pipe`'s receiver rather than `tokio::fs::File`,
/// so the open itself never blocks waiting for a writer to attach, and the
/// read end stays live across any number of clients opening and closing
/// the FIFO in turn.
#[instrument(skip(updates))]
pub async fn run(rendezvous: PathBuf, updates: mpsc::UnboundedSender<Update>) -> std::io::Result<()> {
    let reader = tokio::net::unix::pipe::OpenOptions::new().open_receiver(&rendezvous)?;

    let mut framed = FramedRead::new(reader, Decoder::default());

    while let Some(result) = framed.next().await {
        match result {
            Ok(request) => {
                info!("request received");
                if updates.send(Update::Request(request)).is_err() {
                    warn!("router channel closed while relay still active");
                    break;
                }
            }
            Err(err) => {
                warn!(error = %err, "dropping malformed request");
            }
        }
    }

    let _ = updates.send(Update::ServerDisconnected);
    info!("rendezvous closed, relay exiting");
    Ok(())
}
