//! Per-request process-chain execution, one task per admitted request.
//!
//! Grounded on the original job handler's child-process chaining
//! (`runJobHandler` in the reference implementation), generalized to run as
//! a tokio task rather than a forked process, and to report a per-operation
//! success vector on failure rather than silently leaking router slots.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};

use crate::types::request::SeqNo;
use crate::types::update::Update;

/// A readable byte source usable as the stdin of the next stage in the
/// chain: either the request's input file (stage 0) or the buffered stdout
/// of the previous stage's child (every later stage).
type Stage = Box<dyn AsyncRead + Unpin + Send>;

/// Runs the transformation chain for one admitted request and reports its
/// outcome back to the router over `updates`.
///
/// `op_names` and `op_indices` are 1:1 aligned (duplicates included, per the
/// request's original pipeline); `bin_path` is the directory containing one
/// executable per transformation name.
#[instrument(skip(op_names, op_indices, updates), fields(seq = %seq, steps = op_names.len()))]
pub async fn run(
    seq: SeqNo,
    input: PathBuf,
    output: PathBuf,
    op_names: Vec<String>,
    op_indices: Vec<usize>,
    bin_path: PathBuf,
    updates: mpsc::UnboundedSender<Update>,
) {
    let mut op_success = vec![false; op_names.len()];

    let mut stage: Stage = match File::open(&input).await {
        Ok(file) => Box::new(file),
        Err(err) => {
            error!(error = %err, path = %input.display(), "failed to open request input");
            let _ = updates.send(Update::RequestFinished { seq, op_success });
            return;
        }
    };

    for (k, name) in op_names.iter().enumerate() {
        let is_last = k + 1 == op_names.len();
        let exe = binary_path(&bin_path, name);

        let mut child = match Command::new(&exe)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(err) => {
                error!(error = %err, operation = %name, "failed to spawn transformation");
                break;
            }
        };

        let mut child_stdin = child.stdin.take().expect("stdin was piped");
        let mut child_stdout = child.stdout.take().expect("stdout was piped");

        let copy_in = tokio::io::copy(&mut stage, &mut child_stdin);
        let read_out_buf = tokio::task::spawn(async move {
            let mut buf = Vec::new();
            child_stdout.read_to_end(&mut buf).await.map(|_| buf)
        });

        let copy_result = copy_in.await;
        drop(child_stdin);
        if let Err(err) = copy_result {
            warn!(error = %err, operation = %name, "failed writing stage input");
        }

        let (wait_result, read_result) = tokio::join!(child.wait(), read_out_buf);
        let exited_ok = matches!(&wait_result, Ok(status) if status.success());

        if !exited_ok {
            match &wait_result {
                Err(err) => error!(error = %err, operation = %name, "failed to await transformation"),
                Ok(status) => warn!(operation = %name, %status, "transformation exited non-zero"),
            }
            break;
        }

        let out_buf = match read_result {
            Ok(Ok(buf)) => buf,
            Ok(Err(err)) => {
                error!(error = %err, operation = %name, "failed to read transformation output");
                break;
            }
            Err(err) => {
                error!(error = %err, operation = %name, "stdout reader task panicked");
                break;
            }
        };

        op_success[k] = true;
        let _ = updates.send(Update::FinishedOp(op_indices[k]));

        if is_last {
            if let Err(err) = write_output(&output, &out_buf).await {
                error!(error = %err, path = %output.display(), "failed to write request output");
                op_success[k] = false;
            }
        } else {
            stage = Box::new(Cursor::new(out_buf));
        }
    }

    info!(success = op_success.iter().all(|&ok| ok), "request finished");
    let _ = updates.send(Update::RequestFinished { seq, op_success });
}

fn binary_path(bin_path: &Path, name: &str) -> PathBuf {
    bin_path.join(name)
}

async fn write_output(path: &Path, data: &[u8]) -> std::io::Result<()> {
    tokio::fs::write(path, data).await
}
