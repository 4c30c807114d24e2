//! Stdio control channel.
//!
//! The controller writes one [`WorkerCommand`] JSON line at a time and reads
//! exactly one [`WorkerReply`] line back. The first line the worker writes is
//! `ready`.

use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use beatcast_models::{WorkerCommand, WorkerReply};

use crate::error::WorkerResult;
use crate::status::StatusBoard;

/// Serve control commands until `shutdown` or end of input.
///
/// On an `artifact` command the published artifact is written to
/// `artifact_dir` and its path returned; the reader owns the file afterwards.
pub async fn serve<R, W>(
    board: StatusBoard,
    artifact_dir: PathBuf,
    reader: R,
    mut writer: W,
) -> WorkerResult<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    send(&mut writer, &WorkerReply::Ready { pid: std::process::id() }).await?;

    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<WorkerCommand>(line) {
            Ok(WorkerCommand::Status) => WorkerReply::Status {
                status: board.snapshot(),
            },
            Ok(WorkerCommand::Artifact) => artifact_reply(&board, &artifact_dir).await,
            Ok(WorkerCommand::Shutdown) => {
                info!("Shutdown requested by controller");
                return Ok(());
            }
            Err(e) => {
                warn!("Unrecognized control line: {}", e);
                WorkerReply::Error {
                    message: format!("unrecognized command: {}", e),
                }
            }
        };
        send(&mut writer, &reply).await?;
    }

    debug!("Control channel closed");
    Ok(())
}

async fn artifact_reply(board: &StatusBoard, artifact_dir: &Path) -> WorkerReply {
    let Some(artifact) = board.artifact() else {
        return WorkerReply::Error {
            message: "artifact not ready".to_string(),
        };
    };

    let path = artifact_dir.join(format!(
        "artifact-{}.{}",
        uuid::Uuid::new_v4().simple(),
        artifact.native_extension()
    ));
    let written = async {
        tokio::fs::create_dir_all(artifact_dir).await?;
        tokio::fs::write(&path, &artifact.bytes).await?;
        Ok::<_, std::io::Error>(())
    };
    match written.await {
        Ok(()) => WorkerReply::Artifact {
            path: path.to_string_lossy().to_string(),
            mime: artifact.mime,
        },
        Err(e) => WorkerReply::Error {
            message: format!("failed to hand over artifact: {}", e),
        },
    }
}

async fn send<W: AsyncWrite + Unpin>(writer: &mut W, reply: &WorkerReply) -> WorkerResult<()> {
    let mut line = serde_json::to_vec(reply)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}
