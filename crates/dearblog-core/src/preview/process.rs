use super::{PreviewEvent, STOP_GRACE};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// How long the output readers may keep draining after the server exited.
/// A background process that inherited the pipes can hold them open forever.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

const READ_BUF_SIZE: usize = 8192;

pub(crate) struct SpawnedServer {
    pub pid: Option<u32>,
    /// Sending (or dropping) this stops the child.
    pub kill_tx: oneshot::Sender<()>,
}

/// Spawn the server and hand its stdout, stderr and exit over to background
/// tasks that report through `tx`, tagged with `session`.
///
/// On a natural exit the output streams get [`DRAIN_GRACE`] to flush before
/// [`PreviewEvent::Exited`] is sent, so the exit is the last event of a
/// session. A stop request sends SIGTERM and falls back to a hard kill after
/// [`STOP_GRACE`].
pub(crate) fn spawn_server(
    mut cmd: Command,
    session: u64,
    tx: mpsc::UnboundedSender<PreviewEvent>,
) -> std::io::Result<SpawnedServer> {
    let mut child = cmd.spawn()?;
    let pid = child.id();

    let stdout_task = child
        .stdout
        .take()
        .map(|s| tokio::spawn(forward_output(s, session, tx.clone())));
    let stderr_task = child
        .stderr
        .take()
        .map(|s| tokio::spawn(forward_output(s, session, tx.clone())));

    let (kill_tx, kill_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let finished = tokio::select! {
            status = child.wait() => Some(status),
            _ = kill_rx => None,
        };

        let readers = [stdout_task, stderr_task].into_iter().flatten();
        let code = match finished {
            Some(Ok(status)) => {
                drain(readers, session).await;
                status.code()
            }
            Some(Err(e)) => {
                warn!(session, error = %e, "waiting on preview server failed");
                readers.for_each(|r| r.abort());
                None
            }
            None => {
                let code = terminate(&mut child, session).await;
                readers.for_each(|r| r.abort());
                code
            }
        };

        let _ = tx.send(PreviewEvent::Exited { session, code });
    });

    Ok(SpawnedServer { pid, kill_tx })
}

async fn drain(readers: impl Iterator<Item = JoinHandle<()>>, session: u64) {
    let deadline = Instant::now() + DRAIN_GRACE;
    for mut reader in readers {
        if tokio::time::timeout_at(deadline, &mut reader).await.is_err() {
            debug!(session, "output pipe still open after exit; dropping the rest");
            reader.abort();
        }
    }
}

/// SIGTERM first, the way `hugo serve` expects to be shut down, then a hard
/// kill if it is still around after [`STOP_GRACE`].
async fn terminate(child: &mut Child, session: u64) -> Option<i32> {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            let sent = Command::new("kill")
                .args(["-TERM", &pid.to_string()])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
            match sent {
                Ok(status) if status.success() => {
                    match tokio::time::timeout(STOP_GRACE, child.wait()).await {
                        Ok(Ok(status)) => return status.code(),
                        Ok(Err(e)) => debug!(session, error = %e, "waiting after SIGTERM failed"),
                        Err(_) => debug!(session, pid, "preview server ignored SIGTERM"),
                    }
                }
                Ok(status) => debug!(session, pid, code = ?status.code(), "kill -TERM failed"),
                Err(e) => debug!(session, pid, error = %e, "could not run kill -TERM"),
            }
        }
    }

    if let Err(e) = child.kill().await {
        debug!(session, error = %e, "kill after stop request failed");
    }
    None
}

/// Forward output as it arrives, one event per read, so text without a
/// trailing newline (progress lines, prompts) shows up immediately.
async fn forward_output<R>(mut stream: R, session: u64, tx: mpsc::UnboundedSender<PreviewEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; READ_BUF_SIZE];
    let mut pending = Vec::new();
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                pending.extend_from_slice(&buf[..n]);
                let text = take_utf8(&mut pending);
                if !text.is_empty() && tx.send(PreviewEvent::Output { session, text }).is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!(session, error = %e, "preview output stream closed");
                break;
            }
        }
    }

    if !pending.is_empty() {
        let text = String::from_utf8_lossy(&pending).into_owned();
        let _ = tx.send(PreviewEvent::Output { session, text });
    }
}

/// Decode as much of `pending` as possible. Invalid bytes become U+FFFD; an
/// incomplete sequence at the end stays in `pending` for the next read.
fn take_utf8(pending: &mut Vec<u8>) -> String {
    let mut text = String::new();
    loop {
        match std::str::from_utf8(pending) {
            Ok(s) => {
                text.push_str(s);
                pending.clear();
                return text;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                text.push_str(&String::from_utf8_lossy(&pending[..valid]));
                match e.error_len() {
                    None => {
                        pending.drain(..valid);
                        return text;
                    }
                    Some(bad) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        pending.drain(..valid + bad);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn take_utf8_keeps_incomplete_tail() {
        let mut pending = b"caf\xC3".to_vec();
        assert_eq!(take_utf8(&mut pending), "caf");
        assert_eq!(pending, vec![0xC3]);

        pending.extend_from_slice(b"\xA9!");
        assert_eq!(take_utf8(&mut pending), "é!");
        assert!(pending.is_empty());
    }

    #[test]
    fn take_utf8_replaces_invalid_bytes() {
        let mut pending = b"a\xFFb\xE2\x82".to_vec();
        assert_eq!(take_utf8(&mut pending), "a\u{FFFD}b");
        assert_eq!(pending, vec![0xE2, 0x82]);
    }

    #[tokio::test]
    async fn partial_line_is_forwarded_before_newline() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(forward_output(reader, 7, tx));

        writer.write_all(b"Serving...").await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no output before the newline")
            .unwrap();
        assert!(matches!(
            event,
            PreviewEvent::Output { session: 7, ref text } if text == "Serving..."
        ));

        drop(writer);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn multibyte_char_split_across_writes_survives() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(forward_output(reader, 1, tx));

        writer.write_all(b"caf\xC3").await.unwrap();
        tokio::task::yield_now().await;
        writer.write_all(b"\xA9 ok\n").await.unwrap();
        drop(writer);
        task.await.unwrap();

        let mut output = String::new();
        while let Ok(PreviewEvent::Output { text, .. }) = rx.try_recv() {
            output.push_str(&text);
        }
        assert_eq!(output, "café ok\n");
    }
}
