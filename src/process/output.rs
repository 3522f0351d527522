use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One line written by a supervised child, without its trailing newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub text: String,
}

/// Merged stdout + stderr of a child, line by line.
///
/// Ends once both pipes are closed. Dropping it does not stop the reader
/// tasks; they keep draining so the child never stalls on a full pipe.
#[derive(Debug)]
pub struct OutputLines {
    rx: mpsc::UnboundedReceiver<OutputLine>,
}

impl OutputLines {
    pub async fn next(&mut self) -> Option<OutputLine> {
        self.rx.recv().await
    }
}

pub(super) fn channel() -> (mpsc::UnboundedSender<OutputLine>, OutputLines) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, OutputLines { rx })
}

pub(super) fn spawn_reader<R>(
    reader: R,
    stream: OutputStream,
    tx: mpsc::UnboundedSender<OutputLine>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    // Receiver gone: keep reading and discard.
                    let _ = tx.send(OutputLine {
                        stream,
                        text: decode_line(&buf),
                    });
                }
                Err(e) => {
                    tracing::trace!(%stream, "child output read failed: {e}");
                    break;
                }
            }
        }
    });
}

/// Strip the line terminator; bytes that are not UTF-8 become U+FFFD.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
