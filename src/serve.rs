//! NDJSON request loop over stdio.
//!
//! Each stdin line is one `Envelope<Request>`; each reply is written to
//! stdout as one line. Replies may arrive out of order and are matched to
//! requests by `id`. A line that cannot be decoded is answered with a
//! single `Internal` error under its own `id` when one can be recovered,
//! otherwise under id 0.

use anyhow::Context;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use louis_worker_service::{
    Envelope, ErrorKind, ErrorPayload, Request, RequestId, Response, WorkerClient,
};

pub async fn run(client: WorkerClient) -> anyhow::Result<()> {
    let (replies, mut outbox) = mpsc::unbounded_channel::<Envelope<Response>>();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(reply) = outbox.recv().await {
            let mut line = serde_json::to_string(&reply)?;
            line.push('\n');
            stdout.write_all(line.as_bytes()).await?;
            stdout.flush().await?;
        }
        anyhow::Ok(())
    });

    info!("Serving NDJSON on stdio");
    serve_lines(BufReader::new(tokio::io::stdin()), &client, &replies).await?;

    info!("stdin closed, draining replies");
    drop(replies);
    drop(client);

    writer.await.context("stdout writer task failed")?
}

/// Dispatch every line of `input` until EOF.
async fn serve_lines<R>(
    mut input: R,
    client: &WorkerClient,
    replies: &mpsc::UnboundedSender<Envelope<Response>>,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        line.clear();
        let read = input
            .read_until(b'\n', &mut line)
            .await
            .context("Failed to read stdin")?;
        if read == 0 {
            return Ok(());
        }

        let envelope = match parse_line(&line) {
            Ok(Some(envelope)) => envelope,
            Ok(None) => continue,
            Err(reply) => {
                let _ = replies.send(reply);
                continue;
            }
        };

        let id = envelope.id;
        debug!(id, "Request received");
        let pending = client.dispatch(envelope).await?;

        let replies = replies.clone();
        tokio::spawn(async move {
            let reply = pending.wait().await.unwrap_or_else(|e| internal_error(id, e.to_string()));
            let _ = replies.send(reply);
        });
    }
}

/// Decode one request line.
///
/// Blank lines yield `Ok(None)`. Anything undecodable yields the `ERROR`
/// reply to send in its place.
fn parse_line(line: &[u8]) -> Result<Option<Envelope<Request>>, Envelope<Response>> {
    let text = match std::str::from_utf8(line) {
        Ok(text) => text.trim(),
        Err(e) => {
            warn!(error = %e, "Request line is not UTF-8");
            return Err(internal_error(0, format!("invalid request: {e}")));
        }
    };
    if text.is_empty() {
        return Ok(None);
    }

    let value: serde_json::Value = serde_json::from_str(text).map_err(|e| {
        warn!(error = %e, "Malformed request line");
        internal_error(0, format!("invalid request: {e}"))
    })?;
    let id = value.get("id").and_then(serde_json::Value::as_u64).unwrap_or(0);

    serde_json::from_value(value).map(Some).map_err(|e| {
        warn!(id, error = %e, "Invalid request");
        internal_error(id, format!("invalid request: {e}"))
    })
}

fn internal_error(id: RequestId, message: String) -> Envelope<Response> {
    Envelope::new(id, Response::Error(ErrorPayload::new(ErrorKind::Internal, message)))
}
