//! Line-oriented submission intake
//!
//! Every input line is one JSON object holding the `SendRequest` fields and an
//! optional `idempotency_key`:
//!
//! ```json
//! {"to": "a@example.com", "from": "b@example.com", "subject": "Hi", "body": "Hello", "idempotency_key": "welcome-42"}
//! ```
//!
//! Every submission is answered with exactly one JSON line: the `SendResult`,
//! or `{"error": ...}` when the line could not be parsed. Replies are written
//! in completion order, not input order.

use courier_common::{Signal, dispatch, internal};
use courier_delivery::{EmailService, SendRequest, SendResult};
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt},
    sync::broadcast,
    task::JoinSet,
};

#[derive(Debug, Deserialize)]
pub struct Submission {
    #[serde(flatten)]
    pub request: SendRequest,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// One output line
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Reply {
    Result(Box<SendResult>),
    Rejected { error: String },
}

/// Dispatch one input line
pub async fn handle(service: &EmailService, line: &str) -> Reply {
    let Submission {
        request,
        idempotency_key,
    } = match serde_json::from_str(line) {
        Ok(submission) => submission,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected malformed submission");
            return Reply::Rejected {
                error: e.to_string(),
            };
        }
    };

    match service.send_email(request, idempotency_key).await {
        Ok(result) => Reply::Result(Box::new(result)),
        Err(err) => {
            dispatch!(
                level = WARN,
                "Submission {} not sent ({}): {}",
                err.result.id,
                err.result.status,
                err
            );
            Reply::Result(err.result)
        }
    }
}

/// Read submissions from `reader` and answer each on `writer`
///
/// Every submission is dispatched on its own task, so a request stuck in
/// backoff does not hold up the ones behind it. Replies are written as they
/// complete and carry the request id, so they may come out of input order.
///
/// Returns once the input is exhausted and every reply is written, or as
/// soon as a shutdown signal arrives. Submissions still in flight at
/// shutdown are abandoned unanswered.
///
/// # Errors
///
/// If reading from `reader` or writing to `writer` fails.
pub async fn serve<R, W>(
    service: &EmailService,
    reader: R,
    mut writer: W,
    mut shutdown: broadcast::Receiver<Signal>,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut in_flight: JoinSet<Reply> = JoinSet::new();
    let mut reading = true;

    while reading || !in_flight.is_empty() {
        tokio::select! {
            line = lines.next_line(), if reading => {
                match line? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => {
                        let service = service.clone();
                        in_flight.spawn(async move { handle(&service, &line).await });
                    }
                    None => {
                        internal!(level = INFO, "Input closed, {} submission(s) in flight", in_flight.len());
                        reading = false;
                    }
                }
            }
            Some(joined) = in_flight.join_next() => {
                match joined {
                    Ok(reply) => write_reply(&mut writer, &reply).await?,
                    Err(e) => tracing::error!(error = %e, "Submission task failed"),
                }
            }
            sig = shutdown.recv() => {
                match sig {
                    Ok(sig) => internal!("Intake received {sig:?}"),
                    Err(e) => tracing::error!(error = %e, "Intake shutdown channel error"),
                }
                break;
            }
        }
    }

    Ok(())
}

async fn write_reply<W>(writer: &mut W, reply: &Reply) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = serde_json::to_vec(reply)?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}
