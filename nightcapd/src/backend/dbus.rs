//! D-Bus transport glue.
//!
//! Connects to the system bus, picks the first backend whose startup probe
//! succeeds and forwards its signals into the reactor's signal channel.

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use zbus::{Connection, Message, MessageStream};

use super::{Backend, BackendError, BackendKind, BackendResult, Signal};

/// Capacity of the signal channel between the forwarder and the reactor
pub const SIGNAL_QUEUE: usize = 4;

/// Connect to the system bus and set up the selected backend.
///
/// Returns the backend together with the receiving end of its signal
/// channel. Any error here is fatal for the daemon.
pub async fn open() -> BackendResult<(Box<dyn Backend>, mpsc::Receiver<Signal>)> {
    let conn = Connection::system().await?;
    let (kind, backend) = select_backend(&conn).await?;
    debug!(
        backend = backend.name(),
        filter = %backend.filter(),
        "using backend"
    );

    // Registers the match rule with the bus (AddMatch)
    let stream =
        MessageStream::for_match_rule(kind.match_rule()?, &conn, Some(SIGNAL_QUEUE)).await?;
    let (tx, rx) = mpsc::channel(SIGNAL_QUEUE);
    tokio::spawn(forward_signals(stream, tx));

    Ok((backend, rx))
}

/// Try the candidates in priority order; the first to initialise wins.
pub async fn select_backend(conn: &Connection) -> BackendResult<(BackendKind, Box<dyn Backend>)> {
    for kind in BackendKind::PRIORITY {
        match kind.try_init(conn).await {
            Ok(backend) => return Ok((kind, backend)),
            Err(e) => debug!(?kind, error = %e, "backend not available"),
        }
    }
    Err(BackendError::Unavailable)
}

async fn forward_signals(mut stream: MessageStream, tx: mpsc::Sender<Signal>) {
    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                warn!("receive signal: {}", e);
                continue;
            }
        };
        let Some(signal) = to_signal(&msg) else {
            continue;
        };
        if tx.send(signal).await.is_err() {
            break;
        }
    }
    debug!("signal forwarder stopped");
}

fn to_signal(msg: &Message) -> Option<Signal> {
    let header = msg.header();
    let path = header.path()?.to_string();
    let name = format!("{}.{}", header.interface()?, header.member()?);
    let payload = msg.body().deserialize::<bool>().ok();
    Some(Signal::new(path, name, payload))
}
