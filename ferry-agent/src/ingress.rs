//! Local ingress: where host processes hand envelopes to the agent.
//!
//! [`serve`] accepts TCP connections on a local address and reads one JSON
//! [`Envelope`] per line. Decoded envelopes go into a bounded channel that
//! [`run_batcher`] drains, flushing an [`EnvelopeBatch`] to the
//! [`ConnManager`] when `batch_size` envelopes are buffered or
//! `flush_interval` has elapsed, whichever comes first.
//!
//! Lines that are not valid UTF-8 or do not decode as an envelope are
//! logged and skipped. A line longer than the frame payload limit
//! disconnects its client.
//!
//! A batch whose write fails is dropped and counted. The connection manager
//! never queues, and neither does this layer.

use std::sync::Arc;
use std::time::Duration;

// ---

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

// ---

use ferry_domain::{Envelope, EnvelopeBatch};

// ---

use super::framing::MAX_PAYLOAD_LEN;
use super::ConnManager;

// ---

/// Longest ingress line accepted, newline excluded. An envelope that big
/// could never fit in an upstream frame anyway.
const MAX_LINE_LEN: usize = MAX_PAYLOAD_LEN;

// ---------------------------------------------------------------------------
// serve
// ---------------------------------------------------------------------------

/// Accept loop for the local ingress listener. Runs until the envelope
/// channel closes or the listener fails.
pub async fn serve(listener: TcpListener, env_tx: mpsc::Sender<Envelope>) {
    // ---
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::error!("ingress accept failed: {e}");
                return;
            }
        };

        if env_tx.is_closed() {
            tracing::info!("envelope channel closed — ingress exiting");
            return;
        }

        tracing::debug!(%peer, "ingress client connected");
        tokio::spawn(read_envelopes(socket, env_tx.clone(), MAX_LINE_LEN));
    }
}

// ---

/// Read newline-delimited JSON envelopes from one client.
///
/// Lines are read as raw bytes so a bad line costs only itself. A final
/// line without a trailing newline is still decoded.
async fn read_envelopes<R>(reader: R, env_tx: mpsc::Sender<Envelope>, max_line: usize)
where
    R: AsyncRead + Unpin,
{
    // ---
    let mut reader = BufReader::new(reader);
    let mut line: Vec<u8> = Vec::new();

    loop {
        line.clear();

        // At most one byte past the limit, newline included.
        let read = (&mut reader)
            .take(max_line as u64 + 1)
            .read_until(b'\n', &mut line)
            .await;

        match read {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("ingress read error: {e}");
                break;
            }
        }

        if line.last() == Some(&b'\n') {
            line.pop();
        } else if line.len() > max_line {
            tracing::warn!(limit = max_line, "ingress line too long, disconnecting client");
            break;
        }

        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        match serde_json::from_slice::<Envelope>(&line) {
            Ok(env) => {
                if env_tx.send(env).await.is_err() {
                    break;
                }
            }
            Err(e) => tracing::warn!(len = line.len(), "discarding malformed envelope: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// BatcherStats
// ---------------------------------------------------------------------------

/// Totals reported by [`run_batcher`] when its input channel closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatcherStats {
    // ---
    pub batches_sent: u64,
    pub envelopes_sent: u64,
    pub envelopes_dropped: u64,
}

// ---------------------------------------------------------------------------
// run_batcher
// ---------------------------------------------------------------------------

/// Accumulate envelopes and flush them through `manager`.
///
/// Returns after `env_rx` closes and the final partial batch is flushed.
pub async fn run_batcher(
    mut env_rx: mpsc::Receiver<Envelope>,
    manager: Arc<ConnManager>,
    batch_size: usize,
    flush_interval: Duration,
) -> BatcherStats {
    // ---
    let batch_size = batch_size.max(1);
    let mut stats = BatcherStats::default();
    let mut pending: Vec<Envelope> = Vec::with_capacity(batch_size);

    let mut ticker = interval(flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            received = env_rx.recv() => match received {
                Some(env) => {
                    pending.push(env);
                    if pending.len() >= batch_size {
                        flush(&manager, &mut pending, &mut stats).await;
                    }
                }
                None => {
                    flush(&manager, &mut pending, &mut stats).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                flush(&manager, &mut pending, &mut stats).await;
            }
        }
    }

    tracing::info!(
        batches = stats.batches_sent,
        sent = stats.envelopes_sent,
        dropped = stats.envelopes_dropped,
        "batcher exiting"
    );
    stats
}

// ---

async fn flush(manager: &ConnManager, pending: &mut Vec<Envelope>, stats: &mut BatcherStats) {
    // ---
    if pending.is_empty() {
        return;
    }

    let batch = EnvelopeBatch::new(std::mem::take(pending));
    let count = batch.len() as u64;

    match manager.write(&batch).await {
        Ok(()) => {
            stats.batches_sent += 1;
            stats.envelopes_sent += count;
        }
        Err(e) => {
            stats.envelopes_dropped += count;
            tracing::warn!(dropped = count, "dropping batch: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;
    use tokio::time::Instant;

    use ferry_domain::{ConnState, Message};
    use ferry_link_sim::{LinkSimConfig, LinkSimConnector};

    use super::*;

    // ---

    fn envelope(i: u64) -> Envelope {
        // ---
        Envelope::now(
            "ingress-test",
            Message::Counter {
                name: "n".into(),
                delta: 1,
                total: Some(i),
            },
        )
    }

    async fn active_manager(connector: &LinkSimConnector) -> Arc<ConnManager> {
        // ---
        let m = ConnManager::new(Arc::new(connector.clone()), 1_000, Duration::from_millis(100))
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(1);
        while m.state() != ConnState::Active {
            assert!(Instant::now() < deadline, "manager never connected");
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        Arc::new(m)
    }

    // ---

    #[tokio::test(start_paused = true)]
    async fn flushes_on_size_and_on_interval() {
        // ---
        let connector = LinkSimConnector::new(LinkSimConfig::perfect());
        let manager = active_manager(&connector).await;

        let (tx, rx) = mpsc::channel(64);
        let batcher = tokio::spawn(run_batcher(rx, manager, 4, Duration::from_secs(10)));

        // Full batch goes out immediately.
        for i in 0..4 {
            tx.send(envelope(i)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        let link = connector.last_link().unwrap();
        assert_eq!(link.sends(), 1);
        assert_eq!(link.envelopes(), 4);

        // A partial batch waits for the interval.
        tx.send(envelope(4)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(link.sends(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(link.sends(), 2);
        assert_eq!(link.envelopes(), 5);

        // Closing the channel flushes the remainder.
        tx.send(envelope(5)).await.unwrap();
        drop(tx);
        let stats = batcher.await.unwrap();
        assert_eq!(
            stats,
            BatcherStats {
                batches_sent: 3,
                envelopes_sent: 6,
                envelopes_dropped: 0,
            }
        );
    }

    // ---

    #[tokio::test(start_paused = true)]
    async fn counts_dropped_batches_without_connection() {
        // ---
        let connector = LinkSimConnector::new(LinkSimConfig::perfect());
        connector.set_available(false);
        let manager = Arc::new(
            ConnManager::new(Arc::new(connector.clone()), 10, Duration::from_secs(60)).unwrap(),
        );

        let (tx, rx) = mpsc::channel(8);
        let batcher = tokio::spawn(run_batcher(rx, manager, 2, Duration::from_secs(1)));
        for i in 0..3 {
            tx.send(envelope(i)).await.unwrap();
        }
        drop(tx);

        let stats = batcher.await.unwrap();
        assert_eq!(stats.batches_sent, 0);
        assert_eq!(stats.envelopes_dropped, 3);
    }

    // ---

    #[tokio::test]
    async fn ingress_decodes_lines_and_skips_garbage() {
        // ---
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        tokio::spawn(serve(listener, tx));

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut payload = String::new();
        payload.push_str(&serde_json::to_string(&envelope(1)).unwrap());
        payload.push_str("\nnot json\n\n");
        payload.push_str(&serde_json::to_string(&envelope(2)).unwrap());
        payload.push('\n');
        client.write_all(payload.as_bytes()).await.unwrap();
        client.shutdown().await.unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.message, envelope(1).message);
        assert_eq!(second.message, envelope(2).message);
    }

    // ---

    /// A line that is not UTF-8 is skipped like any other malformed line;
    /// the client's later envelopes still arrive.
    #[tokio::test]
    async fn invalid_utf8_line_does_not_end_the_client() {
        // ---
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        tokio::spawn(serve(listener, tx));

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut payload: Vec<u8> = vec![0xff, 0xfe, b'\n'];
        payload.extend_from_slice(serde_json::to_string(&envelope(7)).unwrap().as_bytes());
        payload.push(b'\n');
        client.write_all(&payload).await.unwrap();
        client.shutdown().await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("envelope after a non-UTF-8 line was lost")
            .unwrap();
        assert_eq!(got.message, envelope(7).message);
    }

    // ---

    /// An overlong line disconnects the client; what came before it is
    /// kept, what follows it is not read.
    #[tokio::test]
    async fn overlong_line_disconnects_client() {
        // ---
        let valid = serde_json::to_string(&envelope(1)).unwrap();
        let max_line = valid.len() * 2;

        let mut input = Vec::new();
        input.extend_from_slice(valid.as_bytes());
        input.push(b'\n');
        input.extend(std::iter::repeat(b'x').take(max_line * 3));
        input.push(b'\n');
        input.extend_from_slice(serde_json::to_string(&envelope(2)).unwrap().as_bytes());

        let (tx, mut rx) = mpsc::channel(8);
        read_envelopes(input.as_slice(), tx, max_line).await;

        assert_eq!(rx.recv().await.unwrap().message, envelope(1).message);
        assert!(rx.recv().await.is_none());
    }

    // ---

    #[tokio::test]
    async fn final_line_without_newline_is_decoded() {
        // ---
        let input = serde_json::to_string(&envelope(3)).unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        read_envelopes(input.as_bytes(), tx, MAX_LINE_LEN).await;

        assert_eq!(rx.recv().await.unwrap().message, envelope(3).message);
        assert!(rx.recv().await.is_none());
    }
}
