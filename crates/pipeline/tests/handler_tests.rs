//! Output handler integration tests: batching, routing, fault handling
//! and shutdown through the public API.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use logferry_core::Codec;
use logferry_core::message::Message;
use logferry_pipeline::{
    Connector, DestinationPath, Handle, HandlerSettings, InstanceState, OutputError,
    OutputHandler, SinkVariant,
};
use parking_lot::Mutex;

/// Records sends; connection and send behavior is scripted.
#[derive(Default)]
struct Scripted {
    path: Option<DestinationPath>,
    sent: Mutex<Vec<(String, Vec<String>)>>,
    raw: Mutex<Vec<Bytes>>,
    connects: AtomicUsize,
    probes: AtomicUsize,
    closes: AtomicUsize,
    after_close: AtomicUsize,
    failing_probes: usize,
    panic_destination: Option<&'static str>,
}

impl Scripted {
    fn routed(expr: &str) -> Self {
        Self {
            path: Some(DestinationPath::parse(expr).unwrap()),
            ..Default::default()
        }
    }

    fn sent(&self) -> Vec<(String, Vec<String>)> {
        self.sent.lock().clone()
    }
}

impl Connector for Scripted {
    type Client = usize;

    async fn connect(&self) -> Result<Handle<usize>, OutputError> {
        let n = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Handle::owned(n))
    }

    async fn probe(&self, _client: &usize) -> Result<(), OutputError> {
        let n = self.probes.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.failing_probes {
            return Err(OutputError::Probe(format!("probe {n} refused")));
        }
        Ok(())
    }

    async fn close_client(&self, _client: &usize) -> Result<(), OutputError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl SinkVariant for Scripted {
    fn kind(&self) -> &'static str {
        "scripted"
    }

    fn name(&self) -> String {
        "events".to_owned()
    }

    fn destination(&self) -> Option<&DestinationPath> {
        self.path.as_ref()
    }

    async fn send_batch(
        &self,
        _client: &usize,
        messages: &[Message],
        destination: &str,
    ) -> Result<(), OutputError> {
        if self.panic_destination == Some(destination) {
            panic!("driver bug while sending to {destination}");
        }
        self.raw
            .lock()
            .extend(messages.iter().map(|m| m.payload().clone()));
        let payloads = messages
            .iter()
            .map(|m| String::from_utf8_lossy(m.payload()).into_owned())
            .collect();
        self.sent.lock().push((destination.to_owned(), payloads));
        Ok(())
    }

    async fn after_close(&self) {
        self.after_close.fetch_add(1, Ordering::SeqCst);
    }
}

fn settings(chunk_size: usize) -> HandlerSettings {
    HandlerSettings::default()
        .with_chunk_size(chunk_size)
        .with_flush_interval(Duration::from_secs(3600))
}

fn spawn_run(handler: &Arc<OutputHandler<Scripted>>) -> tokio::task::JoinHandle<Result<(), OutputError>> {
    let handler = Arc::clone(handler);
    tokio::spawn(async move { handler.run().await })
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_owned()).collect()
}

/// Static destination, chunk size 2: a, b, c arrive as [a, b] then [c].
#[tokio::test]
async fn test_static_destination_flushes_in_chunks() {
    let handler = Arc::new(OutputHandler::new(Scripted::default(), settings(2)));
    let task = spawn_run(&handler);

    for payload in ["a", "b", "c"] {
        assert!(handler.enqueue(Message::from(payload)));
    }
    // the size trigger fires for [a, b]; [c] waits for close
    wait_until(|| !handler.variant().sent().is_empty()).await;
    assert_eq!(handler.buffered(), 1);

    handler.close();
    task.await.unwrap().unwrap();

    assert_eq!(
        handler.variant().sent(),
        vec![
            ("events".to_owned(), strings(&["a", "b"])),
            ("events".to_owned(), strings(&["c"])),
        ]
    );
    assert_eq!(handler.state(), InstanceState::Closed);
}

/// Messages for one destination are sent in enqueue order across flushes.
#[tokio::test]
async fn test_order_is_preserved_across_flushes() {
    let handler = Arc::new(OutputHandler::new(Scripted::default(), settings(7)));
    let task = spawn_run(&handler);

    let expected: Vec<String> = (0..250).map(|i| i.to_string()).collect();
    for payload in &expected {
        handler.enqueue(Message::new(payload.clone()));
    }
    handler.close();
    task.await.unwrap().unwrap();

    let sent = handler.variant().sent();
    assert!(sent.iter().all(|(_, batch)| batch.len() <= 7));
    let flattened: Vec<String> = sent.into_iter().flat_map(|(_, batch)| batch).collect();
    assert_eq!(flattened, expected);
}

/// Dynamic path over tenants x, y, x: each destination gets only its messages.
#[tokio::test]
async fn test_dynamic_destination_sends_sub_batches() {
    let handler = OutputHandler::new(Scripted::routed("$.tenant"), settings(10));
    let m1 = r#"{"tenant":"x","v":1}"#;
    let m2 = r#"{"tenant":"y","v":2}"#;
    let m3 = r#"{"tenant":"x","v":3}"#;
    for payload in [m1, m2, m3] {
        handler.enqueue(Message::from(payload));
    }

    handler.close();
    handler.run().await.unwrap();

    let mut sent = handler.variant().sent();
    sent.sort();
    assert_eq!(
        sent,
        vec![
            ("x".to_owned(), strings(&[m1, m3])),
            ("y".to_owned(), strings(&[m2])),
        ]
    );
}

/// An unparsable payload is dropped; the rest of the chunk routes normally.
#[tokio::test]
async fn test_unparsable_message_is_excluded() {
    let handler = OutputHandler::new(Scripted::routed("$.tenant"), settings(10));
    handler.enqueue(Message::from(r#"{"tenant":"x"}"#));
    handler.enqueue(Message::from("not json"));
    handler.enqueue(Message::from(r#"{"tenant":5}"#));
    handler.enqueue(Message::from(r#"{"tenant":"x","n":2}"#));

    handler.close();
    handler.run().await.unwrap();

    let sent = handler.variant().sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1.len(), 2);
    let stats = handler.stats();
    assert_eq!(stats.dropped, 2);
    assert_eq!(stats.flushed, 2);
}

/// Two concurrent close calls: one after-close hook, one teardown.
#[tokio::test]
async fn test_concurrent_close_tears_down_once() {
    let handler = Arc::new(OutputHandler::new(Scripted::default(), settings(1)));
    let task = spawn_run(&handler);

    handler.enqueue(Message::from("a"));
    wait_until(|| handler.variant().connects.load(Ordering::SeqCst) == 1).await;

    let closers: Vec<_> = (0..2)
        .map(|_| {
            let handler = Arc::clone(&handler);
            tokio::spawn(async move { handler.close() })
        })
        .collect();
    let mut accepted = 0;
    for closer in closers {
        if closer.await.unwrap() {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 1);

    handler.wait_closed().await;
    task.await.unwrap().unwrap();
    assert!(!handler.close());

    let variant = handler.variant();
    assert_eq!(variant.after_close.load(Ordering::SeqCst), 1);
    assert_eq!(variant.closes.load(Ordering::SeqCst), 1);
}

/// Enqueue after close is refused without disturbing the drain.
#[tokio::test]
async fn test_enqueue_after_close_is_refused() {
    let handler = Arc::new(OutputHandler::new(Scripted::default(), settings(10)));
    handler.enqueue(Message::from("kept"));
    handler.close();
    assert!(!handler.enqueue(Message::from("late")));

    handler.run().await.unwrap();
    assert_eq!(
        handler.variant().sent(),
        vec![("events".to_owned(), strings(&["kept"]))]
    );
}

/// A panic while sending one group does not stop the other group or
/// later flushes.
#[tokio::test]
async fn test_send_fault_is_isolated() {
    let variant = Scripted {
        panic_destination: Some("boom"),
        ..Scripted::routed("$.d")
    };
    let handler = Arc::new(OutputHandler::new(variant, settings(2)));
    let task = spawn_run(&handler);

    handler.enqueue(Message::from(r#"{"d":"boom"}"#));
    handler.enqueue(Message::from(r#"{"d":"ok","n":1}"#));
    wait_until(|| handler.variant().sent().len() == 1).await;

    handler.enqueue(Message::from(r#"{"d":"ok","n":2}"#));
    handler.close();
    task.await.unwrap().unwrap();

    let sent = handler.variant().sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|(destination, _)| destination == "ok"));

    let stats = handler.stats();
    assert_eq!(stats.send_failures, 1);
    assert_eq!(stats.connection.faults, 1);
    // the faulted handle was replaced
    assert_eq!(stats.connection.connects, 2);
}

/// First probe fails, second succeeds: the next flush gets a working handle.
#[tokio::test]
async fn test_reconnects_after_failed_probe() {
    let variant = Scripted {
        failing_probes: 1,
        ..Default::default()
    };
    let handler = OutputHandler::new(variant, settings(1));
    handler.enqueue(Message::from("lost"));
    handler.enqueue(Message::from("delivered"));

    handler.close();
    handler.run().await.unwrap();

    assert_eq!(
        handler.variant().sent(),
        vec![("events".to_owned(), strings(&["delivered"]))]
    );
    let stats = handler.stats();
    assert_eq!(stats.send_failures, 1);
    assert_eq!(stats.connection.probe_failures, 1);
    assert_eq!(stats.connection.connects, 2);
}

/// With retry_attempts the same flush reconnects and delivers.
#[tokio::test]
async fn test_retry_attempts_recover_within_one_flush() {
    let variant = Scripted {
        failing_probes: 1,
        ..Default::default()
    };
    let handler = OutputHandler::new(variant, settings(10).with_retry_attempts(1));
    handler.enqueue(Message::from("a"));

    handler.close();
    handler.run().await.unwrap();

    assert_eq!(
        handler.variant().sent(),
        vec![("events".to_owned(), strings(&["a"]))]
    );
    assert_eq!(handler.stats().send_failures, 0);
}

/// The interval trigger flushes a partial chunk without close.
#[tokio::test(start_paused = true)]
async fn test_interval_flushes_partial_chunk() {
    let handler = Arc::new(OutputHandler::new(
        Scripted::default(),
        HandlerSettings::default()
            .with_chunk_size(100)
            .with_flush_interval(Duration::from_millis(50)),
    ));
    let task = spawn_run(&handler);

    handler.enqueue(Message::from("tick"));
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(
        handler.variant().sent(),
        vec![("events".to_owned(), strings(&["tick"]))]
    );

    handler.close();
    task.await.unwrap().unwrap();
}

/// Routing reads the plain payload; compression applies to what is sent.
#[tokio::test]
async fn test_compression_happens_after_routing() {
    use std::io::Read;

    let handler = OutputHandler::new(
        Scripted::routed("$.tenant"),
        settings(10).with_compression(Codec::Gzip),
    );
    let original = r#"{"tenant":"x","v":1}"#;
    handler.enqueue(Message::from(original));
    handler.close();
    handler.run().await.unwrap();

    assert_eq!(handler.stats().flushed, 1);
    assert_eq!(handler.variant().sent()[0].0, "x");

    let raw = handler.variant().raw.lock().clone();
    let mut decoded = String::new();
    flate2::read::GzDecoder::new(&raw[0][..])
        .read_to_string(&mut decoded)
        .unwrap();
    assert_eq!(decoded, original);
}
