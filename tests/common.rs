use std::{
    collections::VecDeque,
    convert::Infallible,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::Error;
use async_trait::async_trait;
use dlq_redriver::{
    drainer::Drainer,
    error::PublishError,
    feed,
    models::redrive::{DeadLetter, RedriveItem},
    redriver::{Publisher, Redriver},
};
use futures_util::stream;
use lapin::types::{AMQPValue, FieldArray, FieldTable, LongString};
use tokio::{sync::watch, time::sleep};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Acked,
    Rejected { requeue: bool },
}

/// Shared record of every ack/reject made on fake deliveries.
#[derive(Clone, Debug, Default)]
pub struct Ledger {
    entries: Arc<Mutex<Vec<(u64, Resolution)>>>,
}

impl Ledger {
    fn record(&self, delivery_tag: u64, resolution: Resolution) {
        self.entries.lock().unwrap().push((delivery_tag, resolution));
    }

    pub fn entries(&self) -> Vec<(u64, Resolution)> {
        self.entries.lock().unwrap().clone()
    }

    pub fn for_tag(&self, delivery_tag: u64) -> Vec<Resolution> {
        self.entries()
            .into_iter()
            .filter(|(tag, _)| *tag == delivery_tag)
            .map(|(_, resolution)| resolution)
            .collect()
    }

    pub fn dead_letter(
        &self,
        delivery_tag: u64,
        body: &[u8],
        headers: Option<FieldTable>,
    ) -> FakeDeadLetter {
        FakeDeadLetter {
            delivery_tag,
            body: body.to_vec(),
            headers,
            ledger: self.clone(),
        }
    }
}

#[derive(Debug)]
pub struct FakeDeadLetter {
    delivery_tag: u64,
    body: Vec<u8>,
    headers: Option<FieldTable>,
    ledger: Ledger,
}

#[async_trait]
impl DeadLetter for FakeDeadLetter {
    fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    fn body(&self) -> &[u8] {
        &self.body
    }

    fn headers(&self) -> Option<&FieldTable> {
        self.headers.as_ref()
    }

    async fn acknowledge(self) -> Result<(), Error> {
        self.ledger.record(self.delivery_tag, Resolution::Acked);
        Ok(())
    }

    async fn reject(self, requeue: bool) -> Result<(), Error> {
        self.ledger
            .record(self.delivery_tag, Resolution::Rejected { requeue });
        Ok(())
    }
}

pub fn long(value: &str) -> AMQPValue {
    AMQPValue::LongString(LongString::from(value))
}

/// Headers as the broker writes them when a message published to
/// `exchange` with `routing_keys` is dead-lettered.
pub fn dead_lettered_headers(exchange: &str, routing_keys: Vec<AMQPValue>) -> FieldTable {
    let mut death = FieldTable::default();
    death.insert("count".into(), AMQPValue::LongLongInt(1));
    death.insert("exchange".into(), long(exchange));
    death.insert("queue".into(), long("orders.q"));
    death.insert("reason".into(), long("rejected"));
    death.insert(
        "routing-keys".into(),
        AMQPValue::FieldArray(FieldArray::from(routing_keys)),
    );

    let mut headers = FieldTable::default();
    headers.insert(
        "x-death".into(),
        AMQPValue::FieldArray(FieldArray::from(vec![AMQPValue::FieldTable(death)])),
    );
    headers
}

pub fn item(
    message: FakeDeadLetter,
    exchange: &str,
    routing_key: &str,
) -> RedriveItem<FakeDeadLetter> {
    RedriveItem {
        message,
        target_exchange: exchange.to_string(),
        target_routing_key: routing_key.to_string(),
    }
}

#[derive(Debug, Clone, Copy)]
pub enum BrokerMode {
    Reachable,
    Unreachable,
    Refusing,
    Stalled,
    Slow(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
}

/// Publisher whose behaviour is scripted per call; falls back to
/// `BrokerMode::Reachable` once the script runs out.
#[derive(Default)]
pub struct FakePublisher {
    script: Mutex<VecDeque<BrokerMode>>,
    published: Mutex<Vec<Published>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakePublisher {
    pub fn reachable() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn scripted(modes: Vec<BrokerMode>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(modes.into()),
            ..Default::default()
        })
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Publisher for FakePublisher {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
    ) -> Result<(), PublishError> {
        let mode = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(BrokerMode::Reachable);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = match mode {
            BrokerMode::Reachable => Ok(()),
            BrokerMode::Unreachable => Err(PublishError::Channel(
                "connection refused".to_string(),
            )),
            BrokerMode::Refusing => Err(PublishError::Rejected),
            BrokerMode::Stalled => std::future::pending().await,
            BrokerMode::Slow(delay) => {
                sleep(delay).await;
                Ok(())
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if result.is_ok() {
            self.published.lock().unwrap().push(Published {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                body: body.to_vec(),
            });
        }

        result
    }
}

/// Runs a Drainer and a Redriver over `deliveries` until the stream is
/// exhausted and the feed is empty.
pub async fn run_pipeline(
    allowed_routing_keys: &[&str],
    deliveries: Vec<FakeDeadLetter>,
    publisher: Arc<FakePublisher>,
    publish_timeout: Duration,
) {
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let (feed_tx, feed_rx) = feed::bounded();

    let drainer = Drainer::new(
        allowed_routing_keys.iter().map(|key| key.to_string()).collect(),
        feed_tx,
    );
    let redriver = Redriver::new(feed_rx, publisher, publish_timeout);

    let deliveries = stream::iter(deliveries.into_iter().map(Ok::<_, Infallible>));

    tokio::join!(
        drainer.run(deliveries, shutdown_rx.clone()),
        redriver.run(shutdown_rx),
    );
}
