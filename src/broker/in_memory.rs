//! In-memory partitioned broker for testing and single-process scenarios.
//!
//! `InMemoryBroker` keeps an append-only log per (endpoint, partition) and a
//! committed offset per (endpoint, group, partition). It implements
//! `Producer` directly; `InMemoryConsumer` instances share the same log but
//! track their own read cursors, so several consumers (or several groups)
//! can read the same endpoint independently.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tracing::trace;

use super::{Connection, Consumer, Producer, TransportError};
use crate::envelope::{Envelope, Headers, Position};

#[derive(Clone, Debug)]
struct Record {
    body: Vec<u8>,
    headers: Headers,
}

#[derive(Default)]
struct BrokerState {
    endpoints: HashMap<String, Vec<Vec<Record>>>,
    /// Next offset to read, per (endpoint, group, partition).
    committed: HashMap<(String, String, u32), u64>,
}

#[derive(Default)]
struct Faults {
    unavailable: bool,
    failing_produces: usize,
}

/// In-memory partitioned log.
///
/// ## Example
///
/// ```
/// use reliable_rust::broker::{Consumer, InMemoryBroker, Producer};
/// use reliable_rust::envelope::Headers;
/// use std::time::Duration;
///
/// let broker = InMemoryBroker::new();
/// broker.produce("orders", None, b"{}", &Headers::new()).unwrap();
///
/// let mut consumer = broker.consumer();
/// consumer.subscribe("orders", "billing").unwrap();
/// let envelope = consumer.poll(Duration::from_millis(10)).unwrap().unwrap();
/// assert_eq!(envelope.endpoint, "orders");
/// ```
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<RwLock<BrokerState>>,
    faults: Arc<Mutex<Faults>>,
    partitions: u32,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Create a broker with a single partition per endpoint.
    pub fn new() -> Self {
        Self::with_partitions(1)
    }

    /// Create a broker with `partitions` partitions per endpoint (minimum 1).
    pub fn with_partitions(partitions: u32) -> Self {
        Self {
            state: Arc::new(RwLock::new(BrokerState::default())),
            faults: Arc::new(Mutex::new(Faults::default())),
            partitions: partitions.max(1),
        }
    }

    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    /// Create a consumer reading every partition.
    pub fn consumer(&self) -> InMemoryConsumer {
        InMemoryConsumer::new(self.clone(), (0..self.partitions).collect())
    }

    /// Create a consumer restricted to the given partitions.
    pub fn consumer_for(&self, partitions: &[u32]) -> InMemoryConsumer {
        InMemoryConsumer::new(self.clone(), partitions.to_vec())
    }

    /// Simulate the broker going away (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.unavailable = !available;
        }
    }

    /// Make the next `count` produce calls fail with `Unavailable`.
    pub fn fail_next_produces(&self, count: usize) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.failing_produces = count;
        }
    }

    /// All records of an endpoint as envelopes, partition by partition.
    pub fn records(&self, endpoint: &str) -> Vec<Envelope> {
        let Ok(state) = self.state.read() else {
            return Vec::new();
        };
        let Some(partitions) = state.endpoints.get(endpoint) else {
            return Vec::new();
        };
        partitions
            .iter()
            .enumerate()
            .flat_map(|(partition, records)| {
                records.iter().enumerate().map(move |(offset, record)| {
                    Envelope::new(
                        endpoint,
                        Position::new(partition as u32, offset as u64),
                        record.body.clone(),
                        record.headers.clone(),
                    )
                })
            })
            .collect()
    }

    /// Number of records in an endpoint across all partitions.
    pub fn len(&self, endpoint: &str) -> usize {
        self.state
            .read()
            .map(|state| {
                state
                    .endpoints
                    .get(endpoint)
                    .map(|partitions| partitions.iter().map(Vec::len).sum())
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }

    pub fn is_empty(&self, endpoint: &str) -> bool {
        self.len(endpoint) == 0
    }

    /// Next offset `group` will read on `partition`, if it ever acked.
    pub fn committed(&self, endpoint: &str, group: &str, partition: u32) -> Option<u64> {
        self.state.read().ok().and_then(|state| {
            state
                .committed
                .get(&(endpoint.to_string(), group.to_string(), partition))
                .copied()
        })
    }

    fn partition_for(&self, key: Option<&str>) -> u32 {
        match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % u64::from(self.partitions)) as u32
            }
            None => 0,
        }
    }

    fn check_available(&self) -> Result<(), TransportError> {
        let faults = self
            .faults
            .lock()
            .map_err(|_| TransportError::Other("fault state poisoned".into()))?;
        if faults.unavailable {
            Err(TransportError::Unavailable)
        } else {
            Ok(())
        }
    }

    fn read_at(&self, endpoint: &str, position: Position) -> Result<Option<Envelope>, TransportError> {
        let state = self
            .state
            .read()
            .map_err(|_| TransportError::Other("broker log poisoned".into()))?;
        let record = state
            .endpoints
            .get(endpoint)
            .and_then(|partitions| partitions.get(position.partition as usize))
            .and_then(|records| records.get(position.offset as usize));
        Ok(record.map(|record| {
            Envelope::new(
                endpoint,
                position,
                record.body.clone(),
                record.headers.clone(),
            )
        }))
    }

    fn commit(&self, endpoint: &str, group: &str, position: &Position) -> Result<(), TransportError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| TransportError::Other("broker log poisoned".into()))?;
        let next = state
            .committed
            .entry((endpoint.to_string(), group.to_string(), position.partition))
            .or_insert(0);
        *next = (*next).max(position.offset + 1);
        Ok(())
    }
}

impl Producer for InMemoryBroker {
    fn produce(
        &self,
        endpoint: &str,
        key: Option<&str>,
        body: &[u8],
        headers: &Headers,
    ) -> Result<Position, TransportError> {
        self.check_available()?;
        {
            let mut faults = self
                .faults
                .lock()
                .map_err(|_| TransportError::Other("fault state poisoned".into()))?;
            if faults.failing_produces > 0 {
                faults.failing_produces -= 1;
                return Err(TransportError::Unavailable);
            }
        }

        let partition = self.partition_for(key);
        let mut state = self
            .state
            .write()
            .map_err(|_| TransportError::Other("broker log poisoned".into()))?;
        let partitions = state
            .endpoints
            .entry(endpoint.to_string())
            .or_insert_with(|| vec![Vec::new(); self.partitions as usize]);
        let records = &mut partitions[partition as usize];
        records.push(Record {
            body: body.to_vec(),
            headers: headers.clone(),
        });
        let position = Position::new(partition, (records.len() - 1) as u64);
        trace!(endpoint, %position, "record produced");
        Ok(position)
    }
}

impl Connection for InMemoryBroker {
    fn connect(&mut self) -> Result<(), TransportError> {
        self.check_available()
            .map_err(|_| TransportError::ConnectionFailed("in-memory broker offline".into()))
    }

    fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// A consumer over an `InMemoryBroker`, with its own cursor per partition.
pub struct InMemoryConsumer {
    broker: InMemoryBroker,
    partitions: Vec<u32>,
    subscription: Option<(String, String)>,
    cursors: HashMap<u32, u64>,
    next_partition: usize,
    connected: bool,
}

impl InMemoryConsumer {
    fn new(broker: InMemoryBroker, mut partitions: Vec<u32>) -> Self {
        partitions.sort_unstable();
        partitions.dedup();
        Self {
            broker,
            partitions,
            subscription: None,
            cursors: HashMap::new(),
            next_partition: 0,
            connected: true,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn subscription(&self) -> Result<(&str, &str), TransportError> {
        self.subscription
            .as_ref()
            .map(|(endpoint, group)| (endpoint.as_str(), group.as_str()))
            .ok_or(TransportError::NotSubscribed)
    }

    fn try_next(&mut self) -> Result<Option<Envelope>, TransportError> {
        let endpoint = self.subscription()?.0.to_string();
        let count = self.partitions.len();
        for step in 0..count {
            let index = (self.next_partition + step) % count;
            let partition = self.partitions[index];
            let offset = self.cursors.get(&partition).copied().unwrap_or(0);
            if let Some(envelope) = self
                .broker
                .read_at(&endpoint, Position::new(partition, offset))?
            {
                self.cursors.insert(partition, offset + 1);
                self.next_partition = (index + 1) % count;
                return Ok(Some(envelope));
            }
        }
        Ok(None)
    }
}

impl Consumer for InMemoryConsumer {
    fn subscribe(&mut self, endpoint: &str, group: &str) -> Result<(), TransportError> {
        self.broker.check_available()?;
        self.cursors = self
            .partitions
            .iter()
            .map(|&partition| {
                let next = self.broker.committed(endpoint, group, partition).unwrap_or(0);
                (partition, next)
            })
            .collect();
        self.subscription = Some((endpoint.to_string(), group.to_string()));
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> Result<Option<Envelope>, TransportError> {
        if !self.connected {
            return Err(TransportError::ConnectionFailed("consumer closed".into()));
        }
        let deadline = Instant::now() + timeout;

        loop {
            self.broker.check_available()?;
            if let Some(envelope) = self.try_next()? {
                return Ok(Some(envelope));
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }

            // Small sleep to avoid busy-waiting
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn ack(&mut self, position: &Position) -> Result<(), TransportError> {
        self.broker.check_available()?;
        let (endpoint, group) = self.subscription()?;
        self.broker.commit(endpoint, group, position)
    }

    fn seek(&mut self, position: &Position) -> Result<(), TransportError> {
        self.subscription()?;
        self.cursors.insert(position.partition, position.offset);
        Ok(())
    }
}

impl Connection for InMemoryConsumer {
    fn connect(&mut self) -> Result<(), TransportError> {
        self.broker
            .check_available()
            .map_err(|_| TransportError::ConnectionFailed("in-memory broker offline".into()))?;
        self.connected = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        Ok(())
    }
}
