//! Periodic self-reporting of load and storage statistics.

use crate::{
    lattice::{last_writer_wins::Timestamp, LastWriterWinsLattice},
    messages::{
        management::CacheListQuery,
        stats::{KeyAccessSnapshot, KeyCount, KeySizeSnapshot, ThreadStatistics},
        KeyRequest, PutTuple, RequestOperation, Tier,
    },
    metadata::{MetadataKey, ReportKind},
    topics::{ManagementThread, ServerThread},
    Key, LatticeValue,
};
use eyre::Context;
use std::{
    collections::{BTreeSet, HashMap},
    time::{Duration, Instant},
};

/// Access timestamps older than this are dropped from the tracker, so the
/// reported frequencies cover a sliding window.
const KEY_MONITORING_WINDOW: Duration = Duration::from_secs(60);

/// Event classes whose busy time is accounted separately.
///
/// The discriminants index into the reporter's per-event table and are part
/// of the log output, so they must stay stable.
#[derive(Debug, Clone, Copy)]
pub enum EventClass {
    /// Node join messages.
    NodeJoin = 0,
    /// Node departure messages.
    NodeDepart = 1,
    /// Self-depart handling.
    SelfDepart = 2,
    /// Client requests.
    Request = 3,
    /// Inbound gossip.
    Gossip = 4,
    /// Replication-factor responses.
    ReplicationResponse = 5,
    /// Replication-factor changes.
    ReplicationChange = 6,
    /// Cache key-set responses.
    CacheKeys = 7,
    /// Management-plane responses.
    Management = 8,
    /// Outbound gossip rounds.
    GossipSend = 9,
}

const EVENT_CLASSES: usize = 10;

/// Collects per-epoch statistics and renders them into report messages.
pub struct Reporter {
    /// Start of the current reporting epoch.
    report_start: Instant,
    /// Total busy time in the current epoch.
    working_time: Duration,
    /// Busy time per event class in the current epoch.
    working_time_per_event: [Duration; EVENT_CLASSES],
    /// Key accesses served in the current epoch.
    access_count: usize,
    /// Access timestamps per key, covering the monitoring window.
    key_access_tracker: HashMap<Key, BTreeSet<Instant>>,
    /// Number of completed epochs.
    epoch: usize,
    /// The management node to ask for the cache list each epoch.
    management_id: Option<String>,
}

impl Reporter {
    /// Creates an empty reporter.
    pub fn new(management_id: Option<String>) -> Self {
        Self {
            report_start: Instant::now(),
            working_time: Duration::ZERO,
            working_time_per_event: [Duration::ZERO; EVENT_CLASSES],
            access_count: 0,
            key_access_tracker: Default::default(),
            epoch: 0,
            management_id,
        }
    }

    /// Start of the current reporting epoch.
    pub fn report_start(&self) -> Instant {
        self.report_start
    }

    /// Accounts busy time to an event class.
    pub fn record_event_time(&mut self, class: EventClass, elapsed: Duration) {
        self.working_time += elapsed;
        self.working_time_per_event[class as usize] += elapsed;
    }

    /// Records one access to a key.
    pub fn record_key_access(&mut self, key: &Key, at: Instant) {
        self.key_access_tracker
            .entry(key.clone())
            .or_default()
            .insert(at);
        self.access_count += 1;
    }

    #[cfg(test)]
    pub fn access_count(&self) -> usize {
        self.access_count
    }

    #[cfg(test)]
    pub fn key_access_count(&self, key: &Key) -> usize {
        self.key_access_tracker
            .get(key)
            .map(|accesses| accesses.len())
            .unwrap_or_default()
    }

    /// Closes the current epoch: builds the three report messages, asks the
    /// management plane for the current cache list, garbage-collects the
    /// access tracker, and resets the per-epoch counters.
    ///
    /// The returned messages are PUTs that the caller must route to the
    /// threads responsible for the respective metadata keys.
    pub async fn next_epoch(
        &mut self,
        elapsed: Duration,
        tier: Tier,
        wt: &ServerThread,
        key_sizes: KeySizeSnapshot,
        storage_consumption: u64,
        zenoh: &zenoh::Session,
        zenoh_prefix: &str,
    ) -> eyre::Result<Vec<ReportMessage>> {
        self.epoch += 1;
        let timestamp = Timestamp::now();

        let stats = self.build_statistics_report(elapsed, tier, wt, timestamp, storage_consumption)?;
        let access = self.build_access_report(tier, wt, timestamp)?;
        let sizes = build_size_report(tier, wt, timestamp, key_sizes)?;

        if let Some(management_id) = &self.management_id {
            let query = CacheListQuery {
                response_topic: wt.management_response_topic(zenoh_prefix),
            };
            let serialized = serde_json::to_string(&query)
                .context("failed to serialize cache list query")?;
            zenoh
                .put(
                    &ManagementThread::new(management_id.clone())
                        .cache_list_query_topic(zenoh_prefix),
                    serialized,
                )
                .await
                .map_err(|e| eyre::eyre!(e))
                .context("failed to query the management plane for caches")?;
        }

        self.report_start = Instant::now();
        self.access_count = 0;
        self.working_time = Duration::ZERO;
        self.working_time_per_event = [Duration::ZERO; EVENT_CLASSES];

        Ok(vec![stats, access, sizes])
    }

    fn build_statistics_report(
        &self,
        elapsed: Duration,
        tier: Tier,
        wt: &ServerThread,
        timestamp: Timestamp,
        storage_consumption: u64,
    ) -> eyre::Result<ReportMessage> {
        for (index, busy) in self.working_time_per_event.iter().enumerate() {
            let event_occupancy = busy.as_secs_f64() / elapsed.as_secs_f64();
            if event_occupancy > 0.02 {
                log::info!("event {} occupancy is {:.3}", index, event_occupancy);
            }
        }

        let occupancy = self.working_time.as_secs_f64() / elapsed.as_secs_f64();
        if occupancy > 0.02 {
            log::info!("occupancy is {:.3}", occupancy);
        }

        let statistics = ThreadStatistics {
            storage_consumption: storage_consumption / 1000, // KB
            occupancy,
            epoch: self.epoch,
            access_count: self.access_count,
        };

        build_report(
            MetadataKey::PerThread {
                tier,
                thread: wt.clone(),
                kind: ReportKind::ServerStats,
            },
            timestamp,
            serde_json::to_vec(&statistics).context("failed to serialize ThreadStatistics")?,
        )
    }

    fn build_access_report(
        &mut self,
        tier: Tier,
        wt: &ServerThread,
        timestamp: Timestamp,
    ) -> eyre::Result<ReportMessage> {
        // drop every entry that fell out of the monitoring window, then
        // report the survivors
        let horizon = Instant::now() - KEY_MONITORING_WINDOW;
        let mut snapshot = KeyAccessSnapshot::default();

        self.key_access_tracker.retain(|key, accesses| {
            *accesses = accesses.split_off(&horizon);
            if accesses.is_empty() {
                return false;
            }
            snapshot.keys.push(KeyCount {
                key: key.clone(),
                access_count: accesses.len(),
            });
            true
        });

        build_report(
            MetadataKey::PerThread {
                tier,
                thread: wt.clone(),
                kind: ReportKind::KeyAccess,
            },
            timestamp,
            serde_json::to_vec(&snapshot).context("failed to serialize KeyAccessSnapshot")?,
        )
    }
}

fn build_size_report(
    tier: Tier,
    wt: &ServerThread,
    timestamp: Timestamp,
    key_sizes: KeySizeSnapshot,
) -> eyre::Result<ReportMessage> {
    build_report(
        MetadataKey::PerThread {
            tier,
            thread: wt.clone(),
            kind: ReportKind::KeySize,
        },
        timestamp,
        serde_json::to_vec(&key_sizes).context("failed to serialize KeySizeSnapshot")?,
    )
}

fn build_report(
    key: MetadataKey,
    timestamp: Timestamp,
    payload: Vec<u8>,
) -> eyre::Result<ReportMessage> {
    let request = KeyRequest {
        request_id: None,
        response_address: None,
        address_cache_size: Default::default(),
        operation: RequestOperation::Put {
            tuples: vec![PutTuple {
                key: key.clone().into(),
                value: LatticeValue::Lww(LastWriterWinsLattice::from_pair(timestamp, payload)),
            }],
        },
    };
    Ok(ReportMessage { key, request })
}

/// One report, addressed by the metadata key it must be stored under.
pub struct ReportMessage {
    /// The metadata key identifying the responsible threads.
    pub key: MetadataKey,
    /// The PUT carrying the serialized report.
    pub request: KeyRequest,
}
