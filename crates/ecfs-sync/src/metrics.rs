//! Prometheus transfer metrics.

use std::time::Duration;

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

type Labels = Vec<(String, String)>;

#[derive(Clone)]
pub struct TransferMetrics {
    chunks_uploaded: Counter,
    chunks_downloaded: Counter,
    bytes: Family<Labels, Counter>,
    failed: Family<Labels, Counter>,
    duration: Family<Labels, Histogram>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

impl Direction {
    fn labels(self) -> Labels {
        let d = match self {
            Direction::Upload => "upload",
            Direction::Download => "download",
        };
        vec![("direction".to_string(), d.to_string())]
    }
}

impl TransferMetrics {
    pub fn new(registry: &mut Registry) -> Self {
        let chunks_uploaded = Counter::default();
        let chunks_downloaded = Counter::default();
        let bytes = Family::default();
        let failed = Family::default();
        let duration = Family::<Labels, Histogram>::new_with_constructor(|| {
            Histogram::new([0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 1800.0])
        });

        registry.register(
            "ecfs_chunks_uploaded",
            "Encrypted chunks accepted by the ingest endpoint",
            chunks_uploaded.clone(),
        );
        registry.register(
            "ecfs_chunks_downloaded",
            "Chunks fetched and decrypted",
            chunks_downloaded.clone(),
        );
        registry.register(
            "ecfs_transfer_bytes",
            "Plaintext bytes moved, by direction",
            bytes.clone(),
        );
        registry.register(
            "ecfs_transfers_failed",
            "Whole-file transfers that failed, by direction",
            failed.clone(),
        );
        registry.register(
            "ecfs_transfer_duration_seconds",
            "Whole-file transfer duration in seconds",
            duration.clone(),
        );

        Self {
            chunks_uploaded,
            chunks_downloaded,
            bytes,
            failed,
            duration,
        }
    }

    pub fn chunk_uploaded(&self) {
        self.chunks_uploaded.inc();
    }

    pub fn chunk_downloaded(&self) {
        self.chunks_downloaded.inc();
    }

    pub fn transfer_done(&self, direction: Direction, bytes: u64, elapsed: Duration) {
        let labels = direction.labels();
        self.bytes.get_or_create(&labels).inc_by(bytes);
        self.duration
            .get_or_create(&labels)
            .observe(elapsed.as_secs_f64());
    }

    pub fn transfer_failed(&self, direction: Direction) {
        self.failed.get_or_create(&direction.labels()).inc();
    }
}

/// Render a registry in OpenMetrics text format.
pub fn encode_text(registry: &Registry) -> anyhow::Result<String> {
    let mut body = String::new();
    encode(&mut body, registry).map_err(|e| anyhow::anyhow!("metrics encode failed: {e}"))?;
    Ok(body)
}
