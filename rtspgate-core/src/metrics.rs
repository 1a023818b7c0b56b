//! Prometheus metrics exposed on `/metrics`.

use prometheus::{Encoder, Registry, TextEncoder};

/// Global metrics registry
pub static REGISTRY: std::sync::LazyLock<Registry> = std::sync::LazyLock::new(Registry::new);

/// Session lifecycle
pub mod sessions {
    use super::REGISTRY;
    use prometheus::{
        register_int_counter_with_registry, register_int_gauge_vec_with_registry, IntCounter,
        IntGaugeVec,
    };

    /// Sessions per lifecycle state
    pub static BY_STATE: std::sync::LazyLock<IntGaugeVec> = std::sync::LazyLock::new(|| {
        register_int_gauge_vec_with_registry!(
            "rtspgate_sessions",
            "Number of sessions in each lifecycle state",
            &["state"],
            REGISTRY.clone()
        )
        .expect("Failed to register sessions gauge")
    });

    /// Pipeline restarts (manual and supervised)
    pub static RESTARTS_TOTAL: std::sync::LazyLock<IntCounter> = std::sync::LazyLock::new(|| {
        register_int_counter_with_registry!(
            "rtspgate_session_restarts_total",
            "Total number of pipeline restarts",
            REGISTRY.clone()
        )
        .expect("Failed to register restarts counter")
    });

    /// Sessions that gave up after the retry budget was spent
    pub static RETRIES_EXHAUSTED_TOTAL: std::sync::LazyLock<IntCounter> =
        std::sync::LazyLock::new(|| {
            register_int_counter_with_registry!(
                "rtspgate_session_retries_exhausted_total",
                "Total number of sessions whose restart budget ran out",
                REGISTRY.clone()
            )
            .expect("Failed to register retries exhausted counter")
        });
}

/// History store
pub mod history {
    use super::REGISTRY;
    use prometheus::{register_int_counter_vec_with_registry, IntCounterVec};

    pub static RECORDS_TOTAL: std::sync::LazyLock<IntCounterVec> = std::sync::LazyLock::new(|| {
        register_int_counter_vec_with_registry!(
            "rtspgate_history_records_total",
            "Total number of history records by status",
            &["status"],
            REGISTRY.clone()
        )
        .expect("Failed to register history counter")
    });
}

/// Media plane
pub mod media {
    use super::REGISTRY;
    use prometheus::{
        register_int_counter_with_registry, register_int_gauge_with_registry, IntCounter, IntGauge,
    };

    pub static INGEST_CONNECTIONS: std::sync::LazyLock<IntGauge> = std::sync::LazyLock::new(|| {
        register_int_gauge_with_registry!(
            "rtspgate_ingest_connections",
            "Current number of RTMP connections",
            REGISTRY.clone()
        )
        .expect("Failed to register ingest connections gauge")
    });

    pub static INGEST_BYTES_TOTAL: std::sync::LazyLock<IntCounter> = std::sync::LazyLock::new(|| {
        register_int_counter_with_registry!(
            "rtspgate_ingest_bytes_total",
            "Total media payload bytes received from publishers",
            REGISTRY.clone()
        )
        .expect("Failed to register ingest bytes counter")
    });

    pub static DROPPED_FRAMES_TOTAL: std::sync::LazyLock<IntCounter> =
        std::sync::LazyLock::new(|| {
            register_int_counter_with_registry!(
                "rtspgate_dropped_frames_total",
                "Frames dropped because a pipeline or subscriber queue was full",
                REGISTRY.clone()
            )
            .expect("Failed to register dropped frames counter")
        });

    pub static EGRESS_SUBSCRIBERS: std::sync::LazyLock<IntGauge> = std::sync::LazyLock::new(|| {
        register_int_gauge_with_registry!(
            "rtspgate_egress_subscribers",
            "Current number of playing RTSP subscribers",
            REGISTRY.clone()
        )
        .expect("Failed to register egress subscribers gauge")
    });

    pub static EGRESS_BYTES_TOTAL: std::sync::LazyLock<IntCounter> = std::sync::LazyLock::new(|| {
        register_int_counter_with_registry!(
            "rtspgate_egress_bytes_total",
            "Total RTP bytes written to subscribers",
            REGISTRY.clone()
        )
        .expect("Failed to register egress bytes counter")
    });
}

/// Host resources as seen by the Supervisor
pub mod system {
    use super::REGISTRY;
    use prometheus::{register_gauge_with_registry, register_int_gauge_with_registry, Gauge, IntGauge};

    pub static CPU_PERCENT: std::sync::LazyLock<Gauge> = std::sync::LazyLock::new(|| {
        register_gauge_with_registry!(
            "rtspgate_cpu_percent",
            "Host CPU usage in percent",
            REGISTRY.clone()
        )
        .expect("Failed to register cpu gauge")
    });

    pub static MEMORY_PERCENT: std::sync::LazyLock<Gauge> = std::sync::LazyLock::new(|| {
        register_gauge_with_registry!(
            "rtspgate_memory_percent",
            "Host memory usage in percent",
            REGISTRY.clone()
        )
        .expect("Failed to register memory gauge")
    });

    /// 1 while new sessions are admitted, 0 while the capacity cap holds
    pub static ADMISSION_OPEN: std::sync::LazyLock<IntGauge> = std::sync::LazyLock::new(|| {
        register_int_gauge_with_registry!(
            "rtspgate_admission_open",
            "Whether new sessions are currently admitted",
            REGISTRY.clone()
        )
        .expect("Failed to register admission gauge")
    });
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|_| prometheus::Error::Msg("Invalid UTF-8".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        sessions::BY_STATE.with_label_values(&["active"]).set(1);
        sessions::RESTARTS_TOTAL.inc();
        media::INGEST_BYTES_TOTAL.inc_by(10);
        system::CPU_PERCENT.set(12.5);

        let output = gather_metrics().unwrap();
        assert!(output.contains("rtspgate_sessions"));
        assert!(output.contains("rtspgate_session_restarts_total"));
        assert!(output.contains("rtspgate_cpu_percent"));
    }
}
