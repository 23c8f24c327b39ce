//! Scheduler telemetry.
//!
//! The `record_*` functions are always available and are no-ops unless the
//! `metrics` Cargo feature is enabled. With the feature, [`init_metrics`]
//! wires an OTLP exporter for traces and metrics and the counters below are
//! exported through it.

/// Partition lifecycle events counted by [`record_event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerEvent {
    AlarmArmed,
    AlarmAlreadyPending,
    AlarmFired,
    PartitionActivated,
    PartitionRetired,
}

impl SchedulerEvent {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AlarmArmed => "alarm_armed",
            Self::AlarmAlreadyPending => "alarm_already_pending",
            Self::AlarmFired => "alarm_fired",
            Self::PartitionActivated => "partition_activated",
            Self::PartitionRetired => "partition_retired",
        }
    }
}

#[cfg(feature = "metrics")]
pub use otlp::{MetricsError, MetricsGuard, init_metrics};

/// Count one scheduler event.
#[cfg(feature = "metrics")]
pub fn record_event(event: SchedulerEvent) {
    otlp::instruments()
        .events
        .add(1, &[opentelemetry::KeyValue::new("event", event.as_str())]);
}

/// Count one finished delivery attempt, labelled by outcome.
#[cfg(feature = "metrics")]
pub fn record_delivery(outcome: &'static str) {
    otlp::instruments()
        .deliveries
        .add(1, &[opentelemetry::KeyValue::new("outcome", outcome)]);
}

#[cfg(not(feature = "metrics"))]
pub const fn record_event(_event: SchedulerEvent) {}

#[cfg(not(feature = "metrics"))]
pub const fn record_delivery(_outcome: &'static str) {}

#[cfg(feature = "metrics")]
mod otlp {
    use std::sync::OnceLock;

    use opentelemetry::global;
    use opentelemetry::metrics::Counter;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::Resource;
    use opentelemetry_sdk::metrics::SdkMeterProvider;
    use opentelemetry_sdk::trace::SdkTracerProvider;

    const SERVICE_NAME: &str = "pushtimer-server";

    #[derive(Debug, thiserror::Error)]
    pub enum MetricsError {
        #[error("failed to build OTLP exporter: {0}")]
        ExporterBuild(#[from] opentelemetry_otlp::ExporterBuildError),

        #[error("OpenTelemetry SDK error: {0}")]
        Sdk(#[from] opentelemetry_sdk::error::OTelSdkError),
    }

    /// Keeps the providers alive. Dropping it does not flush; call
    /// [`MetricsGuard::shutdown`] before exiting.
    pub struct MetricsGuard {
        tracer_provider: SdkTracerProvider,
        meter_provider: SdkMeterProvider,
    }

    impl MetricsGuard {
        /// The tracer provider backing the `tracing-opentelemetry` layer.
        pub const fn tracer_provider(&self) -> &SdkTracerProvider {
            &self.tracer_provider
        }

        /// Flush and shut down both providers.
        pub fn shutdown(self) -> Result<(), MetricsError> {
            self.tracer_provider.shutdown()?;
            self.meter_provider.shutdown()?;
            Ok(())
        }
    }

    pub(super) struct Instruments {
        pub(super) events: Counter<u64>,
        pub(super) deliveries: Counter<u64>,
    }

    /// Counters on the global meter. Created on first use, so events recorded
    /// before [`init_metrics`] go to the no-op provider.
    pub(super) fn instruments() -> &'static Instruments {
        static INSTRUMENTS: OnceLock<Instruments> = OnceLock::new();
        INSTRUMENTS.get_or_init(|| {
            let meter = global::meter("pushtimer");
            Instruments {
                events: meter
                    .u64_counter("pushtimer.scheduler.events")
                    .with_description("Partition and alarm lifecycle events")
                    .build(),
                deliveries: meter
                    .u64_counter("pushtimer.deliveries")
                    .with_description("Timer-fired delivery attempts by outcome")
                    .build(),
            }
        })
    }

    /// Export traces and metrics to the OTLP (gRPC) receiver at `endpoint`,
    /// e.g. `http://localhost:4317`.
    pub fn init_metrics(endpoint: &str) -> Result<MetricsGuard, MetricsError> {
        let resource = Resource::builder().with_service_name(SERVICE_NAME).build();

        let tracer_provider = SdkTracerProvider::builder()
            .with_resource(resource.clone())
            .with_batch_exporter(
                opentelemetry_otlp::SpanExporter::builder()
                    .with_tonic()
                    .with_endpoint(endpoint)
                    .build()?,
            )
            .build();
        global::set_tracer_provider(tracer_provider.clone());

        let meter_provider = SdkMeterProvider::builder()
            .with_resource(resource)
            .with_periodic_exporter(
                opentelemetry_otlp::MetricExporter::builder()
                    .with_tonic()
                    .with_endpoint(endpoint)
                    .build()?,
            )
            .build();
        global::set_meter_provider(meter_provider.clone());

        Ok(MetricsGuard {
            tracer_provider,
            meter_provider,
        })
    }
}
