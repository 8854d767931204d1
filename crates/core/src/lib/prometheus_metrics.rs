use prometheus::{
    core::{AtomicU64, GenericCounter, GenericCounterVec, GenericGauge},
    GaugeVec, IntGauge, Opts, Registry,
};

pub mod outcome {
    pub const SUCCESS: &str = "success";
    pub const ERROR: &str = "error";
}

pub type UIntGauge = GenericGauge<AtomicU64>;
pub type UIntCounter = GenericCounter<AtomicU64>;
pub type UIntCounterVec = GenericCounterVec<AtomicU64>;

pub trait Registar {
    fn register_on(&self, registry: &Registry) -> anyhow::Result<()>;
}

pub struct Metrics {
    pub metadata: Metadata,
    pub epochs: Epochs,
    pub beacon: Service,
}

impl Registar for Metrics {
    fn register_on(&self, registry: &Registry) -> anyhow::Result<()> {
        self.metadata.register_on(registry)?;
        self.epochs.register_on(registry)?;
        self.beacon.register_on(registry)?;
        Ok(())
    }
}

pub struct Metadata {
    pub network_chain: GaugeVec,
}

impl Registar for Metadata {
    fn register_on(&self, registry: &Registry) -> anyhow::Result<()> {
        registry.register(Box::new(self.network_chain.clone()))?;
        Ok(())
    }
}

pub struct Epochs {
    pub created_total: UIntCounter,
    pub processed_total: UIntCounter,
    pub step_outcomes: UIntCounterVec,
    pub current_epoch: IntGauge,
}

impl Registar for Epochs {
    fn register_on(&self, registry: &Registry) -> anyhow::Result<()> {
        registry.register(Box::new(self.created_total.clone()))?;
        registry.register(Box::new(self.processed_total.clone()))?;
        registry.register(Box::new(self.step_outcomes.clone()))?;
        registry.register(Box::new(self.current_epoch.clone()))?;
        Ok(())
    }
}

/// Per-operation counters for an outbound dependency.
#[derive(Clone)]
pub struct Service {
    pub call_count: UIntCounterVec,
    pub retry_count: UIntCounterVec,
    pub status: UIntCounterVec,
}

impl Registar for Service {
    fn register_on(&self, registry: &Registry) -> anyhow::Result<()> {
        registry.register(Box::new(self.call_count.clone()))?;
        registry.register(Box::new(self.retry_count.clone()))?;
        registry.register(Box::new(self.status.clone()))?;
        Ok(())
    }
}

impl Service {
    fn new(namespace: &str, service: &str) -> Self {
        Self {
            call_count: UIntCounterVec::new(
                Opts::new(format!("{service}_calls_total"), format!("Calls issued to {service}"))
                    .namespace(namespace.to_owned()),
                &["operation", "target"],
            )
            .expect("metric definition is valid"),
            retry_count: UIntCounterVec::new(
                Opts::new(format!("{service}_retries_total"), format!("Retries issued to {service}"))
                    .namespace(namespace.to_owned()),
                &["operation", "target"],
            )
            .expect("metric definition is valid"),
            status: UIntCounterVec::new(
                Opts::new(format!("{service}_status_total"), format!("Call outcomes for {service}"))
                    .namespace(namespace.to_owned()),
                &["operation", "outcome"],
            )
            .expect("metric definition is valid"),
        }
    }
}

impl Metrics {
    pub fn new(namespace: &str) -> Self {
        Self {
            metadata: Metadata {
                network_chain: GaugeVec::new(
                    Opts::new("network_chain", "Chain this indexer runs against").namespace(namespace.to_owned()),
                    &["chain"],
                )
                .expect("metric definition is valid"),
            },
            epochs: Epochs {
                created_total: UIntCounter::with_opts(
                    Opts::new("epochs_created_total", "Epoch rows created by the creator loop")
                        .namespace(namespace.to_owned()),
                )
                .expect("metric definition is valid"),
                processed_total: UIntCounter::with_opts(
                    Opts::new("epochs_processed_total", "Epochs fully processed").namespace(namespace.to_owned()),
                )
                .expect("metric definition is valid"),
                step_outcomes: UIntCounterVec::new(
                    Opts::new("epoch_step_outcomes_total", "Per-step processor outcomes")
                        .namespace(namespace.to_owned()),
                    &["step", "outcome"],
                )
                .expect("metric definition is valid"),
                current_epoch: IntGauge::with_opts(
                    Opts::new("current_epoch", "Epoch currently owned by the processor")
                        .namespace(namespace.to_owned()),
                )
                .expect("metric definition is valid"),
            },
            beacon: Service::new(namespace, "beacon_api"),
        }
    }
}
