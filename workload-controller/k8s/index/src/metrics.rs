use crate::{routing::Router, store::SharedStore};
use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeMetric},
    metrics::{gauge::ConstGauge, MetricType},
    registry::Registry,
};

#[derive(Debug)]
struct Instrumented {
    store: SharedStore,
    router: Router,
}

pub fn register(reg: &mut Registry, store: SharedStore, router: Router) {
    reg.register_collector(Box::new(Instrumented { store, router }));
}

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        let (workloads, pods) = {
            let store = self.store.read();
            (store.len(), store.pod_count())
        };

        let workloads_encoder = encoder.encode_descriptor(
            "workload_index_size",
            "The number of workloads in index",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(workloads as i64).encode(workloads_encoder)?;

        let pods_encoder = encoder.encode_descriptor(
            "pod_index_size",
            "The number of pods in index",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(pods as i64).encode(pods_encoder)?;

        let generation_encoder = encoder.encode_descriptor(
            "routing_table_generation",
            "The generation of the installed routing table",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(self.router.generation() as i64).encode(generation_encoder)?;

        Ok(())
    }
}
