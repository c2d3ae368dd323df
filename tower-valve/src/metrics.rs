use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;

/// Counters shared by every admission stage, labelled with the stage name.
#[derive(Clone, Debug)]
pub(crate) struct Instruments {
    admitted: Counter<u64>,
    rejected: Counter<u64>,
    lock_busy: Counter<u64>,
}

impl Instruments {
    pub(crate) fn new() -> Self {
        let meter = global::meter("tower_valve");
        Self {
            admitted: meter.u64_counter("valve.admitted").build(),
            rejected: meter.u64_counter("valve.rejected").build(),
            lock_busy: meter.u64_counter("valve.lock_busy").build(),
        }
    }

    pub(crate) fn admitted(&self, stage: &'static str) {
        self.admitted.add(1, &[KeyValue::new("stage", stage)]);
    }

    pub(crate) fn rejected(&self, stage: &'static str) {
        self.rejected.add(1, &[KeyValue::new("stage", stage)]);
    }

    pub(crate) fn lock_busy(&self, stage: &'static str) {
        self.lock_busy.add(1, &[KeyValue::new("stage", stage)]);
    }
}
