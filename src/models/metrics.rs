use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Received,
    Deduped,
    Sent,
    Failed,
    Dlq,
}

impl Metric {
    pub const ALL: [Metric; 5] = [
        Metric::Received,
        Metric::Deduped,
        Metric::Sent,
        Metric::Failed,
        Metric::Dlq,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Received => "received",
            Metric::Deduped => "deduped",
            Metric::Sent => "sent",
            Metric::Failed => "failed",
            Metric::Dlq => "dlq",
        }
    }

    pub fn key(&self) -> String {
        format!("metrics:{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub received: u64,
    pub deduped: u64,
    pub sent: u64,
    pub failed: u64,
    pub dlq: u64,
}

impl MetricsSnapshot {
    pub fn set(&mut self, metric: Metric, value: u64) {
        match metric {
            Metric::Received => self.received = value,
            Metric::Deduped => self.deduped = value,
            Metric::Sent => self.sent = value,
            Metric::Failed => self.failed = value,
            Metric::Dlq => self.dlq = value,
        }
    }

    pub fn get(&self, metric: Metric) -> u64 {
        match metric {
            Metric::Received => self.received,
            Metric::Deduped => self.deduped,
            Metric::Sent => self.sent,
            Metric::Failed => self.failed,
            Metric::Dlq => self.dlq,
        }
    }
}
