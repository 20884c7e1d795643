use crate::model::detection::{Method, Status};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MethodCounts {
    pub power_usage: u64,
    pub acoustic_noise: u64,
    pub rf_signal: u64,
    pub network_traffic: u64,
}

impl MethodCounts {
    pub fn get(&self, method: Method) -> u64 {
        match method {
            Method::PowerUsage => self.power_usage,
            Method::AcousticNoise => self.acoustic_noise,
            Method::RfSignal => self.rf_signal,
            Method::NetworkTraffic => self.network_traffic,
        }
    }

    pub fn increment(&mut self, method: Method) {
        match method {
            Method::PowerUsage => self.power_usage += 1,
            Method::AcousticNoise => self.acoustic_noise += 1,
            Method::RfSignal => self.rf_signal += 1,
            Method::NetworkTraffic => self.network_traffic += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StatusCounts {
    pub confirmed: u64,
    pub pending: u64,
    pub rejected: u64,
}

impl StatusCounts {
    pub fn get(&self, status: Status) -> u64 {
        match status {
            Status::Confirmed => self.confirmed,
            Status::UnderReview => self.pending,
            Status::Rejected => self.rejected,
        }
    }

    pub fn increment(&mut self, status: Status) {
        match status {
            Status::Confirmed => self.confirmed += 1,
            Status::UnderReview => self.pending += 1,
            Status::Rejected => self.rejected += 1,
        }
    }
}

/// Counters over one population of detections.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StatsBreakdown {
    pub total: u64,
    pub methods: MethodCounts,
    pub statuses: StatusCounts,
}

impl StatsBreakdown {
    pub fn record(&mut self, method: Method, status: Status) {
        self.total += 1;
        self.methods.increment(method);
        self.statuses.increment(status);
    }
}

/// Server-computed aggregate snapshot. The dashboard only reads it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Stats {
    pub all_time: StatsBreakdown,
    pub last_7_days: StatsBreakdown,
}
