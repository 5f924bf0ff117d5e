use std::time::{Duration, Instant};

/// Timings and byte counts of one network attempt.
///
/// Connection time runs from connect start to the status line; turnaround
/// runs from there to the end of the body. Each is recorded once and then
/// frozen.
#[derive(Debug, Clone, Default)]
pub struct NetworkProfile {
    mark:            Option<Instant>,
    connection_time: Option<Duration>,
    turnaround_time: Option<Duration>,
    download_bytes:  u64,
}

impl NetworkProfile {
    pub fn new() -> Self { Self::default() }

    pub fn on_connect_start(&mut self) {
        if self.connection_time.is_none() {
            self.mark = Some(Instant::now());
        }
    }

    pub fn on_connection_completed(&mut self) {
        if self.connection_time.is_some() {
            return;
        }
        if let Some(started) = self.mark {
            self.connection_time = Some(started.elapsed());
            self.mark = Some(Instant::now());
        }
    }

    pub fn on_download_step(&mut self, bytes: u64) {
        if self.turnaround_time.is_none() {
            self.download_bytes += bytes;
        }
    }

    pub fn on_download_completed(&mut self) {
        if self.turnaround_time.is_some() || self.connection_time.is_none() {
            return;
        }
        self.turnaround_time = self.mark.map(|started| started.elapsed());
    }

    pub fn connection_time(&self) -> Option<Duration> { self.connection_time }

    pub fn turnaround_time(&self) -> Option<Duration> { self.turnaround_time }

    pub fn download_bytes(&self) -> u64 { self.download_bytes }

    /// Throughput in Mbit/s. Zero before the connection completed; computed
    /// against the running clock until the download completes.
    pub fn network_speed_mbps(&self) -> f64 {
        if self.connection_time.is_none() {
            return 0.0;
        }
        let window = match (self.turnaround_time, self.mark) {
            (Some(turnaround), _) => turnaround,
            (None, Some(started)) => started.elapsed(),
            (None, None) => return 0.0,
        };
        let secs = window.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        megabits(self.download_bytes) / secs
    }
}

fn megabits(bytes: u64) -> f64 { (bytes as f64 * 8.0) / 1024.0 / 1024.0 }
