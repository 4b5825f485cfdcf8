//! Pipeline statistics and metrics.

use std::collections::BTreeMap;
use std::time::Duration;

use contracts::SensorHandle;
use dispatcher::RuntimeReport;

/// What one demo client saw
#[derive(Debug, Clone, Default)]
pub struct ClientStats {
    pub package: String,
    /// Subscriptions accepted
    pub subscribed: usize,
    /// Subscriptions rejected (permission, mode, unknown handle)
    pub rejected: usize,
    /// Chunks read from the queue
    pub chunks: u64,
    /// Sensor events, flush completions excluded
    pub events: u64,
    pub wake_up_events: u64,
    pub flush_completions: u64,
    pub per_sensor: BTreeMap<SensorHandle, u64>,
}

/// Statistics from a pipeline run
#[derive(Debug, Clone)]
pub struct PipelineStats {
    /// Total duration of the run
    pub duration: Duration,

    /// Final runtime accounting
    pub report: RuntimeReport,

    /// Per demo client
    pub clients: Vec<ClientStats>,
}

impl PipelineStats {
    /// Delivered events per second
    pub fn events_per_sec(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.report.runtime.events_delivered as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        let runtime = &self.report.runtime;
        let ingestion = &self.report.ingestion;
        let status = &self.report.final_status;

        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                      Engine Statistics                       ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");

        println!("📊 Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Device polls: {} ({} empty)", ingestion.polls, ingestion.empty_polls);
        println!("   ├─ Batches: {} (max {} events)", runtime.batches, ingestion.max_batch);
        println!("   ├─ Events delivered: {}", runtime.events_delivered);
        println!("   ├─ Events/s: {:.2}", self.events_per_sec());
        println!("   ├─ Commands: {} ({} failed)", runtime.commands, runtime.command_failures);
        println!("   ├─ Watchdog releases: {}", runtime.watchdog_releases);
        println!("   └─ Final mode: {}", status.mode);

        println!("\n📈 {}", self.report.dispatch);

        if !self.clients.is_empty() {
            println!("👥 Clients ({})", self.clients.len());
            for (i, client) in self.clients.iter().enumerate() {
                let is_last = i == self.clients.len() - 1;
                let prefix = if is_last { "└─" } else { "├─" };
                println!(
                    "   {} {}: {} events in {} chunks, {} wake-up, {} flush completions, {}/{} subscriptions",
                    prefix,
                    client.package,
                    client.events,
                    client.chunks,
                    client.wake_up_events,
                    client.flush_completions,
                    client.subscribed,
                    client.subscribed + client.rejected,
                );
                let child_prefix = if is_last { "   " } else { "│  " };
                for (handle, count) in &client.per_sensor {
                    println!("   {}   {}: {}", child_prefix, handle, count);
                }
            }
        }

        if !status.recent_registrations.is_empty() {
            println!("\n📝 Recent registrations: {}", status.recent_registrations.len());
        }

        println!();
    }
}
