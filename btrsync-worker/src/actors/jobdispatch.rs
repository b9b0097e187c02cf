use std::cmp::max;
use std::time::Duration;

use anyhow::Result;
use btrsync_core::core::engine::run_cycle;
use btrsync_core::model::config::Config;
use slog::{debug, info, o, Logger};
use xactor::{message, Actor, Context, Handler};

use crate::actorbase::unhandled_error;

const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(60);

/// Ticks `run_cycle` on the configured `daemon.scan_interval`,
/// self-rescheduling via `ctx.send_later` the way the teacher's dispatcher
/// re-evaluates job readiness.
pub struct JobDispatchActor {
    config: Config,
    scan_interval: Duration,
    log: Logger,
}

#[message()]
struct TickMessage();

impl JobDispatchActor {
    pub fn new(config: Config, log: &Logger) -> Self {
        let scan_interval = config.daemon.scan_interval.unwrap_or(DEFAULT_SCAN_INTERVAL);
        Self {
            config,
            scan_interval,
            log: log.new(o!("actor" => "job_dispatch")),
        }
    }
}

#[async_trait::async_trait]
impl Actor for JobDispatchActor {
    async fn started(&mut self, ctx: &mut Context<Self>) -> Result<()> {
        ctx.address().send(TickMessage())?;
        info!(self.log, "job dispatch actor started"; "scan_interval" => humantime::format_duration(self.scan_interval).to_string());
        Ok(())
    }

    async fn stopped(&mut self, _ctx: &mut Context<Self>) {
        info!(self.log, "job dispatch actor stopped");
    }
}

#[async_trait::async_trait]
impl Handler<TickMessage> for JobDispatchActor {
    async fn handle(&mut self, ctx: &mut Context<Self>, _msg: TickMessage) {
        debug!(self.log, "running replication cycle");
        match run_cycle(&self.config, &self.log).await {
            Ok(report) => info!(self.log, "replication cycle complete";
                "subvolumes" => report.subvolumes_scanned,
                "snapshots_created" => report.snapshots_created,
                "snapshots_pruned" => report.snapshots_pruned,
                "mirrors_synced" => report.mirrors_synced,
                "mirror_entries_pruned" => report.mirror_entries_pruned),
            Err(e) => unhandled_error(&self.log, e),
        }
        ctx.send_later(TickMessage(), max(self.scan_interval, Duration::from_secs(1)));
    }
}
