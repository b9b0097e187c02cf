use anyhow::Result;
use btrsync_core::model::storage::load_config;
use slog::{error, info, Logger};
use xactor::{Actor, Addr, Context};

use super::jobdispatch::JobDispatchActor;
use super::server::ServerActor;
use crate::xactorext::BcActor;

/// Top-level supervisor: loads the configuration, then starts the job
/// dispatcher and the status server underneath it.
pub struct CaptainActor {
    log: Logger,
    jobdispatch_actor: Option<Addr<JobDispatchActor>>,
    server_actor: Option<Addr<BcActor<ServerActor>>>,
}

impl CaptainActor {
    pub fn new(log: &Logger) -> Self {
        Self {
            log: log.clone(),
            jobdispatch_actor: None,
            server_actor: None,
        }
    }
}

#[async_trait::async_trait]
impl Actor for CaptainActor {
    async fn started(&mut self, _ctx: &mut Context<Self>) -> Result<()> {
        let config = load_config(None)?;

        self.server_actor = Some(ServerActor::new(&self.log).start().await?);
        self.jobdispatch_actor = Some(JobDispatchActor::new(config, &self.log).start().await?);

        info!(self.log, "captain actor started successfully");
        Ok(())
    }

    async fn stopped(&mut self, _ctx: &mut Context<Self>) {
        if let Some(actor) = self.jobdispatch_actor.as_mut() {
            actor.stop(None).unwrap_or_else(|e| error!(self.log, "stopping job dispatch actor failed"; "error" => %e));
        }
        if let Some(actor) = self.server_actor.as_mut() {
            actor.stop(None).unwrap_or_else(|e| error!(self.log, "stopping server actor failed"; "error" => %e));
        }

        if let Some(actor) = self.jobdispatch_actor.take() {
            actor.wait_for_stop().await;
        }
        if let Some(actor) = self.server_actor.take() {
            actor.wait_for_stop().await;
        }

        info!(self.log, "captain stopped successfully");
    }
}
