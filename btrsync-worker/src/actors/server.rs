use anyhow::Result;
use btrsync_core::core::system::{ActiveState, ActorState, SystemActor, SystemState};
use btrsync_core::runtime_dir;
use futures_util::FutureExt;
use slog::Logger;
use tokio::{net::UnixListener, sync::oneshot, task::JoinHandle};
use tokio_stream::wrappers::UnixListenerStream;
use warp::Filter;

use crate::xactorext::{BcActor, BcActorCtrl};

/// Serves the daemon's status over a Unix socket (`daemon.sock` under
/// [`runtime_dir`]), queried by `btrsync-ctl serve status`.
pub struct ServerActor {
    server: Option<(JoinHandle<()>, oneshot::Sender<()>)>,
}

impl ServerActor {
    pub fn new(log: &Logger) -> BcActor<Self> {
        BcActor::new(Self { server: None }, log)
    }
}

#[async_trait::async_trait]
impl BcActorCtrl for ServerActor {
    async fn started(&mut self, log: &Logger, _ctx: &mut xactor::Context<BcActor<Self>>) -> Result<()> {
        let (sender, receiver) = oneshot::channel::<()>();
        let signal = receiver.map(|_| ());

        let dir = runtime_dir();
        std::fs::create_dir_all(&dir)?;

        let socket_path = dir.join("daemon.sock");
        if socket_path.exists() {
            std::fs::remove_file(&socket_path)?;
        }
        let listener = UnixListener::bind(socket_path)?;
        let server_log = log.clone();
        let handle = tokio::spawn(async move {
            let incoming = UnixListenerStream::new(listener);

            let routes = warp::path("status").and(warp::get()).map(move || {
                let state = SystemState {
                    actors: vec![SystemActor {
                        actor_id: 0,
                        actor_type: "server".to_owned(),
                        actor_state: ActorState::Started(ActiveState::Custom("listening".to_owned())),
                    }],
                };
                warp::reply::json(&state)
            });

            warp::serve(routes)
                .serve_incoming_with_graceful_shutdown(incoming, signal)
                .await;
            slog::trace!(server_log, "status server shut down");
        });
        self.server = Some((handle, sender));
        Ok(())
    }

    async fn stopped(&mut self, _log: &Logger, _ctx: &mut xactor::Context<BcActor<Self>>) {
        if let Some((handle, sender)) = self.server.take() {
            if sender.send(()).is_ok() {
                let _ = handle.await;
            }
        }
    }
}
