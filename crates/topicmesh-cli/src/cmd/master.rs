//! `topicmesh master`

use super::{interrupted, CommandError};
use crate::{shell, ui};
use tokio::sync::oneshot;
use topicmesh_core::Master;
use topicmesh_types::config::MeshConfig;
use topicmesh_types::Address;
use tracing::info;

pub async fn run(
    config: &MeshConfig,
    listen: Option<Address>,
    with_shell: bool,
) -> Result<(), CommandError> {
    let mut master_config = config.master.clone();
    if let Some(listen) = listen {
        master_config.listen_addr = listen;
    }

    let master = Master::start(&master_config, config.transport.clone()).await?;
    ui::section("topicmesh master");
    ui::kv("Listening", &master.local_addr().to_string());

    let shell_done = if with_shell {
        shell::spawn(master.registry().clone(), master.commands())
    } else {
        ui::hint("press Ctrl+C to stop");
        None
    };

    tokio::select! {
        _ = interrupted() => info!("interrupted"),
        _ = shell_exit(shell_done) => info!("shell closed"),
    }

    master.stop().await;
    ui::success("master stopped");
    Ok(())
}

async fn shell_exit(done: Option<oneshot::Receiver<()>>) {
    match done {
        Some(done) => {
            let _ = done.await;
        }
        None => std::future::pending().await,
    }
}
