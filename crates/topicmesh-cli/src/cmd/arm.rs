//! `topicmesh arm-publisher` and `topicmesh arm-monitor`

use super::{interrupted, start_node, CommandError};
use crate::arm::{
    describe, forward_kinematics, ArmState, Point, ARM_TOPIC, LINK1_LENGTH, LINK2_LENGTH,
    TIME_STEP,
};
use crate::cli::NodeEndpoints;
use crate::ui;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use topicmesh_core::{handoff, HandoffReceiver};
use topicmesh_types::config::MeshConfig;
use topicmesh_types::HandlerError;
use tracing::{debug, warn};

/// Slots between the subscriber callback and the renderer thread.
const STATE_QUEUE_CAPACITY: usize = 100;

/// How long the renderer waits for a state before checking for shutdown.
const RENDER_POLL: Duration = Duration::from_millis(50);

pub async fn run_publisher(
    config: &MeshConfig,
    name: &str,
    endpoints: &NodeEndpoints,
    rate_hz: f64,
) -> Result<(), CommandError> {
    if !(rate_hz.is_finite() && rate_hz > 0.0) {
        return Err(CommandError::Invalid(format!(
            "--rate-hz must be positive, got {rate_hz}"
        )));
    }
    let node = start_node(name, config, endpoints).await?;
    ui::kv("Publishing", ARM_TOPIC);
    ui::kv("Rate", &format!("{rate_hz} Hz"));

    let publisher = node.clone();
    node.spawn_task(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / rate_hz));
        let mut t = 0.0_f64;
        loop {
            ticker.tick().await;
            let state = ArmState::at(t);
            match serde_json::to_value(state) {
                Ok(data) => match publisher.publish(ARM_TOPIC, data).await {
                    Ok(delivery) => debug!(t, ?delivery, "arm state published"),
                    Err(e) => warn!(error = %e, "failed to publish arm state"),
                },
                Err(e) => warn!(error = %e, "failed to encode arm state"),
            }
            t += TIME_STEP;
        }
    });

    ui::hint("press Ctrl+C to stop");
    interrupted().await;
    node.stop().await;
    Ok(())
}

pub async fn run_monitor(
    config: &MeshConfig,
    name: &str,
    endpoints: &NodeEndpoints,
) -> Result<(), CommandError> {
    let node = start_node(name, config, endpoints).await?;

    let (queue, states) = handoff::<ArmState>(STATE_QUEUE_CAPACITY);
    node.subscribe(ARM_TOPIC, move |message| {
        let state: ArmState = serde_json::from_value(message.data)?;
        queue.offer(state);
        Ok::<(), HandlerError>(())
    })
    .await?;
    ui::kv("Watching", ARM_TOPIC);
    ui::hint("press Ctrl+C to stop");

    let stop = Arc::new(AtomicBool::new(false));
    let renderer = {
        let stop = Arc::clone(&stop);
        std::thread::Builder::new()
            .name("arm-renderer".to_string())
            .spawn(move || render_loop(&states, &stop))
    };
    let renderer = match renderer {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "could not start renderer thread");
            None
        }
    };

    interrupted().await;
    stop.store(true, Ordering::SeqCst);
    if let Some(handle) = renderer {
        let _ = tokio::task::spawn_blocking(move || handle.join()).await;
    }
    println!();
    node.stop().await;
    Ok(())
}

/// Redraw the newest state until `stop` is set.
fn render_loop(states: &HandoffReceiver<ArmState>, stop: &AtomicBool) {
    let base = Point { x: 0.0, y: 0.0 };
    let mut stdout = std::io::stdout();
    while !stop.load(Ordering::SeqCst) {
        let Some(first) = states.recv_timeout(RENDER_POLL) else {
            continue;
        };
        // Skip states the renderer fell behind on.
        let state = states.latest().unwrap_or(first);
        let pose = forward_kinematics(base, state, LINK1_LENGTH, LINK2_LENGTH);
        let _ = write!(stdout, "\r  {}", describe(state, pose));
        let _ = stdout.flush();
    }
}
