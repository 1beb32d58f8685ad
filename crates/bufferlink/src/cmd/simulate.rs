//! In-process renderer/compositor pair.
//!
//! The compositor runs on its own thread and presents every commit as soon
//! as it arrives. The renderer stays on the calling thread, as it would in
//! an embedding application, and waits for each frame to complete before
//! starting the next.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::os::fd::OwnedFd;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bufferlink_channel::{ChannelConfig, Dispatch};
use bufferlink_compositor::{Compositor, CompositorStats};
use bufferlink_renderer::{
    DeviceStats, RenderTarget, RendererBackend, RendererConfig, SoftwareDevice, TargetStats,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::cmd::SimulateArgs;
use crate::exit::{
    compositor_error, io_error, renderer_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS,
    TIMEOUT,
};
use crate::output::{key_value_table, print_json, table, OutputFormat};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Serialize)]
struct SimulateOutput {
    frames: u64,
    width: u32,
    height: u32,
    /// Frames rendered into each buffer, keyed by buffer ID.
    buffer_use: BTreeMap<u32, u64>,
    target: TargetStats,
    device: DeviceStats,
    compositor: CompositorStats,
}

/// What the renderer side observed.
struct RenderReport {
    frames: u64,
    buffer_use: BTreeMap<u32, u64>,
    target: TargetStats,
    device: DeviceStats,
}

pub fn run(args: SimulateArgs, format: OutputFormat) -> CliResult<i32> {
    let config = match args.timeout_ms {
        Some(0) => ChannelConfig::with_timeout(None),
        Some(ms) => ChannelConfig::with_timeout(Some(Duration::from_millis(ms))),
        None => ChannelConfig::from_env(),
    };

    let running = Arc::new(AtomicBool::new(true));
    if args.frames == 0 {
        install_ctrlc_handler(running.clone())?;
    }

    let mut compositor = Compositor::new(config);
    let (_, backend_fd) = compositor
        .open_connection()
        .map_err(|err| compositor_error("open backend connection", err))?;
    let (_, target_fd) = compositor
        .open_connection()
        .map_err(|err| compositor_error("open target connection", err))?;

    let host = thread::Builder::new()
        .name("compositor".to_string())
        .spawn(move || run_compositor(compositor))
        .map_err(|err| io_error("failed to start compositor", err))?;

    // Returning drops the renderer's sockets, which is what lets the
    // compositor thread finish.
    let rendered = render(&args, config, backend_fd, target_fd, &running);

    let compositor = host
        .join()
        .map_err(|_| CliError::new(INTERNAL, "compositor thread panicked"))?;
    let report = rendered?;
    let compositor = compositor.map_err(|err| compositor_error("compositor", err))?;

    let output = SimulateOutput {
        frames: report.frames,
        width: args.width,
        height: args.height,
        buffer_use: report.buffer_use,
        target: report.target,
        device: report.device,
        compositor,
    };
    print_simulation(&output, format);
    Ok(SUCCESS)
}

fn run_compositor(mut compositor: Compositor) -> bufferlink_compositor::Result<CompositorStats> {
    while compositor.live_connections() > 0 {
        compositor.poll(Some(POLL_INTERVAL))?;
        compositor.present_all()?;
    }
    debug!(stats = ?compositor.stats(), "compositor finished");
    Ok(compositor.stats())
}

fn render(
    args: &SimulateArgs,
    channel: ChannelConfig,
    backend_fd: OwnedFd,
    target_fd: OwnedFd,
    running: &AtomicBool,
) -> CliResult<RenderReport> {
    let config = RendererConfig {
        channel,
        ..RendererConfig::default()
    };
    let backend = RendererBackend::new(backend_fd, config);
    let mut target = RenderTarget::new(SoftwareDevice::new(), target_fd, &config);
    target
        .initialize(&backend, args.width, args.height)
        .map_err(|err| renderer_error("failed to initialize target", err))?;

    let completed = Rc::new(Cell::new(0u64));
    let counter = Rc::clone(&completed);
    target.on_frame_complete(move |_| counter.set(counter.get() + 1));

    let mut buffer_use = BTreeMap::new();
    let mut frames = 0u64;
    while running.load(Ordering::SeqCst) && (args.frames == 0 || frames < args.frames) {
        let buffer_id = target
            .frame_will_render()
            .map_err(|err| renderer_error("failed to start frame", err))?;
        *buffer_use.entry(buffer_id.0).or_insert(0) += 1;
        target
            .frame_rendered()
            .map_err(|err| renderer_error("failed to commit frame", err))?;
        frames += 1;

        wait_for_frame(&backend, &completed, frames, channel.reply_timeout)?;
    }

    let stats = target.stats();
    target.deinitialize();
    backend.shutdown();
    info!(frames, "simulation finished");

    Ok(RenderReport {
        frames,
        buffer_use,
        target: stats,
        device: target.device().stats(),
    })
}

/// Dispatch backend notifications until `frame` frames have completed.
fn wait_for_frame(
    backend: &RendererBackend,
    completed: &Cell<u64>,
    frame: u64,
    timeout: Option<Duration>,
) -> CliResult<()> {
    let deadline = timeout.map(|timeout| Instant::now() + timeout);
    while completed.get() < frame {
        let remaining = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(CliError::new(
                        TIMEOUT,
                        format!("frame {frame} was not presented in time"),
                    ));
                }
                Some(remaining)
            }
            None => None,
        };
        let outcome = backend
            .wait_and_dispatch(remaining)
            .map_err(|err| renderer_error("dispatch failed", err))?;
        if outcome == Dispatch::Remove {
            return Err(CliError::new(FAILURE, "compositor closed the connection"));
        }
    }
    Ok(())
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

fn print_simulation(output: &SimulateOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(output),
        OutputFormat::Table => {
            let summary = key_value_table(&[
                ("frames", output.frames.to_string()),
                ("size", format!("{}x{}", output.width, output.height)),
                ("allocations", output.target.allocations.to_string()),
                ("commits", output.target.commits.to_string()),
                ("releases", output.target.releases.to_string()),
                ("frames_completed", output.target.frames_completed.to_string()),
                ("frames_presented", output.compositor.frames_presented.to_string()),
                ("buffers_received", output.compositor.buffers_received.to_string()),
                ("live_memory", output.device.live_memory.to_string()),
            ]);
            println!("{summary}");

            let mut buffers = table(["BUFFER", "FRAMES"]);
            for (buffer_id, frames) in &output.buffer_use {
                buffers.add_row(vec![buffer_id.to_string(), frames.to_string()]);
            }
            println!("{buffers}");
        }
        OutputFormat::Pretty => {
            println!(
                "frames={} size={}x{} allocations={} releases={} presented={}",
                output.frames,
                output.width,
                output.height,
                output.target.allocations,
                output.target.releases,
                output.compositor.frames_presented
            );
            for (buffer_id, frames) in &output.buffer_use {
                println!("  buffer {buffer_id}: {frames} frames");
            }
        }
        OutputFormat::Raw => println!("{}", output.frames),
    }
}
