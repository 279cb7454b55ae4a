use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dbgwire_frame::{Direction, RegisterSpec, TracingRequest, UpdateMode};
use dbgwire_host::HostEvent;
use tracing::{debug, info, warn};

use crate::cmd::{open_session, parse_timeout, Session, TraceArgs};
use crate::exit::{host_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS};
use crate::output::{print_streamed, OutputFormat, SampleRecord};

pub fn run(args: TraceArgs, format: OutputFormat) -> CliResult<i32> {
    let deadline = match &args.duration {
        Some(duration) => Some(Instant::now() + parse_timeout(duration)?),
        None => None,
    };
    let (mut session, timeout) = open_session(&args.connect, Some(args.node))?;
    let spec = args.register.spec(Direction::Read, args.size);
    let mode = UpdateMode::from(args.mode);

    let slot = session
        .configure_channel(args.node, spec, mode, timeout)
        .map_err(|err| host_error("channel configuration failed", err))?
        .ok_or_else(|| CliError::new(FAILURE, "target did not allocate a channel"))?;
    session
        .set_tracing(args.node, TracingRequest::On)
        .map_err(|err| host_error("enabling tracing failed", err))?;
    info!(node_id = args.node, channel = slot, %mode, "tracing");

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break;
        }
        if args.count.is_some_and(|count| printed >= count) {
            break;
        }

        let event = match session.poll() {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(err) => return Err(host_error("trace failed", err)),
        };
        match event {
            HostEvent::Telemetry(telemetry) if telemetry.node == args.node => {
                for record in SampleRecord::from_telemetry(&telemetry) {
                    if record.slot != slot || args.count.is_some_and(|count| printed >= count) {
                        continue;
                    }
                    print_streamed(&record, format);
                    printed += 1;
                }
            }
            HostEvent::Invalid {
                node,
                command,
                reason,
            } => debug!(node_id = node, ?command, %reason, "ignored message"),
            _ => {}
        }
    }

    stop_tracing(&mut session, args.node, spec, timeout);
    Ok(SUCCESS)
}

/// Switch the channel off and stop tracing. Failures only get logged.
fn stop_tracing(session: &mut Session, node: u8, spec: RegisterSpec, timeout: Duration) {
    if let Err(err) = session.set_tracing(node, TracingRequest::Off) {
        warn!(error = %err, "disabling tracing failed");
    }
    if let Err(err) = session.configure_channel(node, spec, UpdateMode::Off, timeout) {
        warn!(error = %err, "releasing the channel failed");
    }
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
