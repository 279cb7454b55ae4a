use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dbgwire_frame::SourceKind;
use dbgwire_target::{
    serve, Address, DebugTarget, OffsetTable, ServeConfig, SimulatedMemory, TargetConfig,
};
use dbgwire_transport::{TcpEndpoint, TransportError};
use serde::Serialize;
use tracing::{info, warn};

use crate::cmd::EmulateArgs;
use crate::exit::{target_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::print_json;

const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Handwritten offsets of the demo variables.
pub const COUNTER_OFFSET: u32 = 0x00;
pub const WAVE_OFFSET: u32 = 0x04;
pub const SETPOINT_OFFSET: u32 = 0x08;
/// Reached through two pointer hops.
pub const NESTED_OFFSET: u32 = 0x0C;
pub const STATUS_OFFSET: u32 = 0x10;

const SETPOINT_INITIAL: u32 = 100;
const NESTED_VALUE: u32 = 0xC0FFEE;

type EmulatedTarget = DebugTarget<SimulatedMemory, OffsetTable>;

#[derive(Serialize)]
struct Listening {
    addr: String,
    node: u8,
}

pub fn run(args: EmulateArgs) -> CliResult<i32> {
    let config = TargetConfig {
        node_id: args.node,
        node_name: args.name.clone(),
        serial_number: args.serial.clone(),
        slow_interval_ticks: args.slow_interval,
        ..TargetConfig::default()
    };
    let (memory, table, vars) = demo_memory();
    let mut target = DebugTarget::new(config, memory, table)
        .map_err(|err| target_error("invalid target configuration", err))?;

    let endpoint =
        TcpEndpoint::bind(&args.addr).map_err(|err| transport_error("bind failed", err))?;
    endpoint
        .set_nonblocking(true)
        .map_err(|err| transport_error("listener setup failed", err))?;

    print_json(&Listening {
        addr: endpoint.local_addr().to_string(),
        node: args.node,
    });

    let stop = Arc::new(AtomicBool::new(false));
    install_ctrlc_handler(stop.clone())?;

    let serve_config = ServeConfig {
        tick: Duration::from_millis(args.tick_ms.max(1)),
        bytes_per_tick: args.bytes_per_tick.max(1),
    };

    while !stop.load(Ordering::SeqCst) {
        let link = match endpoint.accept() {
            Ok(link) => link,
            Err(TransportError::Accept(err)) if err.kind() == ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
                continue;
            }
            Err(err) => return Err(transport_error("accept failed", err)),
        };
        link.set_nonblocking(false)
            .map_err(|err| transport_error("link setup failed", err))?;

        serve(&mut target, link, serve_config, &stop, |t| vars.step(t))
            .map_err(|err| target_error("serve failed", err))?;
        info!(stats = ?target.stats(), "host session ended");
    }

    Ok(SUCCESS)
}

fn install_ctrlc_handler(stop: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        stop.store(true, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

/// Addresses of the demo variables the tick hook animates.
#[derive(Debug, Clone, Copy)]
struct DemoVars {
    counter: Address,
    wave: Address,
    status: Address,
}

impl DemoVars {
    fn step(&self, target: &mut EmulatedTarget) {
        let time = target.state().time_ticks;
        if let Err(err) = self.update(target.memory_mut(), time) {
            warn!(error = %err, "demo variable update failed");
        }
    }

    fn update(&self, memory: &mut SimulatedMemory, time: u32) -> dbgwire_target::Result<()> {
        let counter = read_u32(memory, self.counter).wrapping_add(1);
        memory.store(self.counter, &counter.to_le_bytes())?;
        memory.store(self.wave, &wave_at(time).to_le_bytes())?;
        memory.store(self.status, &[u8::from((time / 500) % 2 == 1)])?;
        Ok(())
    }
}

fn read_u32(memory: &SimulatedMemory, addr: Address) -> u32 {
    match memory.load(addr, 4) {
        Ok(bytes) => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        Err(_) => 0,
    }
}

/// Sine with a 1000-tick period and an amplitude of 1000.
fn wave_at(time: u32) -> i32 {
    let phase = f64::from(time % 1000) / 1000.0 * std::f64::consts::TAU;
    (phase.sin() * 1000.0).round() as i32
}

fn demo_memory() -> (SimulatedMemory, OffsetTable, DemoVars) {
    let mut memory = SimulatedMemory::new();
    let counter = memory.alloc_value(&0u32.to_le_bytes());
    let wave = memory.alloc_value(&0i32.to_le_bytes());
    let setpoint = memory.alloc_value(&SETPOINT_INITIAL.to_le_bytes());
    let nested_value = memory.alloc_value(&NESTED_VALUE.to_le_bytes());
    let inner = memory.alloc_ptr(Some(nested_value));
    let outer = memory.alloc_ptr(Some(inner));
    let status = memory.alloc_value(&[0]);

    let mut table = OffsetTable::new();
    for (offset, address) in [
        (COUNTER_OFFSET, counter),
        (WAVE_OFFSET, wave),
        (SETPOINT_OFFSET, setpoint),
        (NESTED_OFFSET, outer),
        (STATUS_OFFSET, status),
    ] {
        table.insert(SourceKind::HandwrittenOffset, offset, address);
    }

    (
        memory,
        table,
        DemoVars {
            counter,
            wave,
            status,
        },
    )
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use dbgwire_frame::{ControlByte, Direction, RegisterSpec};
    use dbgwire_target::{follow, Memory, RegisterResolver};

    use super::*;

    fn spec(offset: u32, depth: u8) -> RegisterSpec {
        RegisterSpec::new(
            offset,
            ControlByte::new(Direction::Read, SourceKind::HandwrittenOffset, depth),
            4,
        )
    }

    #[test]
    fn nested_variable_needs_two_hops() {
        let (memory, table, _) = demo_memory();
        let root = table.resolve_spec(&spec(NESTED_OFFSET, 2)).unwrap();
        let addr = follow(&memory, root, 2).unwrap();

        let mut value = [0u8; 4];
        memory.read(addr, &mut value).unwrap();
        assert_eq!(u32::from_le_bytes(value), NESTED_VALUE);
    }

    #[test]
    fn setpoint_starts_at_initial_value() {
        let (memory, table, _) = demo_memory();
        let addr = table.resolve_spec(&spec(SETPOINT_OFFSET, 0)).unwrap();
        assert_eq!(read_u32(&memory, addr), SETPOINT_INITIAL);
    }

    #[test]
    fn step_animates_counter_and_wave() {
        let (memory, table, vars) = demo_memory();
        let mut target = DebugTarget::new(TargetConfig::default(), memory, table).unwrap();
        let mut idle = VecDeque::<u8>::new();
        for _ in 0..250 {
            target.on_tick(&mut idle);
        }

        vars.step(&mut target);
        vars.step(&mut target);

        assert_eq!(read_u32(target.memory(), vars.counter), 2);
        let wave = read_u32(target.memory(), vars.wave) as i32;
        assert_eq!(wave, 1000);
    }

    #[test]
    fn wave_stays_in_range() {
        for time in (0..2000).step_by(37) {
            assert!(wave_at(time).abs() <= 1000);
        }
        assert_eq!(wave_at(0), 0);
    }
}
