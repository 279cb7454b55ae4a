use dbgwire_frame::{Direction, MAX_VALUE_SIZE};

use crate::cmd::{open_session, WriteArgs};
use crate::exit::{host_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_records, AckRecord, OutputFormat};

pub fn run(args: WriteArgs, format: OutputFormat) -> CliResult<i32> {
    let value = &args.value.0;
    let size = u8::try_from(value.len())
        .ok()
        .filter(|&size| usize::from(size) <= MAX_VALUE_SIZE)
        .ok_or_else(|| {
            CliError::new(
                USAGE,
                format!(
                    "value is {} bytes; registers hold at most {MAX_VALUE_SIZE}",
                    value.len()
                ),
            )
        })?;

    let (mut session, timeout) = open_session(&args.connect, Some(args.node))?;
    let spec = args.register.spec(Direction::Write, size);

    session
        .write_register(args.node, spec, value, timeout)
        .map_err(|err| host_error("write failed", err))?;

    print_records(
        &[AckRecord {
            command: "write",
            node: Some(args.node),
            acknowledged: true,
        }],
        format,
    );
    Ok(SUCCESS)
}
