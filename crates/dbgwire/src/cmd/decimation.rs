use crate::cmd::{open_session, DecimationArgs};
use crate::exit::{host_error, CliResult, SUCCESS};
use crate::output::{print_records, DecimationRecord, OutputFormat};

pub fn run(args: DecimationArgs, format: OutputFormat) -> CliResult<i32> {
    let (mut session, timeout) = open_session(&args.connect, Some(args.node))?;

    let decimation = session
        .decimation(args.node, args.set, timeout)
        .map_err(|err| host_error("decimation request failed", err))?;

    print_records(
        &[DecimationRecord {
            node: args.node,
            decimation,
        }],
        format,
    );
    Ok(SUCCESS)
}
