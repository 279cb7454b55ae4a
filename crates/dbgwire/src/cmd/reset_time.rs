use crate::cmd::{open_session, ResetTimeArgs};
use crate::exit::{host_error, CliResult, SUCCESS};
use crate::output::{print_records, AckRecord, OutputFormat};

pub fn run(args: ResetTimeArgs, format: OutputFormat) -> CliResult<i32> {
    let (mut session, timeout) = open_session(&args.connect, args.node)?;

    session
        .reset_time(args.node, timeout)
        .map_err(|err| host_error("reset-time failed", err))?;

    // A broadcast carries msg id 0, so no node acknowledges it.
    print_records(
        &[AckRecord {
            command: "reset-time",
            node: args.node,
            acknowledged: args.node.is_some(),
        }],
        format,
    );
    Ok(SUCCESS)
}
