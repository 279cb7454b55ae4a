use dbgwire_frame::Direction;

use crate::cmd::{open_session, QueryArgs};
use crate::exit::{host_error, CliResult, SUCCESS};
use crate::output::{print_records, OutputFormat, RegisterRecord};

pub fn run(args: QueryArgs, format: OutputFormat) -> CliResult<i32> {
    let (mut session, timeout) = open_session(&args.connect, Some(args.node))?;
    let spec = args.register.spec(Direction::Read, args.size);

    let value = session
        .query_register(args.node, spec, timeout)
        .map_err(|err| host_error("query failed", err))?;

    // Replies always carry four bytes; only the requested size is meaningful.
    let len = usize::from(args.size).min(value.len());
    let record = RegisterRecord::new(
        args.node,
        spec.offset,
        spec.control.raw(),
        spec.size,
        &value[..len],
    );
    print_records(&[record], format);
    Ok(SUCCESS)
}
