use tracing::warn;

use crate::cmd::{open_session, ScanArgs};
use crate::exit::{CliResult, FAILURE, SUCCESS};
use crate::output::{print_records, NodeRecord, OutputFormat};

pub fn run(args: ScanArgs, format: OutputFormat) -> CliResult<i32> {
    let (session, _) = open_session(&args.connect, None)?;

    let records: Vec<NodeRecord> = session.mirror().nodes().map(NodeRecord::from).collect();
    if records.is_empty() {
        warn!(addr = %args.connect.addr, "no node answered the scan");
        return Ok(FAILURE);
    }

    print_records(&records, format);
    Ok(SUCCESS)
}
