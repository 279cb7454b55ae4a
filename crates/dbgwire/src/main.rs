mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "dbgwire", version, about = "Debug wire protocol host and target emulator")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_query_subcommand() {
        let cli = Cli::try_parse_from([
            "dbgwire",
            "query",
            "127.0.0.1:5050",
            "--node",
            "3",
            "--offset",
            "0x0C",
            "--depth",
            "2",
        ])
        .expect("query args should parse");

        match cli.command {
            Command::Query(args) => {
                assert_eq!(args.node, 3);
                assert_eq!(args.register.offset, 0x0C);
                assert_eq!(args.register.depth, 2);
                assert_eq!(args.size, 4);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_depth_beyond_control_byte() {
        let err = Cli::try_parse_from([
            "dbgwire", "query", "127.0.0.1:1", "--node", "1", "--offset", "0", "--depth", "16",
        ])
        .expect_err("depth 16 should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn rejects_oversized_register() {
        let err = Cli::try_parse_from([
            "dbgwire", "trace", "127.0.0.1:1", "--node", "1", "--offset", "0", "--size", "9",
        ])
        .expect_err("size 9 should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn write_requires_value() {
        let err = Cli::try_parse_from([
            "dbgwire", "write", "127.0.0.1:1", "--node", "1", "--offset", "8",
        ])
        .expect_err("missing --value should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn parses_broadcast_reset_time() {
        let cli = Cli::try_parse_from(["dbgwire", "reset-time", "127.0.0.1:1"])
            .expect("reset-time args should parse");
        assert!(matches!(
            cli.command,
            Command::ResetTime(cmd::ResetTimeArgs { node: None, .. })
        ));
    }

    #[test]
    fn emulate_defaults() {
        let cli = Cli::try_parse_from(["dbgwire", "emulate"]).expect("emulate should parse");
        match cli.command {
            Command::Emulate(args) => {
                assert_eq!(args.addr, "127.0.0.1:5050");
                assert_eq!(args.node, 1);
                assert_eq!(args.slow_interval, 1000);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
