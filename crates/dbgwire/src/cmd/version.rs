use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("dbgwire {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    let protocol = dbgwire_frame::PROTOCOL_VERSION;
    println!("name: dbgwire");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "protocol: {}.{}.{}.{}",
        protocol[0], protocol[1], protocol[2], protocol[3]
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "build_target: {}",
        option_env!("DBGWIRE_BUILD_TARGET").unwrap_or("unknown")
    );
    println!(
        "rustc: {}",
        option_env!("RUSTC_VERSION").unwrap_or("unknown")
    );
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!(
        "features: target={}, host={}, async={}, cli=true",
        cfg!(feature = "target"),
        cfg!(feature = "host"),
        cfg!(feature = "async")
    );

    Ok(SUCCESS)
}
