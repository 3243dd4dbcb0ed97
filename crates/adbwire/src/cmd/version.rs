use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    println!("adbwire {}", env!("CARGO_PKG_VERSION"));
    if !args.extended {
        return Ok(SUCCESS);
    }

    println!(
        "target: {}",
        option_env!("ADBWIRE_BUILD_TARGET").unwrap_or("unknown")
    );
    println!(
        "profile: {}",
        option_env!("ADBWIRE_BUILD_PROFILE").unwrap_or("unknown")
    );
    println!("os: {}/{}", std::env::consts::OS, std::env::consts::ARCH);
    println!(
        "features: sync={}, bridge={}, cli=true",
        cfg!(feature = "sync"),
        cfg!(feature = "bridge")
    );
    println!(
        "protocol: version={:#010x}, max_payload={}",
        adbwire_bridge::A_VERSION,
        adbwire_bridge::MAX_NEGOTIATED_PAYLOAD
    );

    Ok(SUCCESS)
}
