use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("pixelwire {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: pixelwire");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "build_target: {}",
        option_env!("PIXELWIRE_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "default_packet_size: {}",
        pixelwire_frame::DEFAULT_PACKET_SIZE
    );
    println!(
        "min_packet_size: {}",
        pixelwire_worker::MIN_PACKET_SIZE
    );
    println!(
        "default_endpoint: {}:{}",
        pixelwire_worker::DEFAULT_HOST,
        pixelwire_worker::DEFAULT_PORT
    );
    println!("features: async={}, cli=true", cfg!(feature = "async"));

    Ok(SUCCESS)
}
