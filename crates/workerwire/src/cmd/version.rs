use crate::cmd::VersionArgs;
use crate::entries;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("workerwire {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: workerwire");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("WORKERWIRE_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!(
        "features: worker={}, cli=true",
        cfg!(feature = "worker")
    );
    let names: Vec<String> = entries::registry()
        .entries()
        .map(|(name, arity)| format!("{name}/{arity}"))
        .collect();
    println!("entries: {}", names.join(", "));

    Ok(SUCCESS)
}
