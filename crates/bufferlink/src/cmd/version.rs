use bufferlink_renderer::POOL_SIZE;
use bufferlink_wire::MESSAGE_SIZE;
use serde::Serialize;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{key_value_table, print_json, OutputFormat};

#[derive(Debug, Serialize)]
struct VersionOutput {
    name: &'static str,
    version: &'static str,
    target: &'static str,
    profile: &'static str,
    target_os: &'static str,
    target_arch: &'static str,
    message_size: usize,
    pool_size: usize,
}

impl VersionOutput {
    fn current() -> Self {
        Self {
            name: "bufferlink",
            version: env!("CARGO_PKG_VERSION"),
            target: option_env!("BUFFERLINK_BUILD_TARGET").unwrap_or("unknown"),
            profile: option_env!("BUFFERLINK_BUILD_PROFILE").unwrap_or("unknown"),
            target_os: std::env::consts::OS,
            target_arch: std::env::consts::ARCH,
            message_size: MESSAGE_SIZE,
            pool_size: POOL_SIZE,
        }
    }
}

pub fn run(args: VersionArgs, format: OutputFormat) -> CliResult<i32> {
    let output = VersionOutput::current();

    if !args.extended {
        match format {
            OutputFormat::Json => print_json(&output),
            _ => println!("{} {}", output.name, output.version),
        }
        return Ok(SUCCESS);
    }

    match format {
        OutputFormat::Json => print_json(&output),
        OutputFormat::Table => {
            let table = key_value_table(&[
                ("version", output.version.to_string()),
                ("target", output.target.to_string()),
                ("profile", output.profile.to_string()),
                ("target_os", output.target_os.to_string()),
                ("target_arch", output.target_arch.to_string()),
                ("message_size", output.message_size.to_string()),
                ("pool_size", output.pool_size.to_string()),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            println!("name: {}", output.name);
            println!("version: {}", output.version);
            println!("target: {}", output.target);
            println!("profile: {}", output.profile);
            println!("target_os: {}", output.target_os);
            println!("target_arch: {}", output.target_arch);
            println!("message_size: {}", output.message_size);
            println!("pool_size: {}", output.pool_size);
        }
    }

    Ok(SUCCESS)
}
