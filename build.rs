// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn package_args(command: Command) -> Command {
    command
        .arg(Arg::new("name").required(true).help("Package name"))
        .arg(Arg::new("version").required(true).help("Package version"))
}

fn build_cli() -> Command {
    Command::new("pger")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Package manager driven through a local control daemon")
        .subcommand_required(true)
        .arg(
            Arg::new("socket")
                .short('s')
                .long("socket")
                .value_name("PATH")
                .help(
                    "Control socket of the daemon (env: PGER_SOCKET) [default: /tmp/pger.sock, \
                     or socket_path from the configuration file for daemon]",
                ),
        )
        .subcommand(
            Command::new("daemon")
                .about("Run the control daemon in the foreground")
                .arg(
                    Arg::new("config")
                        .short('c')
                        .long("config")
                        .value_name("PATH")
                        .default_value("/etc/pger/config.toml")
                        .help("Configuration file (env: PGER_CONFIG)"),
                ),
        )
        .subcommand(package_args(
            Command::new("install").about("Download (if needed) and install a package"),
        ))
        .subcommand(
            package_args(Command::new("delete").about("Uninstall a package")).arg(
                Arg::new("purge")
                    .long("purge")
                    .action(ArgAction::SetTrue)
                    .help("Also remove the archive from the cache"),
            ),
        )
        .subcommand(Command::new("clear-cache").about("Remove every cached archive"))
        .subcommand(
            Command::new("update-cache")
                .about("Download everything in the repository catalog")
                .arg(
                    Arg::new("mode")
                        .value_parser(["latest", "all"])
                        .default_value("latest")
                        .help("Catalog to synchronize against"),
                ),
        )
        .subcommand(Command::new("list").about("Show registered packages"))
        .subcommand(Command::new("stop").about("Stop the daemon"))
}

fn main() -> std::io::Result<()> {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = env::var_os("CARGO_MANIFEST_DIR").map(PathBuf::from);
    let Some(out_dir) = manifest_dir else {
        println!("cargo:warning=CARGO_MANIFEST_DIR not set, skipping man page");
        return Ok(());
    };
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir)?;

    let mut buffer = Vec::new();
    Man::new(build_cli()).render(&mut buffer)?;

    let man_path = man_dir.join("pger.1");
    fs::write(&man_path, buffer)?;

    println!("cargo:warning=Man page generated at {}", man_path.display());
    Ok(())
}
