//! Command line parsing.
//!
//! `-h` takes a byte count here (head buffering), so clap's automatic help
//! handling is disabled and usage output is produced manually; every usage
//! path exits with status 1, including `-?` / `--help`.

use std::path::PathBuf;

use clap::{Arg, ArgAction, Command, value_parser};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferMode {
    Head,
    Tail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    /// `None` means standard input (`-` was given).
    pub file: Option<PathBuf>,
    /// Mode forced on the command line; the default is head buffering.
    pub mode: Option<BufferMode>,
    /// Byte cap from `-h`/`-t`; overrides the one in the config file.
    pub buf_size: Option<u64>,
    pub rcfile: Option<PathBuf>,
}

/// All variants print to stderr and terminate the process with status 1.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("{}", usage_text())]
    Help,
}

fn command() -> Command {
    Command::new("loupe")
        .disable_help_flag(true)
        .disable_version_flag(true)
        .arg(
            Arg::new("tail")
                .short('t')
                .long("tail")
                .value_name("SIZE")
                .value_parser(value_parser!(u64))
                .overrides_with("head")
                .help("Load <size> bytes from the end of the file"),
        )
        .arg(
            Arg::new("head")
                .short('h')
                .long("head")
                .value_name("SIZE")
                .value_parser(value_parser!(u64))
                .overrides_with("tail")
                .help("Load <size> bytes from the start of the file"),
        )
        .arg(
            Arg::new("rcfile")
                .short('r')
                .long("rcfile")
                .value_name("PATH")
                .value_parser(value_parser!(PathBuf))
                .help("Use alternate config file"),
        )
        .arg(
            Arg::new("help")
                .short('?')
                .long("help")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("file")
                .value_name("FILE")
                .help("File to browse, or \"-\" for standard input"),
        )
}

pub fn usage_text() -> String {
    concat!(
        "Usage: loupe [options] {file|-}\n",
        "The following options are available:\n",
        "  --head=size\t\tLoad <size> bytes from the start of the file\n",
        "  --tail=size\t\tLoad <size> bytes from the end of the file\n",
        "  --rcfile=<path>\tUse alternate config file\n",
    )
    .to_string()
}

/// Parse the given argv (including the program name).
pub fn parse_args<I, T>(argv: I) -> Result<CliArgs, CliError>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let matches = command()
        .try_get_matches_from(argv)
        .map_err(|e| CliError::Usage(e.to_string()))?;

    if matches.get_flag("help") {
        return Err(CliError::Help);
    }

    let (mode, buf_size) = if let Some(&n) = matches.get_one::<u64>("tail") {
        (Some(BufferMode::Tail), Some(n))
    } else if let Some(&n) = matches.get_one::<u64>("head") {
        (Some(BufferMode::Head), Some(n))
    } else {
        (None, None)
    };

    let Some(file) = matches.get_one::<String>("file").map(String::as_str) else {
        return Err(CliError::Usage(
            "File name missing (use \"-\" for stdin)".into(),
        ));
    };
    let file = (file != "-").then(|| PathBuf::from(file));

    Ok(CliArgs {
        file,
        mode,
        buf_size,
        rcfile: matches.get_one::<PathBuf>("rcfile").cloned(),
    })
}
