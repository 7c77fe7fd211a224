use std::path::PathBuf;

use log::LevelFilter;

pub(crate) const USAGE: &str = "\
Usage: pgbar [OPTIONS] <bar_name>

Options:
  -h, --help            Print this help text and exit
  -c, --config PATH     Use PATH instead of the default config location
  -p, --pipe PATH       Also listen for IPC messages on a named FIFO
  -l, --log LEVEL       Set the logging verbosity (error|warn|info|debug|trace)
  -d, --dump KEY        Print the bar's config value for KEY and exit
  -x, --print-exec      Print the launch command line and exit
  -w, --print-wmname    Print the generated WM_NAME and exit
      --stdout          Write formatted frames to stdout instead of drawing\
";

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Opts {
    pub bar: String,
    pub config: Option<PathBuf>,
    pub pipe: Option<PathBuf>,
    pub log_level: Option<LevelFilter>,
    pub dump: Option<String>,
    pub print_exec: bool,
    pub print_wmname: bool,
    pub stdout: bool,
    pub help: bool,
}

/// Parse the argv tail. Errors are usage problems, rendered verbatim.
pub(crate) fn parse(args: &[String]) -> Result<Opts, String> {
    let mut opts = Opts::default();
    let mut iter = args.iter();
    let mut value_for = |flag: &str, iter: &mut std::slice::Iter<String>| {
        iter.next()
            .cloned()
            .ok_or_else(|| format!("Missing value for {flag}"))
    };
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => opts.help = true,
            "-c" | "--config" => opts.config = Some(PathBuf::from(value_for(arg, &mut iter)?)),
            "-p" | "--pipe" => opts.pipe = Some(PathBuf::from(value_for(arg, &mut iter)?)),
            "-l" | "--log" => {
                let level = value_for(arg, &mut iter)?;
                opts.log_level = Some(match level.as_str() {
                    "error" => LevelFilter::Error,
                    "warn" | "warning" => LevelFilter::Warn,
                    "info" => LevelFilter::Info,
                    "debug" => LevelFilter::Debug,
                    "trace" => LevelFilter::Trace,
                    other => return Err(format!("Unknown log level '{other}'")),
                });
            }
            "-d" | "--dump" => opts.dump = Some(value_for(arg, &mut iter)?),
            "-x" | "--print-exec" => opts.print_exec = true,
            "-w" | "--print-wmname" => opts.print_wmname = true,
            "--stdout" => opts.stdout = true,
            other if other.starts_with('-') => {
                return Err(format!("Unknown option '{other}'"));
            }
            name => {
                if !opts.bar.is_empty() {
                    return Err(format!("Unexpected argument '{name}'"));
                }
                opts.bar = name.to_owned();
            }
        }
    }
    if opts.bar.is_empty() && !opts.help {
        return Err("Missing bar name".to_owned());
    }
    Ok(opts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn parses_flags_and_bar_name() {
        let opts = parse(&args(&["-c", "/tmp/cfg", "-l", "debug", "main"])).unwrap();
        assert_eq!(opts.bar, "main");
        assert_eq!(opts.config, Some(PathBuf::from("/tmp/cfg")));
        assert_eq!(opts.log_level, Some(LevelFilter::Debug));
    }

    #[test]
    fn bar_name_is_required() {
        assert!(parse(&args(&["-x"])).is_err());
        assert!(parse(&args(&["--help"])).is_ok());
    }

    #[test]
    fn rejects_unknown_flags_and_extra_args() {
        assert!(parse(&args(&["--bogus", "main"])).is_err());
        assert!(parse(&args(&["main", "other"])).is_err());
    }

    #[test]
    fn dump_and_writeback() {
        let opts = parse(&args(&["-d", "height", "--stdout", "top"])).unwrap();
        assert_eq!(opts.dump.as_deref(), Some("height"));
        assert!(opts.stdout);
    }
}
