//! Server configuration from command-line arguments.

use crate::{DEFAULT_HOST, DEFAULT_PORT};
use thiserror::Error;

/// Default tracing filter when neither `RUST_LOG` nor `--log-level` is given
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Tracing filter directive, e.g. `debug` or `tidekv=trace`
    pub log_level: String,
}

/// What the process was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Run(Config),
    Help,
    Version,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} requires a value")]
    MissingValue(String),

    #[error("invalid port number: {0}")]
    InvalidPort(String),

    #[error("unknown argument: {0}")]
    UnknownArgument(String),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl Config {
    /// Parses arguments, not including the program name.
    ///
    /// `--help` and `--version` win as soon as they are seen.
    pub fn from_args<I, S>(args: I) -> Result<Invocation, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut config = Config::default();
        let mut args = args.into_iter().map(Into::into);

        while let Some(flag) = args.next() {
            let mut value = || args.next().ok_or_else(|| ConfigError::MissingValue(flag.clone()));

            match flag.as_str() {
                "--host" | "-h" => config.host = value()?,
                "--port" | "-p" => {
                    let port = value()?;
                    config.port = port.parse().map_err(|_| ConfigError::InvalidPort(port))?;
                }
                "--log-level" | "-l" => config.log_level = value()?,
                "--help" => return Ok(Invocation::Help),
                "--version" | "-v" => return Ok(Invocation::Version),
                _ => return Err(ConfigError::UnknownArgument(flag)),
            }
        }

        Ok(Invocation::Run(config))
    }

    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

pub fn usage() -> String {
    format!(
        r#"tidekv {version} - in-memory key-value server speaking RESP

USAGE:
    tidekv [OPTIONS]

OPTIONS:
    -h, --host <HOST>         Host to bind to (default: {host})
    -p, --port <PORT>         Port to listen on (default: {port})
    -l, --log-level <FILTER>  Log filter when RUST_LOG is unset (default: {level})
    -v, --version             Print version information
        --help                Print this help message

CONNECTING:
    $ redis-cli -p {port}
    127.0.0.1:{port}> RPUSH jobs a b
    (integer) 2
    127.0.0.1:{port}> BLPOP jobs 5
    1) "jobs"
    2) "a"
"#,
        version = crate::VERSION,
        host = DEFAULT_HOST,
        port = DEFAULT_PORT,
        level = DEFAULT_LOG_LEVEL,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Invocation, ConfigError> {
        Config::from_args(args.iter().copied())
    }

    #[test]
    fn test_defaults() {
        let Ok(Invocation::Run(config)) = parse(&[]) else {
            panic!("expected a run configuration");
        };
        assert_eq!(config, Config::default());
        assert_eq!(config.bind_address(), "127.0.0.1:6379");
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_all_options() {
        let invocation = parse(&["-h", "0.0.0.0", "--port", "6380", "-l", "debug"]).unwrap();
        assert_eq!(
            invocation,
            Invocation::Run(Config {
                host: "0.0.0.0".into(),
                port: 6380,
                log_level: "debug".into(),
            })
        );
    }

    #[test]
    fn test_help_and_version() {
        assert_eq!(parse(&["--help"]), Ok(Invocation::Help));
        assert_eq!(parse(&["-p", "1", "-v"]), Ok(Invocation::Version));
        assert!(usage().contains("--log-level"));
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            parse(&["--port"]),
            Err(ConfigError::MissingValue("--port".into()))
        );
        assert_eq!(
            parse(&["--port", "99999"]),
            Err(ConfigError::InvalidPort("99999".into()))
        );
        assert_eq!(
            parse(&["--verbose"]),
            Err(ConfigError::UnknownArgument("--verbose".into()))
        );
    }
}
