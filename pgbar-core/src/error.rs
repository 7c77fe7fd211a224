pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Failed to find a configuration file after searching $XDG_CONFIG_HOME and $HOME/.config")]
    ConfigFileFind,
    #[error("Failed to read config from disk")]
    Io(#[from] std::io::Error),
    #[error("Config syntax error on line {line}: {reason}")]
    ConfigSyntax { line: usize, reason: &'static str },
    #[error("Missing config section [{0}]")]
    ConfigSection(String),
    #[error("Missing config key {section}.{key}")]
    ConfigKey { section: String, key: String },
    #[error("Bad value for {section}.{key}: {reason}")]
    ConfigValue {
        section: String,
        key: String,
        reason: String,
    },
    #[error("Unresolvable config reference ${{{0}}}")]
    ConfigReference(String),
    #[error("Bad color literal '{0}'")]
    ColorParse(String),
    #[error("Format '{0}' has not been declared")]
    UndefinedFormat(String),
    #[error("[module/{module}] Undefined \"{format}\" tag: {token}")]
    UndefinedFormatTag {
        module: String,
        format: String,
        token: String,
    },
    #[error("Bar geometry does not fit inside the monitor")]
    GeometryOutOfBounds,
}
