use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum ConfigError {
    #[error("Failed to parse KDL")]
    #[diagnostic(code(keysync::config::parse_error))]
    ParseError {
        #[source_code]
        src: String,
        #[label("here")]
        span: miette::SourceSpan,
        #[source]
        source: kdl::KdlError,
    },

    #[error("Invalid keymap entry: {message}")]
    #[diagnostic(code(keysync::config::invalid_entry))]
    InvalidEntry {
        message: String,
        #[source_code]
        src: String,
        #[label("here")]
        span: miette::SourceSpan,
    },

    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(keysync::config::invalid))]
    Invalid { message: String },

    #[error("Missing required field: {field}")]
    #[diagnostic(code(keysync::config::missing_field))]
    MissingField { field: String },

    #[error("Modifier flag 0x{flag:x} is used by both code {first} and code {second}")]
    #[diagnostic(
        code(keysync::config::duplicate_flag),
        help("Every modifier key needs its own flag bit so missed transitions can be replayed")
    )]
    DuplicateFlag { flag: u64, first: u32, second: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
