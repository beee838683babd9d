use thiserror::Error;

pub const HUGO_INSTALL_GUIDE: &str = "https://gohugo.io/getting-started/installing/";

#[derive(Debug, Error)]
pub enum BlogError {
    #[error("{0}")]
    Precondition(String),

    #[error(
        "hugo not available ({binary}): {detail}\n\
         install Hugo and make sure it is on PATH: https://gohugo.io/getting-started/installing/"
    )]
    ToolMissing { binary: String, detail: String },

    #[error("failed to spawn '{binary}': {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("preview server stopped unexpectedly ({})", describe_code(.code))]
    UnexpectedExit { code: Option<i32> },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {c}"),
        None => "terminated by signal".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, BlogError>;
