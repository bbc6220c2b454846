use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Client(#[from] sm_cluster_hbs::Error),

    #[error("invalid argument {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Tracing(#[from] tracing::subscriber::SetGlobalDefaultError),
}
