//! CLI Error Types

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

/// Which stage of start-up or execution went wrong.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("could not load configuration")]
    Config,
    #[display("could not set up the storage provider")]
    Storage,
    #[display("build failed")]
    Build,
    #[display("worker process failed")]
    Worker,
}
