use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpaceError {
    #[error("Distributed object name must not be empty")]
    InvalidName,

    #[error("Path segment '{0}' is a leaf, not a tree")]
    NotATree(String),

    #[error("Empty path")]
    EmptyPath,
}

pub type Result<T> = std::result::Result<T, SpaceError>;

impl From<SpaceError> for cloudmesh_common::protocol::CloudError {
    fn from(error: SpaceError) -> Self {
        cloudmesh_common::protocol::CloudError::InvalidRequest(error.to_string())
    }
}
