use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("unknown resource type `{token}`")]
    UnknownResource { token: String },
    #[error("unknown counter column `{token}`")]
    UnknownColumn { token: String },
    #[error("`{resource}` has no counter column `{column}`")]
    ColumnNotOwned {
        resource: &'static str,
        column: &'static str,
    },
}
