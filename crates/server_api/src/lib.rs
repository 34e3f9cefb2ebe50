use shared::{
    domain::Role,
    error::{ApiError, ErrorCode},
};
use storage::{Storage, StoredUser};

pub mod accounts;
pub mod catalog;
pub mod inventory;
pub mod sales;
pub mod stations;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
}

pub fn require_admin(user: &StoredUser) -> Result<(), ApiError> {
    if user.role != Some(Role::Admin) {
        return Err(ApiError::new(ErrorCode::Forbidden, "admin role required"));
    }
    Ok(())
}

pub(crate) fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
