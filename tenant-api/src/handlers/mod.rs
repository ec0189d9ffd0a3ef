pub mod apikey;
pub mod auth;
pub mod health;
pub mod tenants;
pub mod users;

use service_core::error::AppError;
use uuid::Uuid;

use crate::repositories::WriteError;

/// Path ids are parsed by hand so a bad one reads `ID inválido`.
fn parse_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::BadRequest(anyhow::anyhow!("ID inválido")))
}

fn write_failure(err: WriteError) -> AppError {
    match err {
        WriteError::Duplicate(field) => {
            AppError::Conflict(anyhow::anyhow!("{} já cadastrado", field))
        }
        WriteError::Store(e) => AppError::DatabaseError(e),
    }
}
