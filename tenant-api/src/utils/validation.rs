use axum::{
    extract::{FromRequest, Request},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Form, Json,
};
use serde::de::DeserializeOwned;
use service_core::error::ErrorBody;
use validator::Validate;

pub const INVALID_INPUT: &str = "Parâmetros de entrada inválidos";

/// Body accepted as `application/x-www-form-urlencoded` or JSON, then validated.
///
/// Any decode or validation failure becomes `400 {"error": INVALID_INPUT}`;
/// the detail is logged only.
pub struct FormOrJson<T>(pub T);

fn invalid_input() -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorBody::new(INVALID_INPUT))).into_response()
}

#[axum::async_trait]
impl<T, S> FromRequest<S> for FormOrJson<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_form = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));

        let value = if is_form {
            Form::<T>::from_request(req, state)
                .await
                .map(|Form(v)| v)
                .map_err(|e| {
                    tracing::debug!(error = %e, "Form body rejected");
                    invalid_input()
                })?
        } else {
            Json::<T>::from_request(req, state)
                .await
                .map(|Json(v)| v)
                .map_err(|e| {
                    tracing::debug!(error = %e, "JSON body rejected");
                    invalid_input()
                })?
        };

        value.validate().map_err(|e| {
            tracing::debug!(error = %e, "Request body failed validation");
            invalid_input()
        })?;

        Ok(FormOrJson(value))
    }
}
