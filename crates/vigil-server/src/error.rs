use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use vigil_core::VigilError;

/// Unified error type for HTTP responses.
///
/// Per-subject delivery failures never surface here — they live inside the
/// run summary. A non-2xx response means the run itself could not proceed
/// (configuration or store failure) or the request was malformed.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = if let Some(e) = self.0.downcast_ref::<VigilError>() {
            match e {
                VigilError::ObligationNotFound(_)
                | VigilError::SubjectNotFound(_)
                | VigilError::ProposalNotFound(_) => StatusCode::NOT_FOUND,
                VigilError::Config(_)
                | VigilError::Gateway(_)
                | VigilError::Store(_)
                | VigilError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
            }
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };

        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_variants_map_to_404() {
        let err = AppError(VigilError::SubjectNotFound(7).into());
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);

        let err = AppError(VigilError::ProposalNotFound(3).into());
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn config_error_maps_to_500() {
        let err = AppError(VigilError::Config("missing settings table".into()).into());
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn non_vigil_error_maps_to_500() {
        let err = AppError(anyhow::anyhow!("something unexpected"));
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn response_body_is_json_with_error_field() {
        let err = AppError(VigilError::Config("broken".into()).into());
        let response = err.into_response();
        let ct = response
            .headers()
            .get(axum::http::header::CONTENT_TYPE)
            .expect("should have content-type");
        assert!(ct.to_str().unwrap().contains("application/json"));
    }
}
