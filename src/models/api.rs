use axum::Json;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

pub const HEADER_OWNER_ID: &str = "x-owner-id";
pub const HEADER_IDEMPOTENCY_KEY: &str = "idempotency-key";
pub const HEADER_UPLOAD_OFFSET: &str = "upload-offset";
pub const HEADER_UPLOAD_FINGERPRINT: &str = "x-upload-fingerprint";

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    pub message: String,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    fn api_error_inner<E, T>(
        status: StatusCode,
        err: Option<E>,
        msg: Option<T>,
        fallback_msg: &str,
    ) -> Self
    where
        E: std::error::Error,
        T: Into<String>,
    {
        let user_msg = msg.map(|m| m.into()).unwrap_or_else(|| fallback_msg.into());
        if let Some(err) = err {
            tracing::error!("api error ({}): {} caused by {:?}", status, &user_msg, err);
        }
        Self {
            status,
            message: user_msg,
        }
    }
}

macro_rules! define_api_error {
    ($fn_name:ident, $http_status:expr, $fallback_msg:expr) => {
        impl ApiError {
            #[inline]
            pub fn $fn_name<E, T>(err: Option<E>, msg: Option<T>) -> Self
            where
                E: ::std::error::Error,
                T: Into<String>,
            {
                Self::api_error_inner($http_status, err, msg, $fallback_msg)
            }
        }
        macro_rules! $fn_name {
            (err = $err: expr) => {
                $crate::models::api::ApiError::$fn_name(Some($err), None::<&str>)
            };
            ($msg: expr) => {
                $crate::models::api::ApiError::$fn_name::<::std::convert::Infallible, _>(
                    None,
                    Some($msg),
                )
            };
            ($err: expr,$msg: expr) => {
                $crate::models::api::ApiError::$fn_name(Some($err), Some($msg))
            };
        }
        #[allow(unused_imports)]
        pub(crate) use $fn_name;
    };
}

define_api_error!(bad_request, StatusCode::BAD_REQUEST, "Bad Request");
define_api_error!(forbidden, StatusCode::FORBIDDEN, "Forbidden");
define_api_error!(not_found, StatusCode::NOT_FOUND, "Not Found");
define_api_error!(conflict, StatusCode::CONFLICT, "Conflict");
define_api_error!(gone, StatusCode::GONE, "Gone");
define_api_error!(
    precondition_failed,
    StatusCode::PRECONDITION_FAILED,
    "Precondition Failed"
);
define_api_error!(
    payload_too_large,
    StatusCode::PAYLOAD_TOO_LARGE,
    "Payload Too Large"
);
define_api_error!(
    unsupported_media,
    StatusCode::UNSUPPORTED_MEDIA_TYPE,
    "Unsupported Media Type"
);
define_api_error!(
    service_unavailable,
    StatusCode::SERVICE_UNAVAILABLE,
    "Service Unavailable"
);
define_api_error!(
    internal,
    StatusCode::INTERNAL_SERVER_ERROR,
    "Internal Server Error"
);

impl From<crate::services::states::db::DataBaseError> for ApiError {
    fn from(e: crate::services::states::db::DataBaseError) -> Self {
        internal!(e, "Database error")
    }
}

impl From<crate::services::drafts::DraftError> for ApiError {
    fn from(e: crate::services::drafts::DraftError) -> Self {
        use crate::services::drafts::DraftError;
        match e {
            DraftError::NotFound(_) => not_found!("Draft not found"),
            DraftError::InvalidPatch => bad_request!("Draft patch must be a JSON object"),
            DraftError::Db(e) => internal!(e, "Database error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(self);
        (status, body).into_response()
    }
}

/// Caller identity threaded through by the identity collaborator; the core
/// never authenticates, it only requires the header to be present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerId(pub String);

impl<S> FromRequestParts<S> for OwnerId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(HEADER_OWNER_ID)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(|v| OwnerId(v.to_string()))
            .ok_or_else(|| bad_request!("Missing X-Owner-Id header"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyKey(pub String);

impl<S> FromRequestParts<S> for IdempotencyKey
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(HEADER_IDEMPOTENCY_KEY)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(|v| IdempotencyKey(v.to_string()))
            .ok_or_else(|| bad_request!("Missing Idempotency-Key header"))
    }
}

pub mod prelude {
    pub use super::{ApiError, ApiResult, IdempotencyKey, OwnerId};
    pub(crate) use crate::models::api::{
        bad_request, conflict, forbidden, gone, internal, not_found, payload_too_large,
        precondition_failed, service_unavailable, unsupported_media,
    };
}
