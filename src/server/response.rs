//! JSON envelopes and caching headers for API responses

use axum::http::header::CACHE_CONTROL;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::data::UpstreamError;
use crate::query::ResultPage;

/// Error string for upstream deadlines
pub const TIMEOUT_ERROR: &str = "Upstream request timed out";

/// Error string for every other upstream failure
pub const FETCH_ERROR: &str = "Failed to fetch data";

const NO_STORE: &str = "no-store";

#[derive(Debug, Serialize)]
struct SuccessBody {
    success: bool,
    result: ResultPage,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

/// Builds the 200 response for a result page
///
/// Searches are never stored by intermediaries; unfiltered listings may be
/// cached by shared caches for `listing_max_age_secs`.
pub fn success_response(page: ResultPage, searched: bool, listing_max_age_secs: u64) -> Response {
    let cache_control = if searched || listing_max_age_secs == 0 {
        HeaderValue::from_static(NO_STORE)
    } else {
        HeaderValue::from_str(&format!("public, max-age=0, s-maxage={listing_max_age_secs}"))
            .unwrap_or_else(|_| HeaderValue::from_static(NO_STORE))
    };

    let body = SuccessBody {
        success: true,
        result: page,
    };
    let mut resp = (StatusCode::OK, Json(body)).into_response();
    resp.headers_mut().insert(CACHE_CONTROL, cache_control);
    resp
}

/// A failed request, rendered as `{ success: false, error, details? }`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    status: StatusCode,
    error: &'static str,
    details: Option<String>,
}

impl ApiError {
    /// Maps an upstream failure to its HTTP form
    ///
    /// Timeouts become 504 so clients can tell a slow catalog from a broken
    /// one; everything else is 500.
    pub fn from_upstream(err: &UpstreamError, expose_details: bool) -> Self {
        let (status, error) = if err.is_timeout() {
            (StatusCode::GATEWAY_TIMEOUT, TIMEOUT_ERROR)
        } else {
            (StatusCode::INTERNAL_SERVER_ERROR, FETCH_ERROR)
        };
        Self {
            status,
            error,
            details: expose_details.then(|| err.to_string()),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            error: self.error,
            details: self.details,
        };
        let mut resp = (self.status, Json(body)).into_response();
        resp.headers_mut()
            .insert(CACHE_CONTROL, HeaderValue::from_static(NO_STORE));
        resp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> ResultPage {
        ResultPage {
            records: Vec::new(),
            total: 0,
            display_total: 0,
            current_page: 1,
            limit: 20,
            total_records: Some(0),
        }
    }

    fn cache_control(resp: &Response) -> &str {
        resp.headers()
            .get(CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }

    #[test]
    fn test_search_responses_are_not_stored() {
        let resp = success_response(page(), true, 60);

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(cache_control(&resp), "no-store");
    }

    #[test]
    fn test_listing_responses_allow_shared_caching() {
        let resp = success_response(page(), false, 60);

        assert_eq!(cache_control(&resp), "public, max-age=0, s-maxage=60");
    }

    #[test]
    fn test_listing_max_age_zero_disables_caching() {
        let resp = success_response(page(), false, 0);

        assert_eq!(cache_control(&resp), "no-store");
    }

    #[test]
    fn test_timeout_maps_to_gateway_timeout() {
        let err = UpstreamError::Timeout {
            offset: 0,
            attempts: 3,
        };

        let api_error = ApiError::from_upstream(&err, true);

        assert_eq!(api_error.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(api_error.error, TIMEOUT_ERROR);
        assert!(api_error.details.unwrap().contains("timed out"));
    }

    #[test]
    fn test_status_error_maps_to_internal_error() {
        let err = UpstreamError::Status {
            offset: 0,
            status: 503,
            attempts: 3,
        };

        let api_error = ApiError::from_upstream(&err, true);

        assert_eq!(api_error.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api_error.error, FETCH_ERROR);
        assert!(api_error.details.unwrap().contains("503"));
    }

    #[test]
    fn test_details_hidden_in_production() {
        let err = UpstreamError::Malformed {
            offset: 0,
            detail: "secret".to_string(),
            attempts: 1,
        };

        let api_error = ApiError::from_upstream(&err, false);

        assert!(api_error.details.is_none());
    }

    #[test]
    fn test_error_response_is_not_stored() {
        let err = UpstreamError::Status {
            offset: 0,
            status: 502,
            attempts: 1,
        };

        let resp = ApiError::from_upstream(&err, false).into_response();

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(cache_control(&resp), "no-store");
    }
}
