use axum::{
    body::Bytes,
    extract::{FromRequest, OriginalUri, Request},
};

use super::response::ApiError;
use crate::gateway::request_payload;

pub const KEY_HEADER: &str = "x-deepsea-key";
pub const SIGNATURE_HEADER: &str = "x-deepsea-signature";

/// A request carrying a key id and an HMAC signature over
/// `"<METHOD> <PATH>\n<BODY>"`.
///
/// Extraction only collects the pieces; handlers decide whether to
/// authenticate or fully authorize (quota included).
pub struct SignedRequest {
    pub key_id: String,
    pub signature: String,
    pub payload: Vec<u8>,
    pub body: Bytes,
}

impl<S: Send + Sync> FromRequest<S> for SignedRequest {
    type Rejection = ApiError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let (key_id, signature, method, path) = {
            let header = |name: &str| {
                request
                    .headers()
                    .get(name)
                    .and_then(|h| h.to_str().ok())
                    .map(str::to_string)
            };
            let key_id =
                header(KEY_HEADER).ok_or_else(|| ApiError::unauthorized("Missing API key"))?;
            let signature = header(SIGNATURE_HEADER)
                .ok_or_else(|| ApiError::unauthorized("Missing signature"))?;

            let method = request.method().clone();
            let path = request
                .extensions()
                .get::<OriginalUri>()
                .map_or_else(|| request.uri().path().to_string(), |uri| uri.path().to_string());
            (key_id, signature, method, path)
        };

        let body = Bytes::from_request(request, state)
            .await
            .map_err(|e| ApiError::bad_request(format!("Unreadable body: {e}")))?;

        Ok(Self {
            key_id,
            signature,
            payload: request_payload(method.as_str(), &path, &body),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http;

    fn assert_send<F: Future + Send>(future: F) -> F {
        future
    }

    fn request(key: Option<&str>) -> Request {
        let mut builder = http::Request::builder()
            .method("POST")
            .uri("/api/v1/repos/demo/rename")
            .header(SIGNATURE_HEADER, "abcd");
        if let Some(key) = key {
            builder = builder.header(KEY_HEADER, key);
        }
        builder.body(Body::from("{\"new_name\":\"next\"}")).unwrap()
    }

    #[tokio::test]
    async fn test_extracts_headers_and_payload() {
        let extracted = SignedRequest::from_request(request(Some("ds_key_1")), &());
        let signed = assert_send(extracted).await.unwrap();

        assert_eq!(signed.key_id, "ds_key_1");
        assert_eq!(signed.signature, "abcd");
        assert_eq!(
            signed.payload,
            b"POST /api/v1/repos/demo/rename\n{\"new_name\":\"next\"}".to_vec()
        );
        assert_eq!(&signed.body[..], b"{\"new_name\":\"next\"}");
    }

    #[tokio::test]
    async fn test_missing_key_is_unauthorized() {
        let rejection = SignedRequest::from_request(request(None), &())
            .await
            .err()
            .unwrap();
        assert_eq!(rejection.status, http::StatusCode::UNAUTHORIZED);
    }
}
