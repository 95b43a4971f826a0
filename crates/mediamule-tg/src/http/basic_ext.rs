use super::HttpClientError;
use crate::prelude::*;
use crate::{err, err_ctx, Result};
use async_trait::async_trait;
use bytes::Bytes;
use easy_ext::ext;
use reqwest::Response;
use reqwest_middleware::RequestBuilder;

#[ext(RequestBuilderBasicExt)]
#[async_trait]
pub(crate) impl RequestBuilder {
    /// Better version of [`RequestBuilder::send`] that returns an error
    /// if the error response status code is returned.
    async fn try_send(self) -> Result<Response> {
        let response = self
            .send()
            .await
            .map_err(err_ctx!(HttpClientError::Request))?;

        let status = response.status();

        if !status.is_client_error() && !status.is_server_error() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_else(|err| {
            format!(
                "Could not collect the error response body text: {}",
                err.display_chain()
            )
        });

        Err(err!(HttpClientError::BadResponseStatusCode {
            status,
            body: body.truncate_chars(500)
        }))
    }

    async fn read_bytes(self) -> Result<Bytes> {
        self.try_send().await?.read_bytes().await
    }
}

#[ext(ResponseBasicExt)]
#[async_trait]
pub(crate) impl Response {
    /// Value of the `content-type` header if it's present and valid
    fn content_type(&self) -> Option<&str> {
        self.headers()
            .get(reqwest::header::CONTENT_TYPE)?
            .to_str()
            .ok()
    }

    async fn read_bytes(self) -> Result<Bytes> {
        self.bytes()
            .await
            .map_err(err_ctx!(HttpClientError::ReadPayload))
    }
}
