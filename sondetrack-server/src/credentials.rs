//! Anonymous credentials from an identity pool
//!
//! Two calls against the Cognito identity service: `GetId` hands out an
//! identity id for the pool, `GetCredentialsForIdentity` exchanges it for
//! temporary keys. Both are unauthenticated JSON-over-HTTP requests.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

const CONTENT_TYPE: &str = "application/x-amz-json-1.1";
const TARGET_PREFIX: &str = "AWSCognitoIdentityService";

/// Why a call to the identity service failed
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Http(#[from] reqwest::Error),
    #[error("{kind}: {message}")]
    Service { kind: String, message: String },
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("error retrieving identity: {0}")]
    Identity(#[source] ServiceError),
    #[error("error retrieving credentials: {0}")]
    Credentials(#[source] ServiceError),
}

/// Temporary keys for signing the transport URL
#[derive(Clone, Deserialize)]
pub struct AwsCredentials {
    #[serde(rename = "AccessKeyId")]
    pub access_key_id: String,
    #[serde(rename = "SecretKey")]
    pub secret_key: String,
    #[serde(rename = "SessionToken")]
    pub session_token: String,
    /// Seconds since the epoch
    #[serde(rename = "Expiration", default)]
    pub expiration: Option<f64>,
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct GetIdRequest<'a> {
    #[serde(rename = "IdentityPoolId")]
    identity_pool_id: &'a str,
}

#[derive(Deserialize)]
struct GetIdResponse {
    #[serde(rename = "IdentityId")]
    identity_id: String,
}

#[derive(Serialize)]
struct GetCredentialsRequest<'a> {
    #[serde(rename = "IdentityId")]
    identity_id: &'a str,
}

#[derive(Deserialize)]
struct GetCredentialsResponse {
    #[serde(rename = "Credentials")]
    credentials: AwsCredentials,
}

#[derive(Deserialize)]
struct ErrorResponse {
    #[serde(rename = "__type", default)]
    kind: String,
    #[serde(default, alias = "Message")]
    message: String,
}

/// Client for the identity service of one region
#[derive(Debug, Clone)]
pub struct IdentityClient {
    http: reqwest::Client,
    endpoint: String,
}

impl IdentityClient {
    pub fn new(region: &str) -> Self {
        Self::with_endpoint(format!("https://cognito-identity.{}.amazonaws.com/", region))
    }

    pub fn with_endpoint(endpoint: String) -> Self {
        IdentityClient {
            http: reqwest::Client::new(),
            endpoint,
        }
    }

    pub async fn get_id(&self, identity_pool_id: &str) -> Result<String, CredentialError> {
        let response: GetIdResponse = self
            .call("GetId", &GetIdRequest { identity_pool_id })
            .await
            .map_err(CredentialError::Identity)?;
        Ok(response.identity_id)
    }

    pub async fn get_credentials(&self, identity_id: &str) -> Result<AwsCredentials, CredentialError> {
        let response: GetCredentialsResponse = self
            .call("GetCredentialsForIdentity", &GetCredentialsRequest { identity_id })
            .await
            .map_err(CredentialError::Credentials)?;
        Ok(response.credentials)
    }

    /// Identity and credentials in one go
    pub async fn fetch(&self, identity_pool_id: &str) -> Result<AwsCredentials, CredentialError> {
        let identity_id = self.get_id(identity_pool_id).await?;
        log::info!("retrieved identity: {}", identity_id);
        self.get_credentials(&identity_id).await
    }

    async fn call<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        action: &str,
        request: &Req,
    ) -> Result<Resp, ServiceError> {
        let response = self
            .http
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .header("X-Amz-Target", format!("{}.{}", TARGET_PREFIX, action))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<Resp>().await?);
        }

        let body = response.text().await.unwrap_or_default();
        let error = serde_json::from_str::<ErrorResponse>(&body).unwrap_or(ErrorResponse {
            kind: status.to_string(),
            message: body,
        });
        Err(ServiceError::Service {
            kind: error.kind,
            message: error.message,
        })
    }
}
