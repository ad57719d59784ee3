use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};

use crate::services::{
    PredictionQuery, PredictionResponse, PredictionService, ServiceError, UncertaintyQuery,
    UncertaintyResponse, UncertaintyService,
};

const USER_AGENT: &str = "orcatrail-research/0.1";

fn map_error(err: &reqwest::Error) -> ServiceError {
    if err.is_timeout() {
        ServiceError::Transport(format!("request timed out: {err}"))
    } else if let Some(status) = err.status() {
        ServiceError::Status(status.as_u16())
    } else if err.is_decode() {
        ServiceError::Decode(err.to_string())
    } else {
        ServiceError::Transport(err.to_string())
    }
}

/// JSON-over-HTTP endpoint.
#[derive(Debug, Clone)]
struct JsonEndpoint {
    client: Client,
    url: String,
}

impl JsonEndpoint {
    fn new(base_url: &str, path: &str) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| map_error(&err))?;
        Ok(Self {
            client,
            url: format!("{}/{path}", base_url.trim_end_matches('/')),
        })
    }

    async fn post<Q: Serialize + Sync, R: DeserializeOwned>(&self, body: &Q) -> Result<R, ServiceError> {
        self.client
            .post(&self.url)
            .json(body)
            .send()
            .await
            .map_err(|err| map_error(&err))?
            .error_for_status()
            .map_err(|err| map_error(&err))?
            .json::<R>()
            .await
            .map_err(|err| map_error(&err))
    }
}

/// Prediction service reached over HTTP (`POST {base}/predict`).
#[derive(Debug, Clone)]
pub struct HttpPredictionService {
    endpoint: JsonEndpoint,
}

impl HttpPredictionService {
    /// Creates a client for `base_url`.
    pub fn new(base_url: &str) -> Result<Self, ServiceError> {
        Ok(Self {
            endpoint: JsonEndpoint::new(base_url, "predict")?,
        })
    }

    /// Full request URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.endpoint.url
    }
}

#[async_trait]
impl PredictionService for HttpPredictionService {
    fn name(&self) -> &str {
        "http-prediction"
    }

    async fn predict(&self, query: &PredictionQuery) -> Result<PredictionResponse, ServiceError> {
        self.endpoint.post(query).await
    }
}

/// Uncertainty service reached over HTTP (`POST {base}/sample`).
#[derive(Debug, Clone)]
pub struct HttpUncertaintyService {
    endpoint: JsonEndpoint,
}

impl HttpUncertaintyService {
    /// Creates a client for `base_url`.
    pub fn new(base_url: &str) -> Result<Self, ServiceError> {
        Ok(Self {
            endpoint: JsonEndpoint::new(base_url, "sample")?,
        })
    }

    /// Full request URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.endpoint.url
    }
}

#[async_trait]
impl UncertaintyService for HttpUncertaintyService {
    fn name(&self) -> &str {
        "http-uncertainty"
    }

    async fn sample(&self, query: &UncertaintyQuery) -> Result<UncertaintyResponse, ServiceError> {
        self.endpoint.post(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use orcatrail_core::{BoundingBox, GeoPoint};

    #[test]
    fn joins_base_url() {
        let service = HttpPredictionService::new("http://models.local/v1/").unwrap();
        assert_eq!(service.url(), "http://models.local/v1/predict");
        let service = HttpUncertaintyService::new("http://models.local").unwrap();
        assert_eq!(service.url(), "http://models.local/sample");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_transport_error() {
        let service = HttpPredictionService::new("http://127.0.0.1:9").unwrap();
        let query = PredictionQuery {
            bounds: BoundingBox::around(GeoPoint::new(48.53, -123.08), 10.0),
            start: NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2026, 7, 3).unwrap(),
            resolution_km: 1.0,
            include_uncertainty: true,
        };
        let err = service.predict(&query).await.unwrap_err();
        assert!(matches!(err, ServiceError::Transport(_)), "{err:?}");
    }
}
