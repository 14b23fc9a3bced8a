//! Station directory behind an HTTP API.
//!
//! `GET  {base}/stations?frequency=92.1` → `Station` or 404
//! `POST {base}/stations`                → created `Station`, 409 if taken

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

use tuner_core::model::{NewStation, Station};
use tuner_core::station_sync::StationDirectory;
use tuner_core::Frequency;

const USER_AGENT: &str = concat!("tunerd/", env!("CARGO_PKG_VERSION"));

pub struct HttpStationDirectory {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpStationDirectory {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn stations_url(&self) -> String {
        format!("{}/stations", self.base_url)
    }
}

#[async_trait]
impl StationDirectory for HttpStationDirectory {
    async fn station_for_frequency(&self, frequency: Frequency) -> anyhow::Result<Option<Station>> {
        let response = self
            .http_client
            .get(self.stations_url())
            .query(&[("frequency", frequency.to_string())])
            .send()
            .await?;

        let status = response.status();
        debug!("remote: GET stations?frequency={} → {}", frequency, status);
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("directory returned {}: {}", status, body);
        }
        Ok(response.json::<Option<Station>>().await?)
    }

    async fn create_station(&self, station: NewStation) -> anyhow::Result<Station> {
        let frequency = station.frequency;
        let response = self
            .http_client
            .post(self.stations_url())
            .json(&station)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::CONFLICT {
            anyhow::bail!("frequency {} is already taken", frequency);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("directory returned {}: {}", status, body);
        }
        Ok(response.json::<Station>().await?)
    }
}
