use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use super::{PortAttributes, TopologySource};
use crate::config::RsviewConfig;
use crate::error::{AppError, ErrorKind};
use crate::model::MacAddr;

pub struct RsviewClient {
    client: Client,
    config: RsviewConfig,
}

impl RsviewClient {
    /// Build a client and prove the credentials by fetching the start page
    /// and looking for the configured test string.
    pub async fn connect(config: RsviewConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| AppError::new(ErrorKind::InternalCommonError).with_source(e))?;
        let this = Self { client, config };

        let body = this.fetch(&this.config.url).await?;
        if !body.lines().any(|line| line.contains(&this.config.test_string)) {
            return Err(AppError::new(ErrorKind::RsviewAuthTestFail));
        }
        tracing::info!(url = %this.config.url, "rsview client ready");
        Ok(this)
    }

    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        let response = self
            .client
            .get(url)
            .basic_auth(&self.config.login, Some(&self.config.password))
            .send()
            .await
            .map_err(|e| AppError::new(ErrorKind::RsviewRequestFailed).with_source(e))?;

        if response.status() != StatusCode::OK {
            tracing::warn!(status = %response.status(), url, "Abnormal rsview response");
            return Err(AppError::new(ErrorKind::RsviewGenericError)
                .with_source(format!("status {}", response.status())));
        }

        response
            .text()
            .await
            .map_err(|e| AppError::new(ErrorKind::RsviewRequestFailed).with_source(e))
    }
}

#[async_trait]
impl TopologySource for RsviewClient {
    async fn port_attributes(&self, mac: MacAddr) -> Result<PortAttributes, AppError> {
        let url = format!("{}?mac={mac}", self.config.url.trim_end_matches('/'));
        let page = self.fetch(&url).await?;
        PortAttributes::from_fields(row_cells(&page, &mac.to_string()))
    }
}

/// Text of the `<td>` cells in the first table row mentioning `needle`.
fn row_cells(page: &str, needle: &str) -> Vec<String> {
    let lower = page.to_ascii_lowercase();
    let Some(row) = lower
        .split("<tr")
        .skip(1)
        .map(|row| row.split("</tr>").next().unwrap_or(row))
        .find(|row| row.contains(needle))
    else {
        return Vec::new();
    };

    row.split("<td")
        .skip(1)
        .map(|cell| {
            let cell = cell.split("</td>").next().unwrap_or(cell);
            let content = cell.split_once('>').map_or("", |(_, rest)| rest);
            strip_tags(content).trim().to_string()
        })
        .collect()
}

fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}
