use crate::config::SourceSettings;
use crate::error::{PageError, PipelineError, Result};
use crate::models::SourceQuery;
use crate::utils::constants::{COL_DEPARTMENT, COL_STATION_CODE, COL_TIMESTAMP};
use reqwest::header::RETRY_AFTER;
use reqwest::Client;
use serde_json::{Map, Value};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// One source record as delivered by the remote API.
pub type SourceRow = Map<String, Value>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub rows: Vec<SourceRow>,
}

impl Page {
    pub fn new(rows: Vec<SourceRow>) -> Self {
        Self { rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// A paginated tabular source. An empty page signals exhaustion.
pub trait PageSource: Send + Sync {
    fn fetch_page(
        &self,
        query: &SourceQuery,
        offset: u64,
        limit: usize,
    ) -> impl Future<Output = std::result::Result<Page, PageError>> + Send;
}

/// Client for a Socrata (SODA 2.x) dataset such as datos.gov.co.
#[derive(Debug, Clone)]
pub struct SocrataClient {
    client: Client,
    host: String,
    dataset_id: String,
    app_token: Option<String>,
}

impl SocrataClient {
    pub fn new(
        host: &str,
        dataset_id: &str,
        app_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .build()
            .map_err(|e| PipelineError::Config(format!("HTTP client could not be built: {}", e)))?;

        Ok(Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            dataset_id: dataset_id.to_string(),
            app_token: app_token.filter(|t| !t.trim().is_empty()),
        })
    }

    pub fn from_settings(settings: &SourceSettings) -> Result<Self> {
        Self::new(
            &settings.host,
            &settings.dataset_id,
            settings.app_token.clone(),
            settings.request_timeout(),
        )
    }

    pub fn resource_url(&self) -> String {
        format!("{}/resource/{}.json", self.host, self.dataset_id)
    }

    pub fn has_token(&self) -> bool {
        self.app_token.is_some()
    }

    /// SoQL `$where` clause for a query, `None` when nothing is filtered.
    pub fn build_where(query: &SourceQuery) -> Option<String> {
        let mut clauses = Vec::new();

        if let Some(department) = &query.department {
            clauses.push(format!("{}='{}'", COL_DEPARTMENT, escape(department)));
        }
        if let Some(start) = query.start_date {
            clauses.push(format!(
                "{} >= '{}T00:00:00'",
                COL_TIMESTAMP,
                start.format("%Y-%m-%d")
            ));
        }
        if let Some(end) = query.end_date {
            clauses.push(format!(
                "{} <= '{}T23:59:59'",
                COL_TIMESTAMP,
                end.format("%Y-%m-%d")
            ));
        }
        if let Some(code) = &query.station_code {
            clauses.push(format!("{}='{}'", COL_STATION_CODE, escape(code)));
        }

        if clauses.is_empty() {
            None
        } else {
            Some(clauses.join(" AND "))
        }
    }

    fn query_params(query: &SourceQuery, offset: u64, limit: usize) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("$limit", limit.to_string()),
            ("$offset", offset.to_string()),
            // Stable row order keeps offsets meaningful across requests.
            ("$order", ":id".to_string()),
        ];
        if let Some(clause) = Self::build_where(query) {
            params.push(("$where", clause));
        }
        params
    }
}

fn escape(value: &str) -> String {
    value.trim().replace('\'', "''")
}

fn parse_retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

impl PageSource for SocrataClient {
    async fn fetch_page(
        &self,
        query: &SourceQuery,
        offset: u64,
        limit: usize,
    ) -> std::result::Result<Page, PageError> {
        let url = self.resource_url();
        let params = Self::query_params(query, offset, limit);

        let mut request = self.client.get(&url).query(&params);
        if let Some(token) = &self.app_token {
            request = request.header("X-App-Token", token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PageError::from_status(
                status.as_u16(),
                parse_retry_after(&response),
            ));
        }

        // Only a malformed body is a decode error; a dropped body stays retryable.
        let rows: Vec<SourceRow> = response.json().await?;

        debug!("Fetched {} rows from {} (offset {})", rows.len(), url, offset);
        Ok(Page::new(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_where_clause() {
        let query = SourceQuery::for_department("CUNDINAMARCA").between(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        );
        assert_eq!(
            SocrataClient::build_where(&query).unwrap(),
            "departamento='CUNDINAMARCA' AND fechaobservacion >= '2024-01-01T00:00:00' \
             AND fechaobservacion <= '2024-01-31T23:59:59'"
        );

        let query = SourceQuery::default().for_station("21205580");
        assert_eq!(
            SocrataClient::build_where(&query).unwrap(),
            "codigoestacion='21205580'"
        );
        assert_eq!(SocrataClient::build_where(&SourceQuery::default()), None);
    }

    #[test]
    fn test_quotes_are_escaped() {
        let query = SourceQuery::for_department("O'Higgins");
        assert_eq!(
            SocrataClient::build_where(&query).unwrap(),
            "departamento='O''Higgins'"
        );
    }

    #[test]
    fn test_resource_url_and_params() {
        let client = SocrataClient::new(
            "https://www.datos.gov.co/",
            "sbwg-7ju4",
            Some("  ".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            client.resource_url(),
            "https://www.datos.gov.co/resource/sbwg-7ju4.json"
        );
        assert!(!client.has_token());

        let params = SocrataClient::query_params(&SourceQuery::default(), 100, 50);
        assert!(params.contains(&("$limit", "50".to_string())));
        assert!(params.contains(&("$offset", "100".to_string())));
        assert!(!params.iter().any(|(k, _)| *k == "$where"));
    }

    /// Serve one canned HTTP response on a local port.
    async fn serve_once(response: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });
        format!("http://{}", addr)
    }

    async fn fetch_from(response: &'static str) -> std::result::Result<Page, PageError> {
        let host = serve_once(response).await;
        let client = SocrataClient::new(&host, "sbwg-7ju4", None, Duration::from_secs(5)).unwrap();
        client.fetch_page(&SourceQuery::default(), 0, 10).await
    }

    #[tokio::test]
    async fn test_body_errors_are_classified() {
        let page = fetch_from(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 24\r\n\r\n[{\"codigoestacion\":\"1\"}]",
        )
        .await
        .unwrap();
        assert_eq!(page.rows.len(), 1);

        let err = fetch_from(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 9\r\n\r\nnot json!",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PageError::Decode(_)));
        assert!(!err.is_retryable());

        // Connection closed before the announced length arrived.
        let err = fetch_from(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 500\r\n\r\n[{\"codigo",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PageError::Connection(_)));
        assert!(err.is_retryable());
    }
}
