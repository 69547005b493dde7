//! Plain request/response endpoints: the agent directory and stored history.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::client::ChatClient;
use crate::errors::{TransportError, error_message_from_body};

/// One past message as returned by the history endpoint.
///
/// Every field is optional on the wire; the conversation layer fills in
/// whatever is missing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub ts: Option<String>,
}

impl ChatClient {
    /// Lists the agent identifiers offered by the service, in server order.
    pub async fn list_agents(&self) -> Result<Vec<String>, TransportError> {
        let url = self.config.agents_url();
        let response = self.http.get(&url).send().await.map_err(|e| TransportError::Request {
            url: url.clone(),
            message: e.to_string(),
            status_code: None,
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| TransportError::Request {
            url: url.clone(),
            message: e.to_string(),
            status_code: Some(status.as_u16()),
        })?;
        if !status.is_success() {
            return Err(TransportError::Request {
                message: error_message_from_body(status, &body),
                url,
                status_code: Some(status.as_u16()),
            });
        }

        let agents: Vec<String> = serde_json::from_str(&body).map_err(|e| TransportError::Decode {
            url,
            message: e.to_string(),
        })?;
        debug!(count = agents.len(), "listed agents");
        Ok(agents)
    }

    /// Fetches up to `limit` past messages exchanged with `agent`, oldest first.
    ///
    /// A non-success status means "no history" and yields an empty list.
    pub async fn fetch_history(
        &self,
        agent: &str,
        limit: Option<usize>,
    ) -> Result<Vec<HistoryRecord>, TransportError> {
        let url = self.config.history_url(agent);
        let mut request = self.http.get(&url);
        if let Some(limit) = limit {
            request = request.query(&[("limit", limit)]);
        }
        let response = request.send().await.map_err(|e| TransportError::Request {
            url: url.clone(),
            message: e.to_string(),
            status_code: None,
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(agent, status = status.as_u16(), "history unavailable");
            return Ok(Vec::new());
        }
        let records = response
            .json::<Vec<HistoryRecord>>()
            .await
            .map_err(|e| TransportError::Decode {
                url,
                message: e.to_string(),
            })?;
        debug!(agent, count = records.len(), "fetched history");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ChatClient {
        ChatClient::new(TransportConfig::new(server.uri())).expect("client")
    }

    #[tokio::test]
    async fn lists_agents_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/chat/agents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!(["zeta", "alpha"])))
            .expect(1)
            .mount(&server)
            .await;

        let agents = client_for(&server).list_agents().await.expect("agents");
        assert_eq!(agents, vec!["zeta".to_string(), "alpha".to_string()]);
    }

    #[tokio::test]
    async fn agent_listing_failure_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client_for(&server).list_agents().await.expect_err("should fail");
        assert!(matches!(err, TransportError::Request { status_code: Some(503), .. }));
    }

    #[tokio::test]
    async fn history_passes_limit_and_tolerates_missing_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/chat/messages/bot"))
            .and(query_param("limit", "200"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": "1", "from": "me", "text": "hi", "ts": "2026-01-01T00:00:00Z"},
                {"text": "hello"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let history = client_for(&server)
            .fetch_history("bot", Some(200))
            .await
            .expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].from.as_deref(), Some("me"));
        assert_eq!(history[1].id, None);
        assert_eq!(history[1].text.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn missing_history_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let history = client_for(&server).fetch_history("ghost", None).await.expect("history");
        assert!(history.is_empty());
    }
}
