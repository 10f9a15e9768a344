// SPDX-License-Identifier: Apache-2.0

//! FeiShu (Lark) custom bot webhook.
//!
//! Messages are posted as rich-text `post` messages and signed with the bot's
//! secret: `sign = base64(HMAC-SHA256(key = "<timestamp>\n<secret>", ""))`.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use hmac::{Hmac, Mac};
use http::{Method, Request, StatusCode, Uri, header};
use http_body_util::{BodyExt, Full};
use hyper_rustls::{ConfigBuilderExt, HttpsConnector};
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use rustls::{ClientConfig, RootCertStore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tower::BoxError;
use tracing::{debug, warn};

use super::{Notifier, SendFuture, SinkError};

type HmacSha256 = Hmac<Sha256>;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FeiShuConfig {
    pub url: String,
    #[serde(default)]
    pub secret: String,
}

#[derive(Serialize)]
struct Message<'a> {
    timestamp: String,
    sign: String,
    msg_type: &'static str,
    content: Content<'a>,
}

#[derive(Serialize)]
struct Content<'a> {
    post: Post<'a>,
}

#[derive(Serialize)]
struct Post<'a> {
    zh_cn: RichText<'a>,
}

#[derive(Serialize)]
struct RichText<'a> {
    title: &'a str,
    content: Vec<Vec<Item<'a>>>,
}

#[derive(Serialize)]
struct Item<'a> {
    tag: &'static str,
    text: &'a str,
}

pub struct FeiShu {
    uri: Uri,
    secret: String,
    client: HyperClient<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl FeiShu {
    pub fn new(config: FeiShuConfig) -> Result<Self, BoxError> {
        let uri: Uri = config
            .url
            .parse()
            .map_err(|e| format!("invalid webhook url {:?}: {}", config.url, e))?;

        Ok(Self {
            uri,
            secret: config.secret,
            client: build_hyper_client(),
        })
    }

    /// Signature for a message sent at `timestamp` (unix seconds).
    pub fn sign(&self, timestamp: i64) -> Result<String, SinkError> {
        let key = format!("{}\n{}", timestamp, self.secret);
        let mac =
            HmacSha256::new_from_slice(key.as_bytes()).map_err(|e| SinkError::Sign(e.to_string()))?;
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }

    fn body(&self, title: &str, text: &str, timestamp: i64) -> Result<Vec<u8>, SinkError> {
        let message = Message {
            timestamp: timestamp.to_string(),
            sign: self.sign(timestamp)?,
            msg_type: "post",
            content: Content {
                post: Post {
                    zh_cn: RichText {
                        title,
                        content: vec![vec![Item { tag: "text", text }]],
                    },
                },
            },
        };
        serde_json::to_vec(&message).map_err(|e| SinkError::Build(e.to_string()))
    }

    async fn post(&self, title: &str, text: &str) -> Result<(), SinkError> {
        let body = self.body(title, text, chrono::Utc::now().timestamp())?;

        let request = Request::builder()
            .method(Method::POST)
            .uri(self.uri.clone())
            .header(header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| SinkError::Build(e.to_string()))?;

        let response = tokio::time::timeout(REQUEST_TIMEOUT, self.client.request(request))
            .await
            .map_err(|_| SinkError::Transport("request timed out".to_string()))?
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map(|collected| String::from_utf8_lossy(&collected.to_bytes()).into_owned())
            .unwrap_or_default();

        if status != StatusCode::OK {
            return Err(SinkError::Status { status, body });
        }

        debug!(title, response = %body, "Webhook delivered");
        Ok(())
    }
}

impl Notifier for FeiShu {
    fn send<'a>(&'a self, title: &'a str, text: &'a str) -> SendFuture<'a> {
        Box::pin(self.post(title, text))
    }
}

fn build_hyper_client() -> HyperClient<HttpsConnector<HttpConnector>, Full<Bytes>> {
    let client_config = match ClientConfig::builder().with_native_roots() {
        Ok(builder) => builder.with_no_client_auth(),
        Err(e) => {
            warn!("No native root certificates available, https webhooks will fail: {}", e);
            ClientConfig::builder()
                .with_root_certificates(RootCertStore::empty())
                .with_no_client_auth()
        }
    };

    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_tls_config(client_config)
        .https_or_http()
        .enable_http1()
        .build();

    HyperClient::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(30))
        .timer(TokioTimer::new())
        .build::<_, Full<Bytes>>(https)
}
