//! Blocking client for a remote gateway. Every gateway call is signed with
//! the key's secret; the commit listing is public.

use std::time::Duration;

use reqwest::Method;
use reqwest::Url;
use reqwest::blocking::{Client, Response};
use serde::{Deserialize, de::DeserializeOwned};

use crate::gateway::{request_payload, sign};
use crate::packet::Packet;
use crate::server::dto::{PublishRequest, PublishResponse, RenameRepoRequest, RenameRepoResponse};
use crate::server::{KEY_HEADER, SIGNATURE_HEADER};
use crate::types::{CommitRecord, RepoOwnership};

#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub data: Option<T>,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct GatewayClient {
    client: Client,
    base_url: Url,
    key_id: String,
    secret: String,
}

impl GatewayClient {
    pub fn new(base_url: &str, key_id: &str, secret: &str) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;
        let base_url = Url::parse(base_url.trim_end_matches('/'))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Not a usable gateway URL: {base_url}");
        }
        Ok(Self {
            client,
            base_url,
            key_id: key_id.to_string(),
            secret: secret.to_string(),
        })
    }

    fn url(&self, segments: &[&str]) -> anyhow::Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow::anyhow!("Not a usable gateway URL: {}", self.base_url))?
            .pop_if_empty()
            .extend(["api", "v1"])
            .extend(segments);
        Ok(url)
    }

    fn signed(&self, method: Method, segments: &[&str], body: Vec<u8>) -> anyhow::Result<Response> {
        let url = self.url(segments)?;
        let payload = request_payload(method.as_str(), url.path(), &body);
        let signature = sign(&self.secret, &payload)?;

        let resp = self
            .client
            .request(method, url)
            .header(KEY_HEADER, &self.key_id)
            .header(SIGNATURE_HEADER, signature)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()?;
        Ok(resp)
    }

    /// Publishes through the gateway. A post the network refused still comes
    /// back as a response, with `accepted` false.
    pub fn publish(&self, packet: &Packet, channel: Option<&str>) -> anyhow::Result<PublishResponse> {
        let body = serde_json::to_vec(&PublishRequest {
            packet: packet.clone(),
            channel: channel.map(str::to_string),
        })?;
        let resp = self.signed(Method::POST, &["publish"], body)?;
        if resp.status() == reqwest::StatusCode::BAD_GATEWAY {
            let api_resp: ApiResponse<PublishResponse> = resp.json()?;
            if let Some(data) = api_resp.data {
                return Ok(data);
            }
            anyhow::bail!(
                api_resp
                    .error
                    .unwrap_or_else(|| "Gateway could not publish".into())
            );
        }
        handle_response(resp)
    }

    pub fn list_repos(&self) -> anyhow::Result<Vec<RepoOwnership>> {
        let resp = self.signed(Method::GET, &["repos"], Vec::new())?;
        handle_response(resp)
    }

    pub fn release_repo(&self, name: &str) -> anyhow::Result<()> {
        let resp = self.signed(Method::DELETE, &["repos", name], Vec::new())?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(error_from(resp))
        }
    }

    pub fn rename_repo(&self, name: &str, new_name: &str) -> anyhow::Result<RenameRepoResponse> {
        let body = serde_json::to_vec(&RenameRepoRequest {
            new_name: new_name.to_string(),
        })?;
        let resp = self.signed(Method::POST, &["repos", name, "rename"], body)?;
        handle_response(resp)
    }

    pub fn list_commits(&self, repo: Option<&str>) -> anyhow::Result<Vec<CommitRecord>> {
        let mut url = self.url(&["commits"])?;
        if let Some(repo) = repo {
            url.query_pairs_mut().append_pair("repo", repo);
        }
        let resp = self.client.get(url).send()?;
        handle_response(resp)
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }
}

fn handle_response<T: DeserializeOwned>(resp: Response) -> anyhow::Result<T> {
    if resp.status().is_success() {
        let api_resp: ApiResponse<T> = resp.json()?;
        api_resp
            .data
            .ok_or_else(|| anyhow::anyhow!("Server returned an empty response"))
    } else {
        Err(error_from(resp))
    }
}

fn error_from(resp: Response) -> anyhow::Error {
    let status = resp.status();
    match resp.json::<ApiResponse<()>>() {
        Ok(api_resp) => anyhow::anyhow!(
            api_resp
                .error
                .unwrap_or_else(|| "Server error (no details provided)".into())
        ),
        Err(_) => anyhow::anyhow!("Server error ({status})"),
    }
}
