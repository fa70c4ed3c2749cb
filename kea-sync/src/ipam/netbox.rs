//! NetBox REST client.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::error::{IpamError, Result};
use super::{AddressFilter, IpAddress, IpRange, IpamSource, Prefix, host};
use crate::attrs;

/// Extra query parameters appended to every query of one kind.
pub type Filter = BTreeMap<String, Value>;

const PREFIXES: &str = "prefixes";
const IP_RANGES: &str = "ip-ranges";
const IP_ADDRESSES: &str = "ip-addresses";

#[derive(Deserialize)]
struct Page<T> {
    #[serde(default)]
    next: Option<String>,
    results: Vec<T>,
}

/// [`IpamSource`] backed by the NetBox REST API.
pub struct NetboxClient {
    base: String,
    token: Option<String>,
    client: reqwest::Client,
    prefix_filter: Filter,
    iprange_filter: Filter,
    ipaddress_filter: Filter,
}

impl NetboxClient {
    pub fn new(url: &str, token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            base: url.trim_end_matches('/').to_string(),
            token,
            client,
            prefix_filter: Filter::new(),
            iprange_filter: Filter::new(),
            ipaddress_filter: Filter::new(),
        })
    }

    pub fn with_filters(mut self, prefix: Filter, iprange: Filter, ipaddress: Filter) -> Self {
        self.prefix_filter = prefix;
        self.iprange_filter = iprange;
        self.ipaddress_filter = ipaddress;
        self
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url).header(ACCEPT, "application/json");
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("Token {}", token)),
            None => request,
        }
    }

    async fn fetch<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        let url = response.url().to_string();
        debug!("GET {} -> {}", url, response.status());

        if !response.status().is_success() {
            return Err(IpamError::Status {
                url,
                status: response.status().as_u16(),
            });
        }
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|source| IpamError::Decode { url, source })
    }

    /// Query a list endpoint, following `next` links until exhausted.
    async fn list<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        filter: &Filter,
        extra: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let mut query = query_pairs(filter);
        query.extend(extra.iter().map(|(k, v)| (k.to_string(), v.clone())));

        let url = format!("{}/api/ipam/{}/", self.base, endpoint);
        let mut request = self.get(&url).query(&query);
        let mut results = Vec::new();
        loop {
            let page: Page<T> = self.fetch(request).await?;
            results.extend(page.results);
            match page.next {
                Some(next) => request = self.get(&next),
                None => break,
            }
        }
        Ok(results)
    }

    async fn first<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        filter: &Filter,
        id: u64,
    ) -> Result<Option<T>> {
        let found: Vec<T> = self.list(endpoint, filter, &[("id", id.to_string())]).await?;
        Ok(found.into_iter().next())
    }

    /// List addresses assigned to an interface, with the interface record
    /// expanded, keeping those whose interface has a MAC address.
    async fn addresses(&self, extra: &[(&str, String)]) -> Result<Vec<IpAddress>> {
        let mut query = vec![("assigned_to_interface", "true".to_string())];
        query.extend_from_slice(extra);
        let listed: Vec<IpAddress> = self
            .list(IP_ADDRESSES, &self.ipaddress_filter, &query)
            .await?;

        let mut addresses = Vec::with_capacity(listed.len());
        for mut address in listed {
            self.expand_assigned_object(&mut address).await?;
            if address.has_mac() {
                addresses.push(address);
            } else {
                debug!("IP {} skipped: no MAC address", address);
            }
        }
        Ok(addresses)
    }

    /// Replace the brief `assigned_object` by the full interface record.
    async fn expand_assigned_object(&self, address: &mut IpAddress) -> Result<()> {
        let Some(url) = attrs::resolve(&*address, "assigned_object.url")
            .and_then(|url| url.as_str().map(str::to_string))
        else {
            return Ok(());
        };
        let full: Value = self.fetch(self.get(&url)).await?;
        address.fields.insert("assigned_object".to_string(), full);
        Ok(())
    }
}

/// Flatten a filter into query pairs; lists repeat their key.
fn query_pairs(filter: &Filter) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (key, value) in filter {
        match value {
            Value::Array(values) => {
                pairs.extend(values.iter().map(|v| (key.clone(), scalar(v))));
            }
            value => pairs.push((key.clone(), scalar(value))),
        }
    }
    pairs
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl IpamSource for NetboxClient {
    async fn prefix(&self, id: u64) -> Result<Option<Prefix>> {
        self.first(PREFIXES, &self.prefix_filter, id).await
    }

    async fn prefixes_containing(&self, address: &str) -> Result<Vec<Prefix>> {
        let address = host(address).map_or_else(|| address.to_string(), |ip| ip.to_string());
        self.list(PREFIXES, &self.prefix_filter, &[("contains", address)])
            .await
    }

    async fn all_prefixes(&self) -> Result<Vec<Prefix>> {
        self.list(PREFIXES, &self.prefix_filter, &[]).await
    }

    async fn ip_range(&self, id: u64) -> Result<Option<IpRange>> {
        self.first(IP_RANGES, &self.iprange_filter, id).await
    }

    async fn ip_ranges_in(&self, parent: &str) -> Result<Vec<IpRange>> {
        // NetBox has no containment filter on ranges
        let ranges: Vec<IpRange> = self
            .list(IP_RANGES, &self.iprange_filter, &[("parent", parent.to_string())])
            .await?;
        Ok(ranges.into_iter().filter(|r| r.within(parent)).collect())
    }

    async fn ip_address(&self, id: u64) -> Result<Option<IpAddress>> {
        Ok(self
            .addresses(&[("id", id.to_string())])
            .await?
            .into_iter()
            .next())
    }

    async fn ip_addresses(&self, filter: &AddressFilter) -> Result<Vec<IpAddress>> {
        let (key, value) = filter.query();
        self.addresses(&[(key, value)]).await
    }
}
