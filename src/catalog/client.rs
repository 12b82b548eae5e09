use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::{Client, Method};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::catalog::types::{ApiResponse, CatalogList, Focaccia, FocacciaCreate};
use crate::config::ApiConfig;

/// Network transport for the catalog API.
///
/// The cache layer only needs request/response semantics; tests swap in
/// an in-process fake.
#[async_trait]
pub trait CatalogApi: Send + Sync {
  async fn list(&self) -> Result<CatalogList>;

  async fn list_featured(&self) -> Result<CatalogList>;

  /// First `limit` items, or all of them when `None`
  async fn list_batch(&self, limit: Option<usize>) -> Result<CatalogList>;

  async fn get_by_id(&self, id: u64) -> Result<ApiResponse<Focaccia>>;

  async fn create(&self, item: &FocacciaCreate) -> Result<ApiResponse<Focaccia>>;

  async fn update(&self, id: u64, item: &Focaccia) -> Result<ApiResponse<Focaccia>>;

  async fn delete(&self, id: u64) -> Result<ApiResponse<Value>>;
}

/// HTTP client for the catalog API
#[derive(Clone)]
pub struct HttpCatalogClient {
  http: Client,
  base: Url,
}

impl HttpCatalogClient {
  pub fn new(config: &ApiConfig) -> Result<Self> {
    let base = Url::parse(&config.base_url)
      .map_err(|e| eyre!("Invalid API base URL {}: {}", config.base_url, e))?;
    if base.cannot_be_a_base() {
      return Err(eyre!("Invalid API base URL {}", config.base_url));
    }

    let http = Client::builder()
      .user_agent(concat!("crosti/", env!("CARGO_PKG_VERSION")))
      .connect_timeout(config.timeout())
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { http, base })
  }

  /// Base URL with `segments` appended as path segments.
  fn endpoint(&self, segments: &[&str]) -> Url {
    let mut url = self.base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
      path.pop_if_empty().extend(segments);
    }
    url
  }

  async fn send<T, B>(&self, method: Method, url: Url, body: Option<&B>) -> Result<T>
  where
    T: DeserializeOwned,
    B: Serialize + ?Sized,
  {
    debug!(%method, %url, "Catalog request");

    let mut request = self.http.request(method.clone(), url.clone());
    if let Some(body) = body {
      request = request.json(body);
    }

    let response = request
      .send()
      .await
      .map_err(|e| eyre!("Failed to reach {}: {}", url, e))?
      .error_for_status()
      .map_err(|e| eyre!("{} {} failed: {}", method, url, e))?;

    response
      .json::<T>()
      .await
      .map_err(|e| eyre!("Failed to parse response from {}: {}", url, e))
  }

  async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
    self.send::<T, ()>(Method::GET, url, None).await
  }
}

#[async_trait]
impl CatalogApi for HttpCatalogClient {
  async fn list(&self) -> Result<CatalogList> {
    self.get(self.endpoint(&[])).await
  }

  async fn list_featured(&self) -> Result<CatalogList> {
    self.get(self.endpoint(&["featured"])).await
  }

  async fn list_batch(&self, limit: Option<usize>) -> Result<CatalogList> {
    let mut url = self.endpoint(&[]);
    if let Some(limit) = limit {
      url
        .query_pairs_mut()
        .append_pair("limit", &limit.to_string());
    }
    self.get(url).await
  }

  async fn get_by_id(&self, id: u64) -> Result<ApiResponse<Focaccia>> {
    self.get(self.endpoint(&[&id.to_string()])).await
  }

  async fn create(&self, item: &FocacciaCreate) -> Result<ApiResponse<Focaccia>> {
    self.send(Method::POST, self.endpoint(&[]), Some(item)).await
  }

  async fn update(&self, id: u64, item: &Focaccia) -> Result<ApiResponse<Focaccia>> {
    self
      .send(Method::PUT, self.endpoint(&[&id.to_string()]), Some(item))
      .await
  }

  async fn delete(&self, id: u64) -> Result<ApiResponse<Value>> {
    self
      .send::<_, ()>(Method::DELETE, self.endpoint(&[&id.to_string()]), None)
      .await
  }
}
