//! URL construction for the loyalty source API

use reqwest::Url;

/// Header carrying the access token on every page request
pub const TOKEN_HEADER: &str = "X-Yotpo-Token";

/// Query parameter carrying the continuation cursor
pub const CURSOR_PARAM: &str = "page_info";

/// JSON key holding the records array in a customers page
pub const CUSTOMERS_KEY: &str = "customers";

/// Customers listing endpoint for one store
#[derive(Debug, Clone)]
pub struct CustomersEndpoint {
    base: Url,
    page_size: u32,
}

impl CustomersEndpoint {
    pub fn new(base_url: &str, store_id: &str, page_size: u32) -> Result<Self, url::ParseError> {
        let base = store_url(base_url, store_id, "customers")?;
        Ok(Self { base, page_size })
    }

    /// First page carries `limit`; later pages carry only the cursor
    pub fn page_url(&self, cursor: Option<&str>) -> Url {
        let mut url = self.base.clone();
        {
            let mut query = url.query_pairs_mut();
            match cursor {
                Some(cursor) => {
                    query.append_pair(CURSOR_PARAM, cursor);
                },
                None => {
                    query.append_pair("limit", &self.page_size.to_string());
                },
            }
            query
                .append_pair("include_custom_properties", "true")
                .append_pair("expand", "loyalty");
        }
        url
    }
}

/// `POST {base}/stores/{id}/access_tokens`
pub fn access_token_url(base_url: &str, store_id: &str) -> Result<Url, url::ParseError> {
    store_url(base_url, store_id, "access_tokens")
}

fn store_url(base_url: &str, store_id: &str, resource: &str) -> Result<Url, url::ParseError> {
    let base = base_url.trim_end_matches('/');
    Url::parse(&format!("{}/stores/{}/{}", base, store_id, resource))
}
