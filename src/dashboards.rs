//! Grafana dashboard provisioning content
//!
//! Dashboards are third-party content: fetched once at startup and stored
//! verbatim in the Grafana ConfigMap. Reconciliation never fetches anything.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Files fetched from the dashboard base URL
pub const DASHBOARD_FILES: [&str; 2] = ["dashboard.yml", "chubaofs.json"];

/// Provisioning file name -> verbatim content
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dashboards {
    files: BTreeMap<String, String>,
}

impl Dashboards {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, content: impl Into<String>) {
        self.files.insert(name.into(), content.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }
}

/// Fetch every dashboard file from `base_url`
pub async fn fetch(client: &reqwest::Client, base_url: &str) -> Result<Dashboards> {
    let mut dashboards = Dashboards::new();

    for file in DASHBOARD_FILES {
        let url = join_url(base_url, file);
        debug!(url = %url, "Fetching dashboard");

        let response = client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::DashboardStatus {
                url,
                status: status.as_u16(),
            });
        }

        dashboards.insert(file, response.text().await?);
    }

    info!(files = dashboards.len(), base_url = %base_url, "Fetched Grafana dashboards");
    Ok(dashboards)
}

fn join_url(base: &str, file: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), file)
}
