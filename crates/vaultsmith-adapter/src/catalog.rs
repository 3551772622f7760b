//! The declared service catalog

use serde::{Deserialize, Serialize};

use crate::family::ServiceFamily;

/// One row of the service table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub family: ServiceFamily,
    /// Members of the same group share one password, copied from the
    /// group's first member at bootstrap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_credential_group: Option<String>,
    /// Service whose credential record this one is derived from (the git
    /// host reuses the relational DB's record).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived_from: Option<String>,
    /// Whether bootstrap seeds `tls_enabled=true` for this service
    pub tls_enabled: bool,
}

impl ServiceSpec {
    pub fn new(name: &str, family: ServiceFamily) -> Self {
        Self {
            name: name.to_string(),
            family,
            shared_credential_group: None,
            derived_from: None,
            tls_enabled: true,
        }
    }

    pub fn in_group(mut self, group: &str) -> Self {
        self.shared_credential_group = Some(group.to_string());
        self
    }

    pub fn derived_from(mut self, source: &str) -> Self {
        self.derived_from = Some(source.to_string());
        self
    }

    pub fn without_tls(mut self) -> Self {
        self.tls_enabled = false;
        self
    }
}

/// The development stack's default catalog.
///
/// The three cache nodes form one credential group; the git host derives
/// its database credential from the relational DB record and terminates
/// TLS at a proxy, so it gets no certificate of its own.
pub fn default_catalog() -> Vec<ServiceSpec> {
    vec![
        ServiceSpec::new("postgres", ServiceFamily::RelationalA),
        ServiceSpec::new("mysql", ServiceFamily::RelationalB),
        ServiceSpec::new("mongodb", ServiceFamily::Document),
        ServiceSpec::new("redis-1", ServiceFamily::CacheCluster).in_group("redis"),
        ServiceSpec::new("redis-2", ServiceFamily::CacheCluster).in_group("redis"),
        ServiceSpec::new("redis-3", ServiceFamily::CacheCluster).in_group("redis"),
        ServiceSpec::new("rabbitmq", ServiceFamily::Broker),
        ServiceSpec::new("forgejo", ServiceFamily::GitHost)
            .derived_from("postgres")
            .without_tls(),
    ]
}

/// Group members in catalog order; the first member is the credential
/// source for the rest.
pub fn group_members<'a>(catalog: &'a [ServiceSpec], group: &str) -> Vec<&'a ServiceSpec> {
    catalog
        .iter()
        .filter(|s| s.shared_credential_group.as_deref() == Some(group))
        .collect()
}
