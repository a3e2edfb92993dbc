//! Proxy configuration rendering.
//!
//! The control plane treats the rendered proxy configuration as an opaque
//! string: it hashes it, stores it content-addressed, and mounts it into the
//! proxy workload. [`NginxRenderer`] produces a workable nginx configuration;
//! deployments with their own templates plug in another [`ConfigRenderer`].

use crate::config::ConfigRoot;
use crate::error::{IngressError, Result};
use crate::service::ServiceSnapshot;
use sha1::{Digest, Sha1};
use std::fmt::Write;

/// Renders the reverse-proxy configuration from the current service set.
/// Must be deterministic: identical inputs yield identical bytes.
pub trait ConfigRenderer: Send + Sync {
    fn render(
        &self,
        services: &[ServiceSnapshot],
        proxy_protocol: bool,
        config: &ConfigRoot,
    ) -> Result<String>;
}

/// A rendered configuration, addressed by the hash of its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedConfig {
    text: String,
}

impl RenderedConfig {
    pub fn new(text: String) -> Self {
        Self { text }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.text.as_bytes()
    }

    /// sha1 of the rendered bytes, lowercase hex.
    pub fn hash(&self) -> String {
        hex::encode(Sha1::digest(self.text.as_bytes()))
    }
}

impl std::fmt::Display for RenderedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

/// Built-in nginx configuration builder.
#[derive(Debug, Clone, Default)]
pub struct NginxRenderer;

impl NginxRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl ConfigRenderer for NginxRenderer {
    fn render(
        &self,
        services: &[ServiceSnapshot],
        proxy_protocol: bool,
        _config: &ConfigRoot,
    ) -> Result<String> {
        let mut out = String::new();
        write_nginx_config(&mut out, services, proxy_protocol)
            .map_err(|_| IngressError::validation("failed to render nginx config"))?;
        Ok(out)
    }
}

fn write_nginx_config(
    out: &mut String,
    services: &[ServiceSnapshot],
    proxy_protocol: bool,
) -> std::fmt::Result {
    let listen_extra = if proxy_protocol { " proxy_protocol" } else { "" };

    writeln!(out, "user nginx;")?;
    writeln!(out, "worker_processes auto;")?;
    writeln!(out)?;
    writeln!(out, "events {{")?;
    writeln!(out, "    worker_connections 1024;")?;
    writeln!(out, "}}")?;
    writeln!(out)?;
    writeln!(out, "http {{")?;
    writeln!(out, "    sendfile on;")?;
    writeln!(out, "    server_tokens off;")?;
    if proxy_protocol {
        writeln!(out, "    real_ip_header proxy_protocol;")?;
    }

    for service in services {
        if service.hosts.is_empty() {
            continue;
        }

        let upstream = format!("svc_{}", service.id);
        let server_names = service.hosts.join(" ");

        writeln!(out)?;
        writeln!(out, "    upstream {} {{", upstream)?;
        writeln!(out, "        server {}:{};", service.name, service.port)?;
        writeln!(out, "    }}")?;

        writeln!(out)?;
        writeln!(out, "    server {{")?;
        writeln!(out, "        listen 80{};", listen_extra)?;
        writeln!(out, "        server_name {};", server_names)?;
        if service.ssl_redirect && service.cert_pair.is_some() {
            writeln!(out, "        return 301 https://$host$request_uri;")?;
        } else {
            writeln!(out, "        location {} {{", service.path)?;
            writeln!(out, "            proxy_pass http://{};", upstream)?;
            writeln!(out, "            proxy_set_header Host $host;")?;
            writeln!(out, "        }}")?;
        }
        writeln!(out, "    }}")?;

        if let Some(pair) = &service.cert_pair {
            writeln!(out)?;
            writeln!(out, "    server {{")?;
            writeln!(out, "        listen 443 ssl{};", listen_extra)?;
            writeln!(out, "        server_name {};", server_names)?;
            writeln!(out, "        ssl_certificate /run/secrets/{};", pair.cert.name)?;
            writeln!(out, "        ssl_certificate_key /run/secrets/{};", pair.key.name)?;
            writeln!(out, "        ssl_dhparam /etc/nginx/ssl-dhparams.pem;")?;
            writeln!(out, "        location {} {{", service.path)?;
            writeln!(out, "            proxy_pass http://{};", upstream)?;
            writeln!(out, "            proxy_set_header Host $host;")?;
            writeln!(out, "        }}")?;
            writeln!(out, "    }}")?;
        }
    }

    writeln!(out, "}}")?;
    Ok(())
}
