use crate::{
    cloudflared::{
        restrict_permissions,
        TunnelIdentity,
    },
    error::Error,
    hosts::HostMap,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::path::{
    Path,
    PathBuf,
};

/// File name of the generated configuration inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.yml";

/// Service of the mandatory trailing catch-all rule.
pub const CATCH_ALL_SERVICE: &str = "http_status:404";

/// The configuration document the tunnel runtime reads.
#[derive(Debug, Serialize, Deserialize)]
pub struct IngressConfig {
    pub tunnel: String,
    /// Path as seen by the tunnel runtime: host path for the systemd runtime,
    /// container path for the Docker runtime.
    #[serde(rename = "credentials-file")]
    pub credentials_file: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loglevel: Option<String>,
    pub ingress: Vec<IngressRule>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IngressRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub service: String,
}

impl IngressConfig {
    /// Host rules in map order (ascending by hostname), terminated by the
    /// catch-all.
    pub fn build(
        identity: &TunnelIdentity,
        hosts: &HostMap,
        credentials_file: PathBuf,
        loglevel: Option<String>,
    ) -> Self {
        let mut ingress: Vec<IngressRule> = hosts
            .iter()
            .map(|(hostname, service)| IngressRule {
                hostname: Some(hostname.clone()),
                service: service.clone(),
            })
            .collect();
        ingress.push(IngressRule {
            hostname: None,
            service: CATCH_ALL_SERVICE.to_string(),
        });

        Self {
            tunnel: identity.id.to_string(),
            credentials_file,
            loglevel,
            ingress,
        }
    }

    pub fn to_yaml(&self) -> Result<String, Error> {
        serde_yaml::to_string(self)
            .map_err(|err| Error::Provision(format!("unable to render ingress configuration: {err}")))
    }

    /// Write the document with owner-only permissions, creating the config
    /// directory if needed.
    pub fn write(&self, path: &Path) -> Result<(), Error> {
        let yaml = self.to_yaml()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| Error::Provision(format!("unable to create {}: {err}", parent.display())))?;
        }
        std::fs::write(path, yaml)
            .map_err(|err| Error::Provision(format!("unable to write {}: {err}", path.display())))?;
        restrict_permissions(path);

        Ok(())
    }
}
