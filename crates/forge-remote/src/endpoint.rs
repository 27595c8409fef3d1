//! Endpoint selection: target overrides ▶ named endpoints ▶ workspace
//! defaults.

use std::collections::BTreeMap;
use std::time::Duration;

use forge_core::config::RemoteExecutionConfig;
use forge_core::project::TargetRemoteExecution;

/// The remote settings one task executes under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    pub uri: String,
    pub use_tls: bool,
    pub instance_name: String,
    pub timeout: Duration,
    pub platform: BTreeMap<String, String>,
    /// Cap on in-flight RPCs over the channel
    pub max_connections: usize,
}

impl ResolvedEndpoint {
    /// The URI handed to the transport, with a scheme matching the TLS
    /// setting when the configuration left it off.
    pub fn connect_uri(&self) -> String {
        if self.uri.contains("://") {
            self.uri.clone()
        } else if self.use_tls {
            format!("https://{}", self.uri)
        } else {
            format!("http://{}", self.uri)
        }
    }
}

/// Resolve the endpoint a target should use, or `None` when remote
/// execution is off for it.
///
/// Precedence: the target's own `remoteExecution` block wins, then a named
/// endpoint it references, then the workspace defaults. A target with
/// `enabled: false` stays local even when the workspace enables remote
/// execution; a target with `enabled: true` opts in even when the
/// workspace default is off, as long as an endpoint can be resolved.
pub fn resolve(
    workspace: &RemoteExecutionConfig,
    target: Option<&TargetRemoteExecution>,
) -> Option<ResolvedEndpoint> {
    let enabled = target
        .and_then(|t| t.enabled)
        .unwrap_or(workspace.enabled);
    if !enabled {
        return None;
    }

    let named = target
        .and_then(|t| t.endpoint.as_deref())
        .and_then(|name| workspace.named_endpoints.get(name));

    let uri = named
        .map(|n| n.endpoint.clone())
        .or_else(|| workspace.endpoint.clone())?;
    let use_tls = named.map(|n| n.use_tls).unwrap_or(workspace.use_tls);
    let instance_name = named
        .and_then(|n| n.instance_name.clone())
        .or_else(|| workspace.instance_name.clone())
        .unwrap_or_default();

    let timeout_seconds = target
        .and_then(|t| t.timeout_seconds)
        .unwrap_or(workspace.default_timeout_seconds);

    let platform = target
        .and_then(|t| t.platform.clone())
        .unwrap_or_else(|| workspace.default_platform.clone());

    Some(ResolvedEndpoint {
        uri,
        use_tls,
        instance_name,
        timeout: Duration::from_secs(timeout_seconds),
        platform,
        max_connections: workspace.max_connections.max(1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> RemoteExecutionConfig {
        serde_json::from_str(
            r#"{
                "enabled": true,
                "endpoint": "remote.example.com:8980",
                "useTls": false,
                "defaultTimeoutSeconds": 120,
                "defaultPlatform": {"os": "linux"},
                "namedEndpoints": {
                    "gpu": {"endpoint": "gpu.example.com:8980", "useTls": true, "instanceName": "gpu-pool"}
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn workspace_defaults_apply() {
        let resolved = resolve(&workspace(), None).unwrap();
        assert_eq!(resolved.uri, "remote.example.com:8980");
        assert_eq!(resolved.connect_uri(), "http://remote.example.com:8980");
        assert_eq!(resolved.timeout, Duration::from_secs(120));
        assert_eq!(resolved.platform["os"], "linux");
    }

    #[test]
    fn target_disable_wins_over_workspace_enable() {
        let target = TargetRemoteExecution {
            enabled: Some(false),
            ..Default::default()
        };
        assert!(resolve(&workspace(), Some(&target)).is_none());
    }

    #[test]
    fn named_endpoint_overrides_defaults() {
        let target = TargetRemoteExecution {
            endpoint: Some("gpu".into()),
            timeout_seconds: Some(30),
            ..Default::default()
        };
        let resolved = resolve(&workspace(), Some(&target)).unwrap();
        assert_eq!(resolved.connect_uri(), "https://gpu.example.com:8980");
        assert_eq!(resolved.instance_name, "gpu-pool");
        assert_eq!(resolved.timeout, Duration::from_secs(30));
    }

    #[test]
    fn disabled_workspace_without_target_opt_in_is_local() {
        let mut config = workspace();
        config.enabled = false;
        assert!(resolve(&config, None).is_none());

        let opt_in = TargetRemoteExecution {
            enabled: Some(true),
            ..Default::default()
        };
        assert!(resolve(&config, Some(&opt_in)).is_some());
    }
}
