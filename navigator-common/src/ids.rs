//! Each identifier is a thin newtype over `String` so the compiler
//! catches a `ServiceId` passed where an `InstanceId` is expected,
//! while parsing/formatting stays centralized here instead of scattered
//! across call sites.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::NavigatorError;

/// Opaque, globally unique across all connected Edges. Chosen by the Edge
/// from its discovered mesh identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterId(pub String);

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ClusterId {
    fn from(value: String) -> Self {
        ClusterId(value)
    }
}

impl From<&str> for ClusterId {
    fn from(value: &str) -> Self {
        ClusterId(value.to_string())
    }
}

/// `"<namespace>:<name>"`, unique within a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceId {
    pub namespace: String,
    pub name: String,
}

impl ServiceId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)
    }
}

impl std::str::FromStr for ServiceId {
    type Err = NavigatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, name) = s
            .split_once(':')
            .ok_or_else(|| NavigatorError::invalid_request(format!("malformed ServiceID: {s}")))?;
        if namespace.is_empty() || name.is_empty() {
            return Err(NavigatorError::invalid_request(format!(
                "malformed ServiceID: {s}"
            )));
        }
        Ok(ServiceId::new(namespace, name))
    }
}

/// `"<ClusterID>:<namespace>:<podName>"`, the externally visible handle for
/// a proxy instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId {
    pub cluster_id: ClusterId,
    pub namespace: String,
    pub pod_name: String,
}

impl InstanceId {
    pub fn new(
        cluster_id: impl Into<ClusterId>,
        namespace: impl Into<String>,
        pod_name: impl Into<String>,
    ) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            namespace: namespace.into(),
            pod_name: pod_name.into(),
        }
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.cluster_id, self.namespace, self.pod_name)
    }
}

impl std::str::FromStr for InstanceId {
    type Err = NavigatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (Some(cluster_id), Some(namespace), Some(pod_name)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(NavigatorError::invalid_request(format!(
                "malformed InstanceID: {s}"
            )));
        };
        if cluster_id.is_empty() || namespace.is_empty() || pod_name.is_empty() {
            return Err(NavigatorError::invalid_request(format!(
                "malformed InstanceID: {s}"
            )));
        }
        Ok(InstanceId::new(cluster_id, namespace, pod_name))
    }
}

/// Per-session unique correlation token, chosen by the Manager when issuing
/// a correlated request. At least 16 random hex chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let bytes: [u8; 10] = rng.random();
        RequestId(hex_encode(&bytes))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        RequestId(value)
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_generates_at_least_16_hex_chars() {
        let id = RequestId::generate();
        assert!(id.0.len() >= 16);
        assert!(id.0.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn service_id_round_trips_through_display_and_parse() {
        let id: ServiceId = "default:web".parse().unwrap();
        assert_eq!(id.namespace, "default");
        assert_eq!(id.name, "web");
        assert_eq!(id.to_string(), "default:web");
    }

    #[test]
    fn service_id_rejects_missing_colon() {
        assert!("default-web".parse::<ServiceId>().is_err());
    }

    #[test]
    fn instance_id_round_trips() {
        let id: InstanceId = "prod-eu:default:web-0".parse().unwrap();
        assert_eq!(id.cluster_id, ClusterId::from("prod-eu"));
        assert_eq!(id.namespace, "default");
        assert_eq!(id.pod_name, "web-0");
        assert_eq!(id.to_string(), "prod-eu:default:web-0");
    }

    #[test]
    fn instance_id_pod_name_may_contain_colons() {
        // podName is the last ':'-delimited segment by convention, but the
        // splitn(3) approach means a pod name with colons must never occur
        // in k8s (it can't: pod names are DNS-1123). Guard the assumption.
        let id: InstanceId = "c:ns:pod-0".parse().unwrap();
        assert_eq!(id.pod_name, "pod-0");
    }
}
