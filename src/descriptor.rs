//! Volume descriptor adapter.
//!
//! Backends describe a volume in one of two shapes, optionally wrapped one
//! level under a response envelope:
//!
//! ```text
//! { properties: { mountTargets: [{ ipAddress }], creationToken } }   // cloud-native
//! { mountPoints: [{ server }], creationToken }                        // on-prem
//! ```
//!
//! [`resolve_endpoint`] normalizes either into an [`Endpoint`] once, at the
//! boundary, so nothing downstream branches on shape.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// Normalized network identity of a volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Creation token; the export name on the server.
    pub volume: String,
    pub server: String,
}

#[derive(Debug, Deserialize)]
struct MountTargetEntry {
    #[serde(rename = "ipAddress")]
    ip_address: String,
}

#[derive(Debug, Deserialize)]
struct CloudProperties {
    #[serde(rename = "mountTargets", default)]
    mount_targets: Vec<MountTargetEntry>,
    #[serde(rename = "creationToken")]
    creation_token: String,
}

#[derive(Debug, Deserialize)]
struct MountPointEntry {
    server: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Shape {
    Cloud {
        properties: CloudProperties,
    },
    OnPrem {
        #[serde(rename = "mountPoints", default)]
        mount_points: Vec<MountPointEntry>,
        #[serde(rename = "creationToken")]
        creation_token: String,
    },
}

impl Shape {
    fn from_value(value: &Value) -> Option<Shape> {
        if let Ok(shape) = Shape::deserialize(value) {
            return Some(shape);
        }
        // One level of response envelope, e.g. {"response": {...}}.
        let object = value.as_object()?;
        let mut nested = object.values().filter(|v| v.is_object());
        let inner = nested.next()?;
        if nested.next().is_some() {
            return None;
        }
        Shape::deserialize(inner).ok()
    }

    fn into_parts(self) -> (String, Option<String>) {
        match self {
            Shape::Cloud { properties } => (
                properties.creation_token,
                properties.mount_targets.into_iter().next().map(|t| t.ip_address),
            ),
            Shape::OnPrem {
                mount_points,
                creation_token,
            } => (
                creation_token,
                mount_points.into_iter().next().map(|p| p.server),
            ),
        }
    }
}

/// Normalize a descriptor into `(volume, server)`. `server_override`
/// replaces whatever address the descriptor carries.
pub fn resolve_endpoint(descriptor: &Value, server_override: Option<&str>) -> Result<Endpoint> {
    let shape = Shape::from_value(descriptor).ok_or_else(|| {
        Error::InvalidDescriptor(
            "expected properties.creationToken or mountPoints/creationToken".to_string(),
        )
    })?;
    let (volume, server) = shape.into_parts();
    if volume.trim().is_empty() {
        return Err(Error::InvalidDescriptor("empty creationToken".to_string()));
    }
    let server = match server_override {
        Some(address) => address.to_string(),
        None => server.ok_or_else(|| {
            Error::InvalidDescriptor(format!("volume {} has no mount endpoint", volume))
        })?,
    };
    Ok(Endpoint { volume, server })
}

/// Parse and normalize a JSON descriptor document.
pub fn resolve_endpoint_str(json: &str, server_override: Option<&str>) -> Result<Endpoint> {
    let value: Value = serde_json::from_str(json)?;
    resolve_endpoint(&value, server_override)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_onprem_shape() {
        let endpoint = resolve_endpoint(
            &json!({"mountPoints": [{"server": "10.0.0.5"}], "creationToken": "vol1"}),
            None,
        )
        .unwrap();
        assert_eq!(endpoint.volume, "vol1");
        assert_eq!(endpoint.server, "10.0.0.5");
    }

    #[test]
    fn test_cloud_shape() {
        let endpoint = resolve_endpoint(
            &json!({
                "name": "acct/pool/vol2",
                "properties": {
                    "mountTargets": [{"ipAddress": "172.16.0.4", "smbServerFqdn": "x"}],
                    "creationToken": "vol2"
                }
            }),
            None,
        )
        .unwrap();
        assert_eq!(endpoint, Endpoint { volume: "vol2".into(), server: "172.16.0.4".into() });
    }

    #[test]
    fn test_envelope_is_unwrapped() {
        let endpoint = resolve_endpoint(
            &json!({"response": {"mountPoints": [{"server": "10.9.9.9"}], "creationToken": "wrapped"}}),
            None,
        )
        .unwrap();
        assert_eq!(endpoint.volume, "wrapped");
    }

    #[test]
    fn test_server_override() {
        let endpoint = resolve_endpoint(
            &json!({"mountPoints": [], "creationToken": "vol1"}),
            Some("192.168.1.1"),
        )
        .unwrap();
        assert_eq!(endpoint.server, "192.168.1.1");
    }

    #[test]
    fn test_missing_endpoint_is_rejected() {
        let err = resolve_endpoint(&json!({"mountPoints": [], "creationToken": "vol1"}), None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDescriptor(_)));
    }

    #[test]
    fn test_unknown_shape_is_rejected() {
        assert!(resolve_endpoint(&json!({"id": 7}), None).is_err());
        assert!(resolve_endpoint(&json!({"a": {"x": 1}, "b": {"y": 2}}), None).is_err());
        assert!(resolve_endpoint_str("not json", None).is_err());
    }
}
