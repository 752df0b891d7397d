//! Control-plane value objects (§3, §6): the JSON-shaped structs the REST
//! façade accepts and returns, and the `--json` initial [`Config`].
//!
//! Endpoints are rendered as a single-key `{"host": port}` object
//! everywhere they appear (binds, tunnel destinations, trojan remote) —
//! spec.md calls this shape out explicitly for `destinations`; this
//! implementation applies it uniformly rather than inventing a second,
//! undocumented shape for `binds`/`remote` (see DESIGN.md).

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::model::{AdapterType, BalanceType, CryptoMethod, DelayMode, Endpoint};

impl Serialize for Endpoint {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let mut map = s.serialize_map(Some(1))?;
        map.serialize_entry(&self.host, &self.port_u16())?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for Endpoint {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        struct EndpointVisitor;
        impl<'de> Visitor<'de> for EndpointVisitor {
            type Value = Endpoint;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a single-entry object mapping host to port")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Endpoint, A::Error> {
                let (host, port): (String, u16) = map
                    .next_entry()?
                    .ok_or_else(|| de::Error::custom("expected one host:port entry"))?;
                Endpoint::new(host, port.to_string()).map_err(de::Error::custom)
            }
        }
        d.deserialize_map(EndpointVisitor)
    }
}

/// SOCKS5/Trojan credential set: either username→password pairs (SOCKS5
/// user/pass auth) or a bare set of accepted tokens (Trojan passwords).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Credentials {
    UserPass(HashMap<String, String>),
    Passwords(HashSet<String>),
}

impl Default for Credentials {
    fn default() -> Self {
        Self::UserPass(HashMap::new())
    }
}

impl Credentials {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::UserPass(m) => m.is_empty(),
            Self::Passwords(s) => s.is_empty(),
        }
    }

    pub fn check(&self, user: &str, pass: &str) -> bool {
        matches!(self, Self::UserPass(m) if m.get(user).map(String::as_str) == Some(pass))
    }

    pub fn passwords(&self) -> Vec<&str> {
        match self {
            Self::Passwords(s) => s.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TlsIngressOption {
    #[serde(rename = "certFile")]
    pub cert_file: String,
    #[serde(rename = "keyFile")]
    pub key_file: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TlsEgressOption {
    pub insecure: bool,
    #[serde(rename = "caFile", skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<String>,
    #[serde(rename = "serverName", skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sni: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShadowsocksOption {
    pub method: CryptoMethod,
    pub password: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TunnelOption {
    pub destinations: Vec<Endpoint>,
    pub balance: BalanceType,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrojanOption {
    pub remote: Endpoint,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebsocketOption {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngressVo {
    pub r#type: AdapterType,
    #[serde(default)]
    pub binds: Vec<Endpoint>,
    #[serde(default)]
    pub credentials: Credentials,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsIngressOption>,
    #[serde(rename = "ssOption", skip_serializing_if = "Option::is_none")]
    pub ss_option: Option<ShadowsocksOption>,
    #[serde(rename = "tunnelOption", skip_serializing_if = "Option::is_none")]
    pub tunnel_option: Option<TunnelOption>,
    #[serde(rename = "trojanOption", skip_serializing_if = "Option::is_none")]
    pub trojan_option: Option<TrojanOption>,
    #[serde(rename = "websocketOption", skip_serializing_if = "Option::is_none")]
    pub websocket_option: Option<WebsocketOption>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EgressVo {
    pub r#type: AdapterType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<CryptoMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<DelayMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<(String, String)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsEgressOption>,
    #[serde(rename = "websocketOption", skip_serializing_if = "Option::is_none")]
    pub websocket_option: Option<WebsocketOption>,
}

impl EgressVo {
    pub fn direct() -> Self {
        Self {
            r#type: AdapterType::Direct,
            host: None,
            port: None,
            method: None,
            password: None,
            mode: None,
            delay: None,
            credential: None,
            tls: None,
            websocket_option: None,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RuleVo {
    #[serde(default)]
    pub range: Vec<String>,
    #[serde(default)]
    pub ingress: Vec<String>,
    #[serde(default)]
    pub r#type: Vec<AdapterType>,
    #[serde(default)]
    pub pattern: Vec<String>,
    #[serde(default)]
    pub domain: Vec<String>,
    #[serde(default)]
    pub country: Vec<String>,
}

impl RuleVo {
    pub fn needs_resolving(&self) -> bool {
        !self.range.is_empty() || !self.country.is_empty()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RouteEntry {
    pub rule_names: Vec<String>,
    pub egress_name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RouteVo {
    pub default: String,
    #[serde(default)]
    pub rules: Vec<RouteEntry>,
}

impl Default for RouteVo {
    fn default() -> Self {
        Self {
            default: "direct".to_string(),
            rules: Vec::new(),
        }
    }
}

/// Top-level `--json` document: the initial registries, loaded once at
/// startup.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ingresses: HashMap<String, IngressVo>,
    #[serde(default)]
    pub egresses: HashMap<String, EgressVo>,
    #[serde(default)]
    pub rules: HashMap<String, RuleVo>,
    #[serde(default)]
    pub route: RouteVo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_round_trips_through_json() {
        let ep = Endpoint::new("127.0.0.1", "1080").unwrap();
        let json = serde_json::to_value(&ep).unwrap();
        assert_eq!(json, serde_json::json!({"127.0.0.1": 1080}));

        let back: Endpoint = serde_json::from_value(json).unwrap();
        assert_eq!(back, ep);
    }

    #[test]
    fn adapter_type_is_lowercase_snake_case() {
        assert_eq!(
            serde_json::to_value(AdapterType::Socks5).unwrap(),
            serde_json::json!("socks5")
        );
        assert_eq!(
            serde_json::to_value(AdapterType::Tunnel).unwrap(),
            serde_json::json!("tunnel")
        );
    }
}
