//! The router (§4.E): matches `(remote, resolved addresses, ingress name,
//! ingress type)` against an ordered list of composite rules and selects
//! an egress name.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use ipnet::IpNet;
use regex::Regex;

use crate::error::{Error, Result};
use crate::geo::GeoDb;
use crate::model::{AdapterType, Endpoint};
use crate::vo::{RouteVo, RuleVo};

/// A rule compiled into predicate groups. A rule matches iff every
/// non-empty group matches at least one of its entries (§4.E).
struct CompiledRule {
    vo: RuleVo,
    ranges: Vec<IpNet>,
    ingress: HashSet<String>,
    types: HashSet<AdapterType>,
    patterns: Vec<Regex>,
    domains: Vec<String>,
    countries: HashSet<String>,
}

impl CompiledRule {
    fn compile(vo: RuleVo) -> Result<Self> {
        let ranges = vo
            .range
            .iter()
            .map(|s| {
                s.parse::<IpNet>()
                    .map_err(|e| Error::SemanticError(format!("bad CIDR {s}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let patterns = vo
            .pattern
            .iter()
            .map(|s| Regex::new(s).map_err(|e| Error::SemanticError(format!("bad pattern {s}: {e}"))))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            ingress: vo.ingress.iter().cloned().collect(),
            types: vo.r#type.iter().cloned().collect(),
            domains: vo.domain.clone(),
            countries: vo.country.iter().map(|c| c.to_ascii_uppercase()).collect(),
            ranges,
            patterns,
            vo,
        })
    }

    fn matches(&self, ctx: &MatchContext<'_>) -> bool {
        (self.ranges.is_empty() || self.ranges.iter().any(|n| ctx.resolved.iter().any(|ip| n.contains(ip))))
            && (self.ingress.is_empty() || self.ingress.contains(ctx.ingress_name))
            && (self.types.is_empty() || self.types.contains(&ctx.ingress_type))
            && (self.patterns.is_empty() || self.patterns.iter().any(|re| re.is_match(&ctx.remote.host)))
            && (self.domains.is_empty() || self.domains.iter().any(|suffix| domain_matches(&ctx.remote.host, suffix)))
            && (self.countries.is_empty()
                || ctx
                    .resolved
                    .iter()
                    .filter_map(|ip| ctx.geo.country_of(*ip))
                    .any(|c| self.countries.contains(&c)))
    }

    fn needs_resolving(&self) -> bool {
        self.vo.needs_resolving()
    }
}

/// Label-aligned suffix match: `a.example.com` matches suffix
/// `example.com`, `notexample.com` does not.
fn domain_matches(host: &str, suffix: &str) -> bool {
    if host == suffix {
        return true;
    }
    host.len() > suffix.len()
        && host.ends_with(suffix)
        && host.as_bytes()[host.len() - suffix.len() - 1] == b'.'
}

struct MatchContext<'a> {
    remote: &'a Endpoint,
    resolved: &'a [IpAddr],
    ingress_name: &'a str,
    ingress_type: AdapterType,
    geo: &'a dyn GeoDb,
}

pub struct Router {
    rules: HashMap<String, CompiledRule>,
    route: RouteVo,
}

impl Router {
    pub fn new() -> Self {
        Self {
            rules: HashMap::new(),
            route: RouteVo::default(),
        }
    }

    pub fn update_rule(&mut self, name: impl Into<String>, vo: RuleVo) -> Result<()> {
        let compiled = CompiledRule::compile(vo)?;
        self.rules.insert(name.into(), compiled);
        Ok(())
    }

    /// Fails with `ResInUse` if `name` is referenced by the current
    /// route; the registry is left unchanged.
    pub fn erase_rule(&mut self, name: &str) -> Result<()> {
        if self.route_uses_rule(name) {
            return Err(Error::ResInUse(format!("rule {name} is used by the route")));
        }
        self.rules.remove(name);
        Ok(())
    }

    pub fn find_rule(&self, name: &str) -> Option<&RuleVo> {
        self.rules.get(name).map(|r| &r.vo)
    }

    pub fn rule_names(&self) -> impl Iterator<Item = &String> {
        self.rules.keys()
    }

    fn route_uses_rule(&self, name: &str) -> bool {
        self.route
            .rules
            .iter()
            .any(|entry| entry.rule_names.iter().any(|n| n == name))
    }

    pub fn route_vo(&self) -> &RouteVo {
        &self.route
    }

    /// Validates that every referenced rule and egress name exists before
    /// replacing the route (§4.E `setRoute`).
    pub fn set_route(&mut self, route: RouteVo, egress_names: &HashSet<String>) -> Result<()> {
        if !egress_names.contains(&route.default) {
            return Err(Error::SemanticError(format!(
                "default egress {} does not exist",
                route.default
            )));
        }
        for entry in &route.rules {
            for rule_name in &entry.rule_names {
                if !self.rules.contains_key(rule_name) {
                    return Err(Error::SemanticError(format!("rule {rule_name} does not exist")));
                }
            }
            if !egress_names.contains(&entry.egress_name) {
                return Err(Error::SemanticError(format!(
                    "egress {} does not exist",
                    entry.egress_name
                )));
            }
        }
        self.route = route;
        Ok(())
    }

    /// True iff any rule referenced by the route needs address
    /// resolution (`range` or `country` predicates) — `route()` only
    /// resolves when this is set (§4.E).
    pub fn needs_resolving(&self) -> bool {
        self.route.rules.iter().any(|entry| {
            entry
                .rule_names
                .iter()
                .filter_map(|n| self.rules.get(n))
                .any(|r| r.needs_resolving())
        })
    }

    pub fn route(
        &self,
        remote: &Endpoint,
        ingress_name: &str,
        ingress_type: AdapterType,
        resolved: &[IpAddr],
        geo: &dyn GeoDb,
    ) -> String {
        let ctx = MatchContext {
            remote,
            resolved,
            ingress_name,
            ingress_type,
            geo,
        };

        for entry in &self.route.rules {
            let all_match = entry.rule_names.iter().all(|name| {
                self.rules
                    .get(name)
                    .map(|r| r.matches(&ctx))
                    .unwrap_or(false)
            });
            if all_match {
                return entry.egress_name.clone();
            }
        }

        self.route.default.clone()
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::FakeGeoDb;
    use crate::vo::RouteEntry;
    use std::collections::HashMap as Map;

    fn egresses(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn domain_suffix_is_label_aligned() {
        assert!(domain_matches("a.example.com", "example.com"));
        assert!(domain_matches("example.com", "example.com"));
        assert!(!domain_matches("notexample.com", "example.com"));
    }

    #[test]
    fn erase_fails_when_rule_is_referenced() {
        let mut router = Router::new();
        router.update_rule("r1", RuleVo::default()).unwrap();
        router
            .set_route(
                RouteVo {
                    default: "direct".into(),
                    rules: vec![RouteEntry {
                        rule_names: vec!["r1".into()],
                        egress_name: "proxy".into(),
                    }],
                },
                &egresses(&["direct", "proxy"]),
            )
            .unwrap();

        let before: Vec<_> = router.rule_names().cloned().collect();
        assert!(router.erase_rule("r1").is_err());
        let after: Vec<_> = router.rule_names().cloned().collect();
        assert_eq!(before, after);
    }

    #[test]
    fn s6_country_routing() {
        let mut router = Router::new();
        router
            .update_rule(
                "r1",
                RuleVo {
                    country: vec!["CN".into()],
                    ..Default::default()
                },
            )
            .unwrap();
        router
            .set_route(
                RouteVo {
                    default: "direct".into(),
                    rules: vec![RouteEntry {
                        rule_names: vec!["r1".into()],
                        egress_name: "proxy".into(),
                    }],
                },
                &egresses(&["direct", "proxy"]),
            )
            .unwrap();

        assert!(router.needs_resolving());

        let remote = Endpoint::new("example.com", "443").unwrap();
        let cn_ip: IpAddr = "1.2.3.4".parse().unwrap();
        let us_ip: IpAddr = "5.6.7.8".parse().unwrap();

        let mut geo_map = Map::new();
        geo_map.insert(cn_ip, "CN".to_string());
        geo_map.insert(us_ip, "US".to_string());
        let geo = FakeGeoDb(geo_map);

        let egress = router.route(&remote, "in", AdapterType::Socks5, &[cn_ip], &geo);
        assert_eq!(egress, "proxy");

        let egress = router.route(&remote, "in", AdapterType::Socks5, &[us_ip], &geo);
        assert_eq!(egress, "direct");
    }
}
