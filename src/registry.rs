//! `IngressManager` / `EgressManager` (§4.F): insertion-order-agnostic
//! `name -> item` registries with the seed/erase guards spec'd for each.

use std::collections::HashMap;
use std::sync::Arc;

use crate::adapter::{EgressAdapter, IngressAdapter};
use crate::error::{Error, Result};
use crate::model::AdapterType;
use crate::vo::{EgressVo, IngressVo};

struct IngressEntry {
    vo: IngressVo,
    adapter: Arc<IngressAdapter>,
}

pub struct IngressManager {
    entries: HashMap<String, IngressEntry>,
}

impl IngressManager {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Builds a fresh adapter and swaps it in. In-flight sessions hold
    /// their own accepted sockets and adapter `Arc` clone, so a
    /// replacement here never disturbs them (§4.F).
    pub fn update(&mut self, name: impl Into<String>, vo: IngressVo) -> Result<()> {
        if matches!(vo.r#type, AdapterType::Direct | AdapterType::Reject) {
            return Err(Error::SemanticError(format!("{} is not a valid ingress type", vo.r#type)));
        }
        let adapter = Arc::new(IngressAdapter::new(&vo)?);
        self.entries.insert(name.into(), IngressEntry { vo, adapter });
        Ok(())
    }

    pub fn erase(&mut self, name: &str) -> Result<()> {
        self.entries.remove(name);
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<&IngressVo> {
        self.entries.get(name).map(|e| &e.vo)
    }

    pub fn adapter(&self, name: &str) -> Option<Arc<IngressAdapter>> {
        self.entries.get(name).map(|e| Arc::clone(&e.adapter))
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &IngressVo)> {
        self.entries.iter().map(|(k, v)| (k, &v.vo))
    }
}

impl Default for IngressManager {
    fn default() -> Self {
        Self::new()
    }
}

struct EgressEntry {
    vo: EgressVo,
    adapter: Arc<EgressAdapter>,
}

pub struct EgressManager {
    entries: HashMap<String, EgressEntry>,
}

impl EgressManager {
    /// Seeded with `direct -> {type: direct}` (§4.F); `direct` can be
    /// replaced but never erased.
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        let direct_vo = EgressVo::direct();
        entries.insert(
            "direct".to_string(),
            EgressEntry {
                adapter: Arc::new(
                    EgressAdapter::new(&direct_vo).expect("direct egress always constructs"),
                ),
                vo: direct_vo,
            },
        );
        Self { entries }
    }

    pub fn update(&mut self, name: impl Into<String>, vo: EgressVo) -> Result<()> {
        let adapter = Arc::new(EgressAdapter::new(&vo)?);
        self.entries.insert(name.into(), EgressEntry { vo, adapter });
        Ok(())
    }

    /// Rejects erasing `direct`; callers are expected to additionally
    /// check the egress isn't referenced by the current route before
    /// calling this (the router enforces that when asked to update the
    /// route, but a dangling route is also possible if an egress is torn
    /// down first — so erase also takes the route's used-egress set).
    pub fn erase(&mut self, name: &str, used_by_route: bool) -> Result<()> {
        if name == "direct" {
            return Err(Error::ResInUse("the direct egress cannot be removed".into()));
        }
        if used_by_route {
            return Err(Error::ResInUse(format!("egress {name} is used by the route")));
        }
        self.entries.remove(name);
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<&EgressVo> {
        self.entries.get(name).map(|e| &e.vo)
    }

    pub fn adapter(&self, name: &str) -> Option<Arc<EgressAdapter>> {
        self.entries.get(name).map(|e| Arc::clone(&e.adapter))
    }

    pub fn names(&self) -> std::collections::HashSet<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &EgressVo)> {
        self.entries.iter().map(|(k, v)| (k, &v.vo))
    }
}

impl Default for EgressManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn egress_manager_seeds_and_protects_direct() {
        let mut egresses = EgressManager::new();
        assert!(egresses.find("direct").is_some());
        assert!(egresses.erase("direct", false).is_err());
    }

    #[test]
    fn ingress_manager_refuses_direct_and_reject_types() {
        let mut ingresses = IngressManager::new();
        let vo = IngressVo {
            r#type: AdapterType::Direct,
            binds: vec![],
            credentials: Default::default(),
            tls: None,
            ss_option: None,
            tunnel_option: None,
            trojan_option: None,
            websocket_option: None,
        };
        assert!(ingresses.update("bad", vo).is_err());
    }
}
