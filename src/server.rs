//! The accept loop (§4.F, §5): owns the registries and spawns/restarts a
//! listener task per ingress bind whenever the control plane changes that
//! ingress. Grounded on the teacher's `http_server`/`https_server` pair —
//! one `TcpListener::accept` loop per bind, each accepted socket handed
//! off to its own task so one slow/malicious client can't stall others.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use log::{debug, error, info, warn};
use openssl::ssl::SslContext;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::adapter::{BoxedStream, IngressAdapter};
use crate::error::Result;
use crate::geo::GeoDb;
use crate::model::AdapterType;
use crate::registry::{EgressManager, IngressManager};
use crate::router::Router;
use crate::session::Session;
use crate::vo::IngressVo;

/// Everything the REST façade and the accept loop share. Every field is
/// behind its own lock so a read for routing a single connection never
/// blocks a concurrent control-plane write to an unrelated registry.
pub struct SharedState {
    pub ingresses: Mutex<IngressManager>,
    pub egresses: Mutex<EgressManager>,
    pub router: Mutex<Router>,
    pub geo: Box<dyn GeoDb>,
    listeners: Mutex<HashMap<String, Vec<JoinHandle<()>>>>,
}

impl SharedState {
    pub fn new(geo: Box<dyn GeoDb>) -> Arc<Self> {
        Arc::new(Self {
            ingresses: Mutex::new(IngressManager::new()),
            egresses: Mutex::new(EgressManager::new()),
            router: Mutex::new(Router::new()),
            geo,
            listeners: Mutex::new(HashMap::new()),
        })
    }

    /// Validates and installs `vo` under `name`, then tears down that
    /// ingress's previous listeners (if any) and starts fresh ones bound
    /// to the new VO's `binds`.
    pub fn apply_ingress(self: &Arc<Self>, name: String, vo: IngressVo) -> Result<()> {
        self.ingresses.lock().expect("ingress mutex poisoned").update(name.clone(), vo)?;
        self.restart_listeners(name);
        Ok(())
    }

    pub fn remove_ingress(self: &Arc<Self>, name: &str) -> Result<()> {
        self.ingresses.lock().expect("ingress mutex poisoned").erase(name)?;
        self.stop_listeners(name);
        Ok(())
    }

    fn stop_listeners(&self, name: &str) {
        if let Some(handles) = self.listeners.lock().expect("listener mutex poisoned").remove(name) {
            for handle in handles {
                handle.abort();
            }
        }
    }

    fn restart_listeners(self: &Arc<Self>, name: String) {
        self.stop_listeners(&name);

        let (vo, adapter) = {
            let ingresses = self.ingresses.lock().expect("ingress mutex poisoned");
            (ingresses.find(&name).cloned(), ingresses.adapter(&name))
        };
        let (Some(vo), Some(adapter)) = (vo, adapter) else {
            return;
        };

        let tls_ctx = match vo.tls.as_ref().map(crate::tls::build_server_context) {
            Some(Ok(ctx)) => Some(ctx),
            Some(Err(e)) => {
                error!("ingress {name}: failed to build TLS context: {e}");
                return;
            }
            None => None,
        };

        let mut handles = Vec::new();
        for bind in &vo.binds {
            if !bind.is_numeric() {
                error!("ingress {name}: bind {bind} is not an IP literal, skipping");
                continue;
            }
            let addr: SocketAddr = match format!("{bind}").parse() {
                Ok(a) => a,
                Err(e) => {
                    error!("ingress {name}: bad bind address {bind}: {e}");
                    continue;
                }
            };
            let state = Arc::clone(self);
            let name = name.clone();
            let adapter = Arc::clone(&adapter);
            let tls_ctx = tls_ctx.clone();
            handles.push(tokio::spawn(listen(state, name, vo.r#type, adapter, addr, tls_ctx)));
        }
        self.listeners.lock().expect("listener mutex poisoned").insert(name, handles);
    }
}

async fn listen(
    state: Arc<SharedState>,
    name: String,
    ingress_type: AdapterType,
    adapter: Arc<IngressAdapter>,
    bind: SocketAddr,
    tls_ctx: Option<SslContext>,
) {
    let listener = match TcpListener::bind(bind).await {
        Ok(l) => l,
        Err(e) => {
            error!("ingress {name}: failed to bind {bind}: {e}");
            return;
        }
    };
    info!("ingress {name}: listening on {bind}");

    loop {
        let (sock, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("ingress {name}: accept error on {bind}: {e}");
                continue;
            }
        };

        let state = Arc::clone(&state);
        let name = name.clone();
        let adapter = Arc::clone(&adapter);
        let tls_ctx = tls_ctx.clone();

        tokio::spawn(async move {
            let stream: BoxedStream = match tls_ctx {
                Some(ctx) => match crate::tls::accept(&ctx, sock).await {
                    Ok(s) => Box::pin(s),
                    Err(e) => {
                        debug!("{peer}: TLS handshake failed: {e}");
                        return;
                    }
                },
                None => Box::pin(sock),
            };

            let session = Session {
                ingress_name: name,
                ingress_type,
                ingress_adapter: adapter,
                state,
            };
            session.run(stream).await;
        });
    }
}

pub fn egress_names(state: &SharedState) -> std::collections::HashSet<String> {
    state.egresses.lock().expect("egress mutex poisoned").names()
}

pub fn check_egress_in_use(state: &SharedState, name: &str) -> bool {
    let router = state.router.lock().expect("router mutex poisoned");
    let route = router.route_vo();
    route.default == name || route.rules.iter().any(|entry| entry.egress_name == name)
}
