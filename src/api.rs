//! The REST control plane (§6): CRUD over ingresses, egresses, rules, and
//! the single active route, all mutating [`crate::server::SharedState`]
//! directly so a change takes effect on the very next accepted
//! connection. Grounded on the teacher's lone `warp::serve` call in
//! `api_server` — this gives it the full method/path table instead of a
//! single read-only dump.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::error::Error;
use crate::server::{self, SharedState};
use crate::vo::{EgressVo, IngressVo, RouteVo, RuleVo};

#[derive(Debug)]
struct ApiError(Error);
impl warp::reject::Reject for ApiError {}

fn reject(e: Error) -> Rejection {
    warp::reject::custom(ApiError(e))
}

fn ok_empty() -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(warp::reply::json(&serde_json::json!({})), StatusCode::OK)
}

pub fn routes(state: Arc<SharedState>) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let with_state = warp::any().map(move || Arc::clone(&state));

    let ingresses_list = warp::path("ingresses")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state.clone())
        .and_then(list_ingresses);
    let ingresses_put = warp::path!("ingresses" / String)
        .and(warp::put())
        .and(warp::body::json())
        .and(with_state.clone())
        .and_then(put_ingress);
    let ingresses_delete = warp::path!("ingresses" / String)
        .and(warp::delete())
        .and(with_state.clone())
        .and_then(delete_ingress);

    let egresses_list = warp::path("egresses")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state.clone())
        .and_then(list_egresses);
    let egresses_put = warp::path!("egresses" / String)
        .and(warp::put())
        .and(warp::body::json())
        .and(with_state.clone())
        .and_then(put_egress);
    let egresses_delete = warp::path!("egresses" / String)
        .and(warp::delete())
        .and(with_state.clone())
        .and_then(delete_egress);

    let rules_list = warp::path("rules")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state.clone())
        .and_then(list_rules);
    let rules_put = warp::path!("rules" / String)
        .and(warp::put())
        .and(warp::body::json())
        .and(with_state.clone())
        .and_then(put_rule);
    let rules_delete = warp::path!("rules" / String)
        .and(warp::delete())
        .and(with_state.clone())
        .and_then(delete_rule);

    let route_get = warp::path("route")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state.clone())
        .and_then(get_route);
    let route_put = warp::path("route")
        .and(warp::path::end())
        .and(warp::put())
        .and(warp::body::json())
        .and(with_state.clone())
        .and_then(put_route);

    ingresses_list
        .or(ingresses_put)
        .or(ingresses_delete)
        .or(egresses_list)
        .or(egresses_put)
        .or(egresses_delete)
        .or(rules_list)
        .or(rules_put)
        .or(rules_delete)
        .or(route_get)
        .or(route_put)
        .recover(handle_rejection)
}

async fn list_ingresses(state: Arc<SharedState>) -> Result<impl Reply, Rejection> {
    let ingresses = state.ingresses.lock().expect("ingress mutex poisoned");
    let map: HashMap<String, IngressVo> = ingresses.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    Ok(warp::reply::json(&map))
}

async fn put_ingress(name: String, vo: IngressVo, state: Arc<SharedState>) -> Result<impl Reply, Rejection> {
    state.apply_ingress(name, vo).map_err(reject)?;
    Ok(ok_empty())
}

async fn delete_ingress(name: String, state: Arc<SharedState>) -> Result<impl Reply, Rejection> {
    state.remove_ingress(&name).map_err(reject)?;
    Ok(ok_empty())
}

async fn list_egresses(state: Arc<SharedState>) -> Result<impl Reply, Rejection> {
    let egresses = state.egresses.lock().expect("egress mutex poisoned");
    let map: HashMap<String, EgressVo> = egresses.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    Ok(warp::reply::json(&map))
}

async fn put_egress(name: String, vo: EgressVo, state: Arc<SharedState>) -> Result<impl Reply, Rejection> {
    state
        .egresses
        .lock()
        .expect("egress mutex poisoned")
        .update(name, vo)
        .map_err(reject)?;
    Ok(ok_empty())
}

async fn delete_egress(name: String, state: Arc<SharedState>) -> Result<impl Reply, Rejection> {
    let in_use = server::check_egress_in_use(&state, &name);
    state
        .egresses
        .lock()
        .expect("egress mutex poisoned")
        .erase(&name, in_use)
        .map_err(reject)?;
    Ok(ok_empty())
}

async fn list_rules(state: Arc<SharedState>) -> Result<impl Reply, Rejection> {
    let router = state.router.lock().expect("router mutex poisoned");
    let map: HashMap<String, RuleVo> = router
        .rule_names()
        .filter_map(|name| router.find_rule(name).map(|vo| (name.clone(), vo.clone())))
        .collect();
    Ok(warp::reply::json(&map))
}

async fn put_rule(name: String, vo: RuleVo, state: Arc<SharedState>) -> Result<impl Reply, Rejection> {
    state
        .router
        .lock()
        .expect("router mutex poisoned")
        .update_rule(name, vo)
        .map_err(reject)?;
    Ok(ok_empty())
}

async fn delete_rule(name: String, state: Arc<SharedState>) -> Result<impl Reply, Rejection> {
    state
        .router
        .lock()
        .expect("router mutex poisoned")
        .erase_rule(&name)
        .map_err(reject)?;
    Ok(ok_empty())
}

async fn get_route(state: Arc<SharedState>) -> Result<impl Reply, Rejection> {
    let router = state.router.lock().expect("router mutex poisoned");
    Ok(warp::reply::json(router.route_vo()))
}

async fn put_route(route: RouteVo, state: Arc<SharedState>) -> Result<impl Reply, Rejection> {
    let egress_names = server::egress_names(&state);
    state
        .router
        .lock()
        .expect("router mutex poisoned")
        .set_route(route, &egress_names)
        .map_err(reject)?;
    Ok(ok_empty())
}

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not found".to_string())
    } else if let Some(api_err) = err.find::<ApiError>() {
        let status =
            StatusCode::from_u16(api_err.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let message = api_err
            .0
            .to_json()
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("error")
            .to_string();
        (status, message)
    } else if let Some(e) = err.find::<warp::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&serde_json::json!({ "message": message })),
        status,
    ))
}
