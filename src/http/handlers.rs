//! REST and watch endpoint handlers.

use std::net::SocketAddr;

use axum::{
    extract::{ws::rejection::WebSocketUpgradeRejection, ConnectInfo, Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use crate::api::{Config, ConfigList};
use crate::http::server::CdsServer;
use crate::http::websocket::{serve_watch, WatchRequest};
use crate::store::Topic;

type Upgrade = Result<WebSocketUpgrade, WebSocketUpgradeRejection>;

/// Query parameters shared by the config endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct WatchParams {
    #[serde(default)]
    pub watch: bool,
    pub node: Option<String>,
}

fn list(configs: Vec<Config>) -> Response {
    let items = configs.into_iter().map(|c| c.config).collect();
    Json(ConfigList::new(items)).into_response()
}

/// Upgrade to a watch stream, or answer 400 when the request cannot upgrade.
fn watch(server: CdsServer, ws: Upgrade, remote: SocketAddr, topic: Topic, node: Option<String>) -> Response {
    match ws {
        Ok(ws) => {
            let request = WatchRequest { remote, topic, node };
            ws.on_upgrade(move |socket| serve_watch(server, socket, request))
        }
        Err(rejection) => {
            tracing::debug!(remote = %remote, error = %rejection, "Watch request is not a websocket upgrade");
            rejection.into_response()
        }
    }
}

pub async fn list_all(
    State(server): State<CdsServer>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Query(params): Query<WatchParams>,
    ws: Upgrade,
) -> Response {
    if params.watch {
        return watch(server, ws, remote, Topic::All, None);
    }
    list(server.store().snapshot())
}

pub async fn list_namespace(
    State(server): State<CdsServer>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Path(namespace): Path<String>,
    Query(params): Query<WatchParams>,
    ws: Upgrade,
) -> Response {
    let topic = Topic::namespace(&namespace);
    if params.watch {
        return watch(server, ws, remote, topic, None);
    }
    let configs = server
        .store()
        .snapshot()
        .into_iter()
        .filter(|c| topic.matches(c))
        .collect();
    list(configs)
}

pub async fn get_config(
    State(server): State<CdsServer>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Path((namespace, name)): Path<(String, String)>,
    Query(params): Query<WatchParams>,
    ws: Upgrade,
) -> Response {
    if params.watch {
        let node = params.node.filter(|n| !n.is_empty());
        return watch(server, ws, remote, Topic::config(&namespace, &name), node);
    }
    match server.store().get(&namespace, &name) {
        Some(config) => Json(config.config).into_response(),
        None => (StatusCode::NOT_FOUND, format!("config {}/{} not found", namespace, name)).into_response(),
    }
}

pub async fn get_license(State(server): State<CdsServer>) -> Response {
    Json(server.license_status()).into_response()
}
