//! Miner node route handlers.

use std::collections::HashMap;

use askama::Template;
use askama_web::WebTemplate;
use axum::{
    Form,
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use md5::{Digest, Md5};
use tracing::{info, instrument, warn};

use epochmine_core::{Email, Field, FieldErrors, PageWindow, validate};

use crate::api::types::{MinerNode, NodeOnlineTime};
use crate::filters;
use crate::middleware::{AuthContext, RequireAuth};
use crate::models::Notice;
use crate::routes::{Page, Pager, non_empty, page_href};
use crate::state::AppState;

/// Machine list query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct MachineQuery {
    pub page: Option<u32>,
    pub q: Option<String>,
    pub notice: Option<String>,
}

/// Add-machine form.
#[derive(Debug, Deserialize)]
pub struct AddNodeForm {
    pub mac_addr: String,
}

/// Transfer form.
#[derive(Debug, Deserialize)]
pub struct TransferForm {
    pub email: String,
}

/// A node row with its display id.
pub struct NodeRow {
    pub node: MinerNode,
    pub short_id: String,
}

/// Machine list template.
#[derive(Template, WebTemplate)]
#[template(path = "machines/index.html")]
pub struct MachinesTemplate {
    pub page: Page,
    pub nodes: Vec<NodeRow>,
    pub pager: Pager,
    pub search: String,
    /// Value typed into the add form, kept when it failed validation.
    pub mac_addr: String,
    pub errors: FieldErrors,
    /// Node whose transfer form failed validation.
    pub transfer_node: Option<String>,
}

impl MachinesTemplate {
    #[must_use]
    pub fn error(&self, field: &str) -> Option<&str> {
        self.errors.by_name(field)
    }

    /// Inline transfer error, only on the row that was submitted.
    #[must_use]
    pub fn transfer_error(&self, node_key: &str) -> Option<&str> {
        match &self.transfer_node {
            Some(key) if key == node_key => self.errors.get(Field::Email),
            _ => None,
        }
    }
}

/// Characters 8..24 of the node key's hex MD5 digest, the id shown on
/// physical miner labels.
#[must_use]
pub fn short_node_id(node_key: &str) -> String {
    let hex: String = Md5::digest(node_key.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();
    hex.get(8..24).unwrap_or_default().to_string()
}

/// Overlay the separately fetched online durations onto the node list.
fn merge_online_times(nodes: &mut [MinerNode], times: Vec<NodeOnlineTime>) {
    let by_key: HashMap<String, u64> = times
        .into_iter()
        .map(|t| (t.node_key, t.online_time))
        .collect();
    for node in nodes {
        if let Some(secs) = by_key.get(&node.node_key) {
            node.online_time = *secs;
        }
    }
}

/// Extra state for re-rendering after a failed form.
#[derive(Default)]
struct FormState {
    mac_addr: String,
    errors: FieldErrors,
    transfer_node: Option<String>,
}

async fn render_index(
    state: &AppState,
    auth: &AuthContext,
    query: MachineQuery,
    form: FormState,
) -> Response {
    let mut notice = Notice::from_query(query.notice.as_deref());
    let page_size = state.config().list_page_size;
    let page = query.page.unwrap_or(1).max(1);
    let search = non_empty(query.q).unwrap_or_default();

    let (mut nodes, total) = match state
        .api()
        .list_nodes(
            auth.caller(),
            page,
            page_size,
            (!search.is_empty()).then_some(search.as_str()),
        )
        .await
    {
        Ok(list) => (list.records, list.total),
        Err(e) => {
            warn!(error = %e, "Failed to load miner nodes");
            notice = notice.or(Some(Notice::LoadFailed));
            (Vec::new(), 0)
        }
    };

    let keys: Vec<&str> = nodes.iter().map(|n| n.node_key.as_str()).collect();
    let times = state.api().online_times(auth.caller(), &keys).await;
    match times {
        Ok(times) => merge_online_times(&mut nodes, times),
        Err(e) => warn!(error = %e, "Failed to load node online times"),
    }

    MachinesTemplate {
        page: Page::signed_in(&auth.user, notice, "machines"),
        nodes: nodes
            .into_iter()
            .map(|node| NodeRow {
                short_id: short_node_id(&node.node_key),
                node,
            })
            .collect(),
        pager: Pager::new(&PageWindow::new(page, total, page_size), |p| {
            page_href("/machines", p, &[("q", search.as_str())])
        }),
        search,
        mac_addr: form.mac_addr,
        errors: form.errors,
        transfer_node: form.transfer_node,
    }
    .into_response()
}

/// Display the user's miner nodes.
#[instrument(skip(state, auth, query), fields(user_id = %auth.user.id))]
pub async fn index(
    State(state): State<AppState>,
    RequireAuth(auth): RequireAuth,
    Query(query): Query<MachineQuery>,
) -> Response {
    render_index(&state, &auth, query, FormState::default()).await
}

/// Register a node by MAC address.
#[instrument(skip(state, auth, form), fields(user_id = %auth.user.id))]
pub async fn add(
    State(state): State<AppState>,
    RequireAuth(auth): RequireAuth,
    Form(form): Form<AddNodeForm>,
) -> Response {
    let mac = match validate::mac_address(&form.mac_addr) {
        Ok(mac) => mac,
        Err(errors) => {
            let form = FormState {
                mac_addr: form.mac_addr,
                errors,
                transfer_node: None,
            };
            return render_index(&state, &auth, MachineQuery::default(), form).await;
        }
    };

    if let Err(e) = state.api().add_node(auth.caller(), &mac).await {
        warn!(error = %e, "Failed to add miner node");
        return Notice::NodeAddFailed.redirect("/machines").into_response();
    }
    info!(mac_addr = %mac, "Miner node added");

    Notice::NodeAdded.redirect("/machines").into_response()
}

/// Transfer a node to another account by email.
#[instrument(skip(state, auth, form), fields(user_id = %auth.user.id))]
pub async fn transfer(
    State(state): State<AppState>,
    RequireAuth(auth): RequireAuth,
    Path(node_key): Path<String>,
    Form(form): Form<TransferForm>,
) -> Response {
    let email = match Email::parse(&form.email) {
        Ok(email) => email,
        Err(e) => {
            let mut errors = FieldErrors::new();
            errors.add(Field::Email, e.to_string());
            let form = FormState {
                errors,
                transfer_node: Some(node_key),
                ..FormState::default()
            };
            return render_index(&state, &auth, MachineQuery::default(), form).await;
        }
    };

    if let Err(e) = state
        .api()
        .transfer_node(auth.caller(), &node_key, email.as_str())
        .await
    {
        warn!(error = %e, "Failed to transfer miner node");
        return Notice::NodeTransferFailed
            .redirect("/machines")
            .into_response();
    }
    info!(node = %short_node_id(&node_key), "Miner node transferred");

    Notice::NodeTransferred.redirect("/machines").into_response()
}
