//! Catalog page handler.

use askama::Template;
use askama_web::WebTemplate;
use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::{instrument, warn};

use epochmine_core::PageWindow;

use crate::api::types::Miner;
use crate::filters;
use crate::middleware::RequireAuth;
use crate::models::{Notice, session_keys};
use crate::routes::{Page, Pager, page_href};
use crate::state::AppState;

/// Catalog query parameters.
#[derive(Debug, Deserialize)]
pub struct CatalogQuery {
    #[serde(default = "first_page")]
    pub page: u32,
    pub notice: Option<String>,
}

const fn first_page() -> u32 {
    1
}

/// Catalog page template.
#[derive(Template, WebTemplate)]
#[template(path = "home.html")]
pub struct HomeTemplate {
    pub page: Page,
    pub miners: Vec<Miner>,
    pub pager: Pager,
    pub show_wallet_prompt: bool,
}

/// Display the miner catalog.
#[instrument(skip(state, session, auth), fields(user_id = %auth.user.id))]
pub async fn index(
    State(state): State<AppState>,
    session: Session,
    RequireAuth(auth): RequireAuth,
    Query(query): Query<CatalogQuery>,
) -> Response {
    let mut notice = Notice::from_query(query.notice.as_deref());
    let page_size = state.config().list_page_size;

    let (miners, total) = match state
        .api()
        .list_miners(auth.caller(), query.page.max(1), page_size)
        .await
    {
        Ok(list) => (list.records, list.total),
        Err(e) => {
            warn!(error = %e, "Failed to load catalog");
            notice = notice.or(Some(Notice::CatalogUnavailable));
            (Vec::new(), 0)
        }
    };

    let dismissed = session
        .get::<bool>(session_keys::WALLET_PROMPT_DISMISSED)
        .await
        .ok()
        .flatten()
        .unwrap_or(false);

    let show_wallet_prompt = if dismissed {
        false
    } else {
        match state.api().user_info(auth.caller(), &auth.user.id).await {
            Ok(info) => info.user.wallet_address.is_none(),
            Err(e) => {
                warn!(error = %e, "Failed to load user info for wallet prompt");
                false
            }
        }
    };

    HomeTemplate {
        page: Page::signed_in(&auth.user, notice, "shop"),
        miners,
        pager: Pager::new(&PageWindow::new(query.page, total, page_size), |p| {
            page_href("/", p, &[])
        }),
        show_wallet_prompt,
    }
    .into_response()
}
