//! Order route handlers.
//!
//! The list is fetched fresh on every visit; the "refresh" action on rows
//! awaiting verification is just a link back to the list.

use askama::Template;
use askama_web::WebTemplate;
use axum::{
    Form,
    extract::{Path, Query, State},
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::{error, info, instrument, warn};

use epochmine_core::{CheckoutState, OrderAction, OrderId, OrderStatus, PageWindow};

use crate::api::types::Order;
use crate::error::{AppError, Result};
use crate::filters;
use crate::middleware::{AuthContext, RequireAuth};
use crate::models::{Notice, session_keys};
use crate::routes::checkout::{load_checkout, save_checkout};
use crate::routes::{NoticeQuery, Page, Pager, non_empty, page_href};
use crate::state::AppState;

// =============================================================================
// Query and Form Types
// =============================================================================

/// Order list query parameters.
#[derive(Debug, Deserialize)]
pub struct OrderListQuery {
    #[serde(default = "first_page")]
    pub page: u32,
    /// Order code search.
    pub order_id: Option<String>,
    pub notice: Option<String>,
}

const fn first_page() -> u32 {
    1
}

/// Administrator status form.
#[derive(Debug, Deserialize)]
pub struct StatusForm {
    pub status: i32,
}

// =============================================================================
// Templates
// =============================================================================

/// A row action rendered as a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionLink {
    pub label: &'static str,
    pub href: String,
}

/// An order row with its actions.
pub struct OrderRow {
    pub order: Order,
    pub actions: Vec<ActionLink>,
}

impl OrderRow {
    #[must_use]
    pub fn new(order: Order) -> Self {
        let actions = order
            .status
            .actions()
            .iter()
            .map(|action| ActionLink {
                label: action.label(),
                href: action_href(&order.id, *action),
            })
            .collect();
        Self { order, actions }
    }
}

/// Where a row action leads.
fn action_href(id: &OrderId, action: OrderAction) -> String {
    match action {
        OrderAction::Repay => format!("{}/pay", order_path(id)),
        OrderAction::Cancel => format!("{}/cancel", order_path(id)),
        OrderAction::Refresh => "/orders".to_string(),
    }
}

/// Order list template.
#[derive(Template, WebTemplate)]
#[template(path = "orders/index.html")]
pub struct OrdersTemplate {
    pub page: Page,
    pub rows: Vec<OrderRow>,
    pub pager: Pager,
    pub search: String,
}

/// Order detail template.
#[derive(Template, WebTemplate)]
#[template(path = "orders/show.html")]
pub struct OrderTemplate {
    pub page: Page,
    pub order: Order,
    pub explorer_url: Option<String>,
    /// Statuses an administrator may move this order to. Empty for everyone else.
    pub status_options: Vec<OrderStatus>,
}

/// Cancel confirmation template.
#[derive(Template, WebTemplate)]
#[template(path = "orders/cancel.html")]
pub struct CancelTemplate {
    pub page: Page,
    pub order: Order,
}

// =============================================================================
// Helpers
// =============================================================================

fn order_path(id: &OrderId) -> String {
    format!("/orders/{}", urlencoding::encode(id.as_str()))
}

async fn is_admin(state: &AppState, auth: &AuthContext) -> bool {
    match state.api().user_info(auth.caller(), &auth.user.id).await {
        Ok(info) => info.user.is_admin(),
        Err(e) => {
            warn!(error = %e, "Failed to load user role");
            false
        }
    }
}

/// Fulfillment statuses reachable from `current`.
fn status_options(current: OrderStatus) -> Vec<OrderStatus> {
    OrderStatus::FULFILLMENT
        .into_iter()
        .filter(|target| current.can_move_to(*target))
        .collect()
}

// =============================================================================
// List and detail
// =============================================================================

/// Display the order list.
#[instrument(skip(state, auth, query), fields(user_id = %auth.user.id))]
pub async fn index(
    State(state): State<AppState>,
    RequireAuth(auth): RequireAuth,
    Query(query): Query<OrderListQuery>,
) -> Response {
    let mut notice = Notice::from_query(query.notice.as_deref());
    let page_size = state.config().list_page_size;
    let search = non_empty(query.order_id);

    let (orders, total) = match state
        .api()
        .list_orders(auth.caller(), query.page.max(1), page_size, search.as_deref())
        .await
    {
        Ok(list) => (list.records, list.total),
        Err(e) => {
            warn!(error = %e, "Failed to load orders");
            notice = notice.or(Some(Notice::LoadFailed));
            (Vec::new(), 0)
        }
    };

    let search = search.unwrap_or_default();
    let window = PageWindow::new(query.page, total, page_size);
    OrdersTemplate {
        page: Page::signed_in(&auth.user, notice, "orders"),
        rows: orders.into_iter().map(OrderRow::new).collect(),
        pager: Pager::new(&window, |p| {
            page_href("/orders", p, &[("order_id", search.as_str())])
        }),
        search,
    }
    .into_response()
}

/// Display one order.
#[instrument(skip(state, auth, query), fields(user_id = %auth.user.id))]
pub async fn show(
    State(state): State<AppState>,
    RequireAuth(auth): RequireAuth,
    Path(id): Path<OrderId>,
    Query(query): Query<NoticeQuery>,
) -> Result<Response> {
    let order = state.api().order_detail(auth.caller(), &id).await?;

    let explorer_url = order
        .transaction_hash
        .as_ref()
        .filter(|_| order.status.is_paid())
        .map(|hash| state.config().chain.explorer_link(hash));

    let status_options = if is_admin(&state, &auth).await {
        status_options(order.status)
    } else {
        Vec::new()
    };

    Ok(OrderTemplate {
        page: Page::signed_in(&auth.user, query.notice(), "orders"),
        order,
        explorer_url,
        status_options,
    }
    .into_response())
}

// =============================================================================
// Actions
// =============================================================================

/// Resume payment for a pending order.
#[instrument(skip(state, session, auth), fields(user_id = %auth.user.id))]
pub async fn pay(
    State(state): State<AppState>,
    session: Session,
    RequireAuth(auth): RequireAuth,
    Path(id): Path<OrderId>,
) -> Response {
    let order = match state.api().order_detail(auth.caller(), &id).await {
        Ok(order) => order,
        Err(e) => {
            warn!(order_id = %id, error = %e, "Failed to load order for payment");
            return Notice::LoadFailed.redirect("/orders").into_response();
        }
    };

    let target = order
        .payment_target()
        .filter(|_| order.status.actions().contains(&OrderAction::Repay));
    let Some(target) = target else {
        info!(order_id = %id, status = %order.status, "Order is not payable");
        return Notice::OrderNotPayable.redirect("/orders").into_response();
    };

    if let Err(e) = save_checkout(&session, &CheckoutState::resume(target)).await {
        error!(error = %e, "Failed to store checkout");
        return Notice::LoadFailed.redirect("/orders").into_response();
    }

    Redirect::to("/checkout/payment").into_response()
}

/// Display the cancel confirmation.
#[instrument(skip(state, auth), fields(user_id = %auth.user.id))]
pub async fn cancel_page(
    State(state): State<AppState>,
    RequireAuth(auth): RequireAuth,
    Path(id): Path<OrderId>,
) -> Result<Response> {
    let order = state.api().order_detail(auth.caller(), &id).await?;
    if !order.status.actions().contains(&OrderAction::Cancel) {
        return Ok(Notice::CancelFailed.redirect("/orders").into_response());
    }

    Ok(CancelTemplate {
        page: Page::signed_in(&auth.user, None, "orders"),
        order,
    }
    .into_response())
}

/// Cancel an order.
#[instrument(skip(state, session, auth), fields(user_id = %auth.user.id))]
pub async fn cancel(
    State(state): State<AppState>,
    session: Session,
    RequireAuth(auth): RequireAuth,
    Path(id): Path<OrderId>,
) -> Response {
    let Some(_guard) = state.inflight().try_begin(format!("order:{id}")) else {
        return Notice::InProgress.redirect("/orders").into_response();
    };

    if let Err(e) = state.api().cancel_order(auth.caller(), &id).await {
        warn!(order_id = %id, error = %e, "Order cancel failed");
        return Notice::CancelFailed.redirect("/orders").into_response();
    }
    info!(order_id = %id, "Order cancelled");

    // A wizard still pointing at this order has nothing left to pay
    if let Some(checkout) = load_checkout(&session).await {
        if checkout.target().is_some_and(|t| t.order_id == id) {
            if let Err(e) = session
                .remove::<CheckoutState>(session_keys::CHECKOUT)
                .await
            {
                warn!(error = %e, "Failed to clear checkout for cancelled order");
            }
        }
    }

    Notice::OrderCancelled.redirect("/orders").into_response()
}

/// Move an order to a fulfillment status. Administrators only.
#[instrument(skip(state, auth, form), fields(user_id = %auth.user.id))]
pub async fn update_status(
    State(state): State<AppState>,
    RequireAuth(auth): RequireAuth,
    Path(id): Path<OrderId>,
    Form(form): Form<StatusForm>,
) -> Result<Response> {
    if !is_admin(&state, &auth).await {
        return Err(AppError::Forbidden(
            "Only administrators can change order status".to_string(),
        ));
    }

    let back = order_path(&id);
    let target = OrderStatus::from(form.status);
    let order = state.api().order_detail(auth.caller(), &id).await?;
    if !order.status.can_move_to(target) {
        info!(order_id = %id, from = %order.status, to = %target, "Status change rejected");
        return Ok(Notice::StatusUpdateFailed.redirect(&back).into_response());
    }

    if let Err(e) = state
        .api()
        .update_order_status(auth.caller(), &id, target)
        .await
    {
        warn!(order_id = %id, error = %e, "Status update failed");
        return Ok(Notice::StatusUpdateFailed.redirect(&back).into_response());
    }
    info!(order_id = %id, to = %target, "Order status updated");

    Ok(Notice::StatusUpdated.redirect(&back).into_response())
}
