use crate::auth::AuthUser;
use crate::errors::{Result, ServiceError};
use crate::state::AppState;
use actix_web::{web, HttpRequest, HttpResponse};
use booking_core::{Account, AccountTier, Role, SettleOutcome, SlotRequest, TrainingType, Weekday};
use booking_engine::availability::parse_clock;
use booking_engine::{parse_session_date, BookingRequest};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use settlement::WebhookOutcome;
use std::sync::Arc;
use uuid::Uuid;

type State = web::Data<Arc<AppState>>;

#[derive(Debug, Deserialize)]
pub struct SlotBody {
    pub day: String,
    pub start_time: String,
    pub end_time: String,
}

impl SlotBody {
    fn parse(&self) -> Result<SlotRequest> {
        let day = Weekday::parse(&self.day)
            .ok_or_else(|| ServiceError::Validation(format!("Invalid day: {}", self.day)))?;
        Ok(SlotRequest {
            day,
            start: parse_clock(&self.start_time)?,
            end: parse_clock(&self.end_time)?,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateOfferingBody {
    pub training_type: String,
    pub price: Decimal,
    #[serde(default)]
    pub days: Vec<SlotBody>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePriceBody {
    pub price: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct BookBody {
    pub time_slot_id: Uuid,
    pub session_date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PolicyBody {
    pub first_engagement: Decimal,
    pub repeat_engagement: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct AccountBody {
    pub handle: String,
    #[serde(default)]
    pub display_name: String,
    pub email: String,
    pub role: Role,
    pub tier: Option<AccountTier>,
    #[serde(default)]
    pub can_access_schedule: bool,
}

/// Health check endpoint
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": "booking-service",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Prometheus text exposition
pub async fn metrics(state: State) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(state.store.metrics().render())
}

pub async fn create_offering(
    state: State,
    user: AuthUser,
    body: web::Json<CreateOfferingBody>,
) -> Result<HttpResponse> {
    user.require(Role::Teacher)?;
    let body = body.into_inner();
    let training_type = TrainingType::parse(&body.training_type).ok_or_else(|| {
        ServiceError::Validation(format!("Invalid training type: {}", body.training_type))
    })?;
    let slots = body
        .days
        .iter()
        .map(SlotBody::parse)
        .collect::<Result<Vec<_>>>()?;

    let detail = state
        .availability
        .create_offering(user.account_id, training_type, body.price, slots)
        .await?;
    Ok(HttpResponse::Created().json(detail))
}

pub async fn list_offerings(state: State, user: AuthUser) -> Result<HttpResponse> {
    let offerings = state.availability.list_offerings(user.account_id)?;
    Ok(HttpResponse::Ok().json(offerings))
}

pub async fn get_offering(
    state: State,
    _user: AuthUser,
    offering_id: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let detail = state.availability.get_offering(*offering_id)?;
    Ok(HttpResponse::Ok().json(detail))
}

pub async fn update_offering_price(
    state: State,
    user: AuthUser,
    offering_id: web::Path<Uuid>,
    body: web::Json<UpdatePriceBody>,
) -> Result<HttpResponse> {
    let offering = state
        .availability
        .update_offering_price(*offering_id, user.account_id, body.price)
        .await?;
    Ok(HttpResponse::Ok().json(offering))
}

pub async fn delete_offering(
    state: State,
    user: AuthUser,
    offering_id: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let detached = state
        .availability
        .delete_offering(*offering_id, user.account_id)
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "detached_reservations": detached })))
}

pub async fn declare_time_slot(
    state: State,
    user: AuthUser,
    offering_id: web::Path<Uuid>,
    body: web::Json<SlotBody>,
) -> Result<HttpResponse> {
    let slot = body.parse()?;
    let slot = state
        .availability
        .declare_time_slot(*offering_id, user.account_id, slot.day, slot.start, slot.end)
        .await?;
    Ok(HttpResponse::Created().json(slot))
}

pub async fn delete_time_slot(
    state: State,
    user: AuthUser,
    slot_id: web::Path<Uuid>,
) -> Result<HttpResponse> {
    state
        .availability
        .delete_time_slot(*slot_id, user.account_id)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn check_time_slot(
    state: State,
    user: AuthUser,
    body: web::Json<SlotBody>,
) -> Result<HttpResponse> {
    let slot = body.parse()?;
    let check = state
        .availability
        .check_time_slot(user.account_id, slot.day, slot.start, slot.end)?;
    Ok(HttpResponse::Ok().json(check))
}

pub async fn book_slot(
    state: State,
    user: AuthUser,
    offering_id: web::Path<Uuid>,
    body: web::Json<BookBody>,
) -> Result<HttpResponse> {
    let session_date = parse_session_date(body.session_date.as_deref())?;
    let confirmation = state
        .booking
        .book_slot(BookingRequest {
            offering_id: *offering_id,
            time_slot_id: body.time_slot_id,
            session_date,
            consumer_id: user.account_id,
        })
        .await?;

    Ok(HttpResponse::Created().json(json!({
        "checkout_url": confirmation.checkout_url,
        "reservation_id": confirmation.reservation_id
    })))
}

pub async fn consumer_reservations(state: State, user: AuthUser) -> Result<HttpResponse> {
    let views = state.views.for_consumer(user.account_id, Utc::now())?;
    Ok(HttpResponse::Ok().json(views))
}

pub async fn provider_reservations(state: State, user: AuthUser) -> Result<HttpResponse> {
    user.require(Role::Teacher)?;
    let views = state.views.for_provider(user.account_id, Utc::now())?;
    Ok(HttpResponse::Ok().json(views))
}

pub async fn admin_reservations(state: State, user: AuthUser) -> Result<HttpResponse> {
    user.require(Role::Admin)?;
    let views = state.views.for_admin(Utc::now())?;
    Ok(HttpResponse::Ok().json(views))
}

pub async fn media_token(
    state: State,
    user: AuthUser,
    reservation_id: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let grant = state
        .media
        .issue_media_token(*reservation_id, user.account_id, Utc::now())
        .await?;
    Ok(HttpResponse::Ok().json(grant))
}

/// Payment provider callback; acknowledged unless the delivery must be retried
pub async fn payment_webhook(
    state: State,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse> {
    let signature = req
        .headers()
        .get("Stripe-Signature")
        .and_then(|value| value.to_str().ok());

    let outcome = state
        .settlement
        .handle_webhook(&body, signature, Utc::now())
        .await?;

    let summary = match outcome {
        WebhookOutcome::Settlement(SettleOutcome::Settled(record)) => json!({
            "outcome": "settled",
            "reservation_id": record.reservation.id
        }),
        WebhookOutcome::Settlement(SettleOutcome::AlreadyPaid(reservation)) => json!({
            "outcome": "already_paid",
            "reservation_id": reservation.id
        }),
        WebhookOutcome::Settlement(SettleOutcome::Skipped { reservation_id, reason }) => json!({
            "outcome": "skipped",
            "reservation_id": reservation_id,
            "reason": reason
        }),
        WebhookOutcome::SubscriptionRecorded(recorded) => json!({
            "outcome": "subscription_recorded",
            "subscription_id": recorded.subscription.id,
            "created": recorded.created
        }),
        WebhookOutcome::Ignored { reason } => json!({
            "outcome": "ignored",
            "reason": reason
        }),
    };

    Ok(HttpResponse::Ok().json(json!({ "received": true, "result": summary })))
}

pub async fn provider_income(state: State, user: AuthUser) -> Result<HttpResponse> {
    user.require(Role::Teacher)?;
    let report = state.settlement.provider_income(user.account_id)?;
    Ok(HttpResponse::Ok().json(report))
}

pub async fn platform_income(state: State, user: AuthUser) -> Result<HttpResponse> {
    user.require(Role::Admin)?;
    let report = state.settlement.platform_income()?;
    Ok(HttpResponse::Ok().json(report))
}

pub async fn replace_deduction_policy(
    state: State,
    user: AuthUser,
    body: web::Json<PolicyBody>,
) -> Result<HttpResponse> {
    user.require(Role::Admin)?;
    let policy = state
        .settlement
        .replace_policy(body.first_engagement, body.repeat_engagement)
        .await?;
    Ok(HttpResponse::Ok().json(json!({
        "first_engagement": policy.first_engagement(),
        "repeat_engagement": policy.repeat_engagement()
    })))
}

pub async fn upsert_account(
    state: State,
    user: AuthUser,
    account_id: web::Path<Uuid>,
    body: web::Json<AccountBody>,
) -> Result<HttpResponse> {
    user.require(Role::Admin)?;
    let body = body.into_inner();
    let mut account = state
        .store
        .storage()
        .find_account(*account_id)?
        .unwrap_or_else(|| Account::new("", "", "", body.role));

    account.id = *account_id;
    account.handle = body.handle;
    account.display_name = body.display_name;
    account.email = body.email;
    account.role = body.role;
    account.can_access_schedule = body.can_access_schedule;
    if let Some(tier) = body.tier {
        account.tier = tier;
    }

    state.store.writer().put_account(account.clone()).await?;
    Ok(HttpResponse::Ok().json(account))
}

pub async fn delete_account(
    state: State,
    user: AuthUser,
    account_id: web::Path<Uuid>,
) -> Result<HttpResponse> {
    user.require(Role::Admin)?;
    let detached = state.store.writer().delete_account(*account_id).await?;
    Ok(HttpResponse::Ok().json(json!({ "detached_reservations": detached })))
}

/// Configure routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health_check))
            .route("/metrics", web::get().to(metrics))
            .route("/offerings", web::post().to(create_offering))
            .route("/offerings", web::get().to(list_offerings))
            .route("/offerings/{id}", web::get().to(get_offering))
            .route("/offerings/{id}", web::patch().to(update_offering_price))
            .route("/offerings/{id}", web::delete().to(delete_offering))
            .route("/offerings/{id}/slots", web::post().to(declare_time_slot))
            .route("/offerings/{id}/book", web::post().to(book_slot))
            .route("/slots/check", web::post().to(check_time_slot))
            .route("/slots/{id}", web::delete().to(delete_time_slot))
            .route("/reservations", web::get().to(consumer_reservations))
            .route("/reservations/{id}/media-token", web::get().to(media_token))
            .route("/teacher/reservations", web::get().to(provider_reservations))
            .route("/teacher/income", web::get().to(provider_income))
            .route("/admin/reservations", web::get().to(admin_reservations))
            .route("/admin/income", web::get().to(platform_income))
            .route("/admin/deduction-policy", web::put().to(replace_deduction_policy))
            .route("/admin/accounts/{id}", web::put().to(upsert_account))
            .route("/admin/accounts/{id}", web::delete().to(delete_account))
            .route("/payments/webhook", web::post().to(payment_webhook)),
    );
}
