//! REST API
//!
//! HTTP adapter over the ingestion interface, the admin operations, the
//! current snapshot and the two calculators.

use crate::{
    conversion::{self, ConversionRequest, Direction, RateBook},
    error::{PriceError, Result},
    ingest::{BankRateSubmission, Ingestor, QuoteSubmission},
    labels::{self, Locale},
    quote_store::QuoteStore,
    settings::{PricingSettings, SettingsStore},
    snapshot_aggregator::SnapshotAggregator,
    source_registry::{NewSource, SourceRegistry},
    types::{
        BankSelector, CurrencyCode, CurrencyResolution, InstrumentClass, InstrumentKey,
        ResolvedPrice, Snapshot, Source, SourceId,
    },
    valuation::{self, FeeRule, Valuation},
};
use axum::{
    Router,
    extract::{FromRequest, Path, Query, Request, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SourceRegistry>,
    pub settings: Arc<SettingsStore>,
    pub ingestor: Ingestor,
    pub aggregator: Arc<SnapshotAggregator>,
}

impl AppState {
    pub fn new(
        registry: Arc<SourceRegistry>,
        quotes: Arc<QuoteStore>,
        settings: Arc<SettingsStore>,
        aggregator: Arc<SnapshotAggregator>,
    ) -> Self {
        let ingestor = Ingestor::new(
            Arc::clone(&registry),
            quotes,
            aggregator.base_currency(),
        );
        Self {
            registry,
            settings,
            ingestor,
            aggregator,
        }
    }
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Ingestion endpoints
        .route("/api/v1/quotes", post(submit_quote))
        .route("/api/v1/bank-rates", post(submit_bank_rate))

        // Price endpoints
        .route("/api/v1/snapshot", get(get_snapshot))
        .route("/api/v1/snapshot/refresh", post(refresh_snapshot))
        .route("/api/v1/price/:instrument", get(get_price))
        .route("/api/v1/valuate", post(valuate))
        .route("/api/v1/convert", post(convert))
        .route("/api/v1/sources/:class", get(list_sources))

        // Admin endpoints
        .route("/api/v1/admin/settings", get(get_settings))
        .route("/api/v1/admin/sources", post(register_source))
        .route("/api/v1/admin/sources/:id/enabled", put(set_source_enabled))
        .route("/api/v1/admin/ordering/:class", put(reorder_sources))
        .route(
            "/api/v1/admin/overrides/:instrument",
            put(set_override).delete(clear_override),
        )
        .route("/api/v1/admin/offsets/:class", put(set_offset))
        .route("/api/v1/admin/refresh-intervals/:class", put(set_refresh_interval))
        .route("/api/v1/admin/currency-resolution", put(set_currency_resolution))

        // Health endpoints
        .route("/api/v1/health", get(health_check))

        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// INGESTION ENDPOINTS
// ============================================================================

/// POST /api/v1/quotes
///
/// Record a quote pushed by a scraping job
async fn submit_quote(
    State(state): State<AppState>,
    ApiJson(submission): ApiJson<QuoteSubmission>,
) -> Result<Json<DataResponse<SubmitOutcome>>> {
    let stored = state.ingestor.submit_quote(submission)?;
    Ok(DataResponse::ok(SubmitOutcome { stored }))
}

/// POST /api/v1/bank-rates
///
/// Example body: {"bank_name": "nbe", "currency_pair": "USD/EGP", "buy": "49.50", ...}
async fn submit_bank_rate(
    State(state): State<AppState>,
    ApiJson(submission): ApiJson<BankRateSubmission>,
) -> Result<Json<DataResponse<SubmitOutcome>>> {
    let stored = state.ingestor.submit_bank_rate(submission)?;
    Ok(DataResponse::ok(SubmitOutcome { stored }))
}

// ============================================================================
// PRICE ENDPOINTS
// ============================================================================

/// GET /api/v1/snapshot
///
/// Latest published snapshot, `data: null` before the first refresh
async fn get_snapshot(State(state): State<AppState>) -> Json<DataResponse<Option<Snapshot>>> {
    let snapshot = state.aggregator.current_snapshot().map(|s| Snapshot::clone(&s));
    DataResponse::ok(snapshot)
}

/// POST /api/v1/snapshot/refresh
async fn refresh_snapshot(State(state): State<AppState>) -> Json<DataResponse<Snapshot>> {
    let snapshot = state.aggregator.force_refresh().await;
    DataResponse::ok(Snapshot::clone(&snapshot))
}

/// GET /api/v1/price/:instrument
///
/// Live resolution of one instrument.
///
/// Example: GET /api/v1/price/gold:k21?lang=ar
async fn get_price(
    State(state): State<AppState>,
    Path(instrument): Path<String>,
    Query(params): Query<PriceQuery>,
) -> Result<Json<DataResponse<PriceView>>> {
    let instrument: InstrumentKey = instrument.parse()?;
    let price = state.aggregator.resolve(instrument)?;

    Ok(DataResponse::ok(PriceView {
        label: labels::label(instrument, params.lang.unwrap_or_default()),
        price,
    }))
}

/// POST /api/v1/valuate
///
/// Either `price_per_unit` or `instrument` must be given; an instrument is
/// priced from the current snapshot.
async fn valuate(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ValuationRequest>,
) -> Result<Json<DataResponse<Valuation>>> {
    let price_per_unit = match (request.price_per_unit, request.instrument) {
        (Some(price), _) => price,
        (None, Some(instrument)) => state
            .aggregator
            .current_snapshot()
            .and_then(|s| s.price_of(&instrument))
            .ok_or_else(|| PriceError::NoPriceData(instrument.to_string()))?,
        (None, None) => {
            return Err(PriceError::InvalidValue(
                "either price_per_unit or instrument is required".to_string(),
            ));
        }
    };

    let result = valuation::valuate(request.weight, price_per_unit, request.workmanship, request.tax)?;
    Ok(DataResponse::ok(result))
}

/// POST /api/v1/convert
///
/// Converts with the rate book captured in the current snapshot. A zero
/// result for a non-zero amount is reported as unavailable.
async fn convert(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ConvertBody>,
) -> Result<Json<DataResponse<ConversionView>>> {
    let book = state
        .aggregator
        .current_snapshot()
        .map(|s| s.rate_book.clone())
        .unwrap_or_else(|| RateBook::new(state.aggregator.base_currency()));

    let request = ConversionRequest {
        amount: request.amount,
        from: request.from,
        to: request.to,
        direction: request.direction,
        bank: request.bank.unwrap_or(BankSelector::MarketAverage),
    };
    let result = conversion::convert(&book, &request, chrono::Utc::now())?;
    let available = !(result.is_zero() && !request.amount.is_zero());

    Ok(DataResponse::ok(ConversionView {
        amount: request.amount,
        from: request.from,
        to: request.to,
        direction: request.direction,
        bank: request.bank,
        result,
        available,
    }))
}

/// GET /api/v1/sources/:class
async fn list_sources(
    State(state): State<AppState>,
    Path(class): Path<String>,
) -> Result<Json<DataResponse<Vec<Source>>>> {
    let class: InstrumentClass = class.parse()?;
    Ok(DataResponse::ok(state.registry.list(class)))
}

// ============================================================================
// ADMIN ENDPOINTS
// ============================================================================

/// GET /api/v1/admin/settings
async fn get_settings(State(state): State<AppState>) -> Json<DataResponse<PricingSettings>> {
    DataResponse::ok(PricingSettings::clone(&state.settings.current()))
}

/// POST /api/v1/admin/sources
///
/// New sources go to the end of their class ordering
async fn register_source(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<RegisterSourceRequest>,
) -> Result<(StatusCode, Json<DataResponse<Source>>)> {
    let mut new = NewSource::new(request.id, request.instrument_class);
    if let Some(name) = request.name {
        new.name = name;
    }
    if let Some(display_name) = request.display_name {
        new.display_name = display_name;
    }
    new.enabled = request.enabled.unwrap_or(true);

    let source = state.registry.register(new)?;
    Ok((StatusCode::CREATED, DataResponse::ok(source)))
}

/// PUT /api/v1/admin/sources/:id/enabled
async fn set_source_enabled(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<EnabledRequest>,
) -> Result<Json<DataResponse<Source>>> {
    let source = state.registry.set_enabled(&SourceId::from(id), request.enabled)?;
    Ok(DataResponse::ok(source))
}

/// PUT /api/v1/admin/ordering/:class
///
/// Body lists every source id of the class, most trusted first
async fn reorder_sources(
    State(state): State<AppState>,
    Path(class): Path<String>,
    ApiJson(request): ApiJson<OrderRequest>,
) -> Result<Json<DataResponse<Vec<Source>>>> {
    let class: InstrumentClass = class.parse()?;
    let sources = state.registry.reorder(class, &request.order)?;
    Ok(DataResponse::ok(sources))
}

/// PUT /api/v1/admin/overrides/:instrument
async fn set_override(
    State(state): State<AppState>,
    Path(instrument): Path<String>,
    ApiJson(request): ApiJson<OverrideRequest>,
) -> Result<Json<DataResponse<PricingSettings>>> {
    let instrument: InstrumentKey = instrument.parse()?;
    state.settings.set_override(instrument, Some(request.price))?;
    Ok(DataResponse::ok(PricingSettings::clone(&state.settings.current())))
}

/// DELETE /api/v1/admin/overrides/:instrument
async fn clear_override(
    State(state): State<AppState>,
    Path(instrument): Path<String>,
) -> Result<Json<DataResponse<PricingSettings>>> {
    let instrument: InstrumentKey = instrument.parse()?;
    state.settings.set_override(instrument, None)?;
    Ok(DataResponse::ok(PricingSettings::clone(&state.settings.current())))
}

/// PUT /api/v1/admin/offsets/:class
async fn set_offset(
    State(state): State<AppState>,
    Path(class): Path<String>,
    ApiJson(request): ApiJson<OffsetRequest>,
) -> Result<Json<DataResponse<PricingSettings>>> {
    let class: InstrumentClass = class.parse()?;
    state.settings.set_offset(class, request.amount)?;
    Ok(DataResponse::ok(PricingSettings::clone(&state.settings.current())))
}

/// PUT /api/v1/admin/refresh-intervals/:class
async fn set_refresh_interval(
    State(state): State<AppState>,
    Path(class): Path<String>,
    ApiJson(request): ApiJson<IntervalRequest>,
) -> Result<Json<DataResponse<PricingSettings>>> {
    let class: InstrumentClass = class.parse()?;
    state
        .settings
        .set_refresh_interval(class, Duration::from_secs(request.seconds))?;
    Ok(DataResponse::ok(PricingSettings::clone(&state.settings.current())))
}

/// PUT /api/v1/admin/currency-resolution
///
/// `priority`, `market-average` or the id of a registered bank
async fn set_currency_resolution(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<CurrencyResolutionRequest>,
) -> Result<Json<DataResponse<PricingSettings>>> {
    if let CurrencyResolution::Selector(BankSelector::Bank(bank)) = &request.mode {
        let source = state
            .registry
            .get(bank)
            .ok_or_else(|| PriceError::UnknownSource(bank.clone()))?;
        if source.instrument_class != InstrumentClass::Currency {
            return Err(PriceError::ClassMismatch {
                source_id: source.id,
                expected: InstrumentClass::Currency,
                actual: source.instrument_class,
            });
        }
    }

    state.settings.set_currency_resolution(request.mode)?;
    Ok(DataResponse::ok(PricingSettings::clone(&state.settings.current())))
}

// ============================================================================
// HEALTH ENDPOINTS
// ============================================================================

/// GET /api/v1/health
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let snapshot = state.aggregator.current_snapshot();
    let now = chrono::Utc::now();

    Json(HealthResponse {
        success: true,
        snapshot_version: snapshot.as_ref().map(|s| s.version),
        snapshot_age_secs: snapshot
            .as_ref()
            .map(|s| now.signed_duration_since(s.timestamp).num_seconds()),
        sources: InstrumentClass::ALL
            .iter()
            .map(|c| (c.to_string(), state.registry.list(*c).len()))
            .collect(),
        timestamp: now.timestamp(),
    })
}

// ============================================================================
// REQUEST/RESPONSE TYPES
// ============================================================================

#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub success: bool,
    pub data: T,
    pub timestamp: i64,
}

impl<T: Serialize> DataResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
            timestamp: chrono::Utc::now().timestamp(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct SubmitOutcome {
    /// `false` when a newer quote was already held
    pub stored: bool,
}

#[derive(Debug, Deserialize)]
pub struct PriceQuery {
    pub lang: Option<Locale>,
}

#[derive(Debug, Serialize)]
pub struct PriceView {
    pub label: String,
    #[serde(flatten)]
    pub price: ResolvedPrice,
}

#[derive(Debug, Deserialize)]
pub struct ValuationRequest {
    pub weight: Decimal,
    pub price_per_unit: Option<Decimal>,
    pub instrument: Option<InstrumentKey>,
    #[serde(default = "FeeRule::none")]
    pub workmanship: FeeRule,
    #[serde(default = "FeeRule::none")]
    pub tax: FeeRule,
}

#[derive(Debug, Deserialize)]
pub struct ConvertBody {
    pub amount: Decimal,
    pub from: CurrencyCode,
    pub to: CurrencyCode,
    pub direction: Direction,
    /// Bank id or `market-average` (the default)
    pub bank: Option<BankSelector>,
}

#[derive(Debug, Serialize)]
pub struct ConversionView {
    pub amount: Decimal,
    pub from: CurrencyCode,
    pub to: CurrencyCode,
    pub direction: Direction,
    pub bank: BankSelector,
    pub result: Decimal,
    pub available: bool,
}

#[derive(Debug, Deserialize)]
pub struct RegisterSourceRequest {
    pub id: SourceId,
    pub instrument_class: InstrumentClass,
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct EnabledRequest {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct OrderRequest {
    pub order: Vec<SourceId>,
}

#[derive(Debug, Deserialize)]
pub struct OverrideRequest {
    pub price: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct OffsetRequest {
    pub amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct IntervalRequest {
    pub seconds: u64,
}

#[derive(Debug, Deserialize)]
pub struct CurrencyResolutionRequest {
    pub mode: CurrencyResolution,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub success: bool,
    pub snapshot_version: Option<u64>,
    pub snapshot_age_secs: Option<i64>,
    pub sources: std::collections::BTreeMap<String, usize>,
    pub timestamp: i64,
}

// ============================================================================
// ERROR HANDLING
// ============================================================================

/// JSON body extractor whose rejections use the `{success, error}` envelope
pub struct ApiJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = PriceError;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(PriceError::MalformedBody(rejection.body_text())),
        }
    }
}

impl IntoResponse for PriceError {
    fn into_response(self) -> Response {
        let status = match &self {
            e if e.is_validation() => StatusCode::BAD_REQUEST,
            PriceError::UnknownSource(_) | PriceError::NoPriceData(_) => StatusCode::NOT_FOUND,
            e if e.is_configuration() => StatusCode::CONFLICT,
            PriceError::Overflow(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        info!("Request rejected ({}): {}", status, self);

        let body = Json(serde_json::json!({
            "success": false,
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}
