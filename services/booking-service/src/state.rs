use crate::config::Config;
use booking_core::Store;
use booking_engine::{
    AvailabilityService, BookingEngine, CheckoutAdapter, HmacTokenIssuer, MediaAccess,
    ReservationViews,
};
use settlement::{SettlementEngine, StorePolicyRepository};
use std::sync::Arc;

/// Everything the handlers reach, shared across workers
pub struct AppState {
    pub store: Arc<Store>,
    pub availability: AvailabilityService,
    pub booking: BookingEngine,
    pub views: ReservationViews,
    pub media: MediaAccess,
    pub settlement: SettlementEngine,
}

impl AppState {
    pub fn build(
        store: Arc<Store>,
        checkout: Arc<dyn CheckoutAdapter>,
        config: &Config,
    ) -> anyhow::Result<Self> {
        let engine_config = config.engine_config();
        let lead = engine_config.access_lead();

        let issuer = Arc::new(HmacTokenIssuer::new(&engine_config.media.secret)?);
        let policy = Arc::new(StorePolicyRepository::new(store.clone()));
        let settlement_config = config
            .settlement_config()
            .map_err(anyhow::Error::msg)?;

        Ok(Self {
            availability: AvailabilityService::new(store.clone(), engine_config.clone()),
            booking: BookingEngine::new(store.clone(), checkout, engine_config)?,
            views: ReservationViews::new(store.clone(), lead),
            media: MediaAccess::new(store.clone(), issuer, lead),
            settlement: SettlementEngine::new(store.clone(), policy, settlement_config),
            store,
        })
    }
}
