//! club-booking server entry point.
//!
//! Wires storage, collaborator ports and the payment gateway, starts the
//! background loops and serves the REST API until ctrl-c or SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use chrono::{NaiveTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use club_booking::api;
use club_booking::app_state::AppState;
use club_booking::auth::TokenVerifier;
use club_booking::config::EngineConfig;
use club_booking::domain::{
    ClubId, Facility, FacilityId, FacilityStatus, MedicalCertStatus, Principal, ReferenceType,
    Role, UserId, UserProfile,
};
use club_booking::gateway::http::HttpPaymentGateway;
use club_booking::gateway::signature::WebhookVerifier;
use club_booking::gateway::stub::StubPaymentGateway;
use club_booking::notify::LogNotifier;
use club_booking::persistence::Storage;
use club_booking::persistence::memory::MemoryStorage;
use club_booking::persistence::postgres::PgStorage;
use club_booking::ports::memory::InMemoryCatalog;
use club_booking::ports::postgres::PgCatalog;
use club_booking::ports::{FacilityCatalog, PaymentGateway, TenantDirectory, UserDirectory};
use club_booking::service::{
    BookingPaymentResponder, BookingService, OutboxDispatcher, PaymentBridge,
    RecurringMaterializer, Sweeper,
};

/// Storage plus the read-only collaborators it is paired with.
struct Adapters {
    storage: Arc<dyn Storage>,
    catalog: Arc<dyn FacilityCatalog>,
    users: Arc<dyn UserDirectory>,
    tenants: Arc<dyn TenantDirectory>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = EngineConfig::from_env().map_err(|e| anyhow::anyhow!("configuration: {e}"))?;
    init_tracing(config.log_json);
    tracing::info!(addr = %config.listen_addr, "starting club-booking");

    let tokens = Arc::new(TokenVerifier::new(config.auth_token_secret.clone()));
    let adapters = if config.persistence_enabled {
        let storage = PgStorage::connect(&config.database)
            .await
            .context("connecting to PostgreSQL")?;
        let catalog = Arc::new(PgCatalog::new(storage.pool().clone()));
        tracing::info!("using PostgreSQL storage");
        Adapters {
            storage: Arc::new(storage),
            catalog: Arc::clone(&catalog) as _,
            users: Arc::clone(&catalog) as _,
            tenants: catalog,
        }
    } else {
        let catalog = Arc::new(InMemoryCatalog::new());
        seed_demo(&catalog, &tokens).await?;
        tracing::warn!("persistence disabled, using in-memory storage with demo data");
        Adapters {
            storage: Arc::new(MemoryStorage::new()),
            catalog: Arc::clone(&catalog) as _,
            users: Arc::clone(&catalog) as _,
            tenants: catalog,
        }
    };

    let policy = config.policy.clone();
    let verifier = WebhookVerifier::new(config.payment_webhook_secret.clone());
    if config.payment_webhook_secret.is_empty() {
        tracing::warn!("PAYMENT_WEBHOOK_SECRET is empty, every webhook will be rejected");
    }
    let gateway: Arc<dyn PaymentGateway> = match config.payment_gateway.clone() {
        Some(processor) => Arc::new(HttpPaymentGateway::new(
            processor,
            policy.currency.clone(),
            verifier,
            policy.gateway_timeout,
        )?),
        None => {
            tracing::warn!("no payment processor configured, using the stub gateway");
            Arc::new(StubPaymentGateway::new(verifier))
        }
    };

    let bridge = Arc::new(
        PaymentBridge::new(Arc::clone(&adapters.storage), gateway, policy.clone())
            .with_responder(ReferenceType::Booking, Arc::new(BookingPaymentResponder)),
    );
    let bookings = BookingService::new(
        Arc::clone(&adapters.storage),
        Arc::clone(&adapters.catalog),
        Arc::clone(&adapters.users),
        Arc::clone(&bridge),
        policy.clone(),
    );
    let materializer = RecurringMaterializer::new(
        bookings.clone(),
        Arc::clone(&adapters.storage),
        Arc::clone(&adapters.catalog),
        Arc::clone(&adapters.tenants),
    );
    let sweeper = Sweeper::new(
        Arc::clone(&adapters.storage),
        Arc::clone(&adapters.tenants),
        policy.clone(),
    );
    let outbox = OutboxDispatcher::new(
        Arc::clone(&adapters.storage),
        Arc::clone(&adapters.tenants),
        Arc::new(LogNotifier),
        config.outbox_batch_size,
        policy.storage_timeout,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let jobs: Vec<JoinHandle<()>> = vec![
        tokio::spawn(sweeper.run(
            Duration::from_secs(config.sweeper_interval_secs.max(1)),
            shutdown_rx.clone(),
        )),
        tokio::spawn(materializer.clone().run(
            Duration::from_secs(config.materialize_interval_secs.max(1)),
            shutdown_rx.clone(),
        )),
        tokio::spawn(outbox.run(
            Duration::from_secs(config.outbox_interval_secs.max(1)),
            shutdown_rx,
        )),
    ];

    let app_state = AppState {
        bookings: Arc::new(bookings),
        materializer: Arc::new(materializer),
        bridge,
        tokens,
    };

    let request_timeout = policy.storage_timeout * 2 + policy.gateway_timeout;
    let app = Router::new()
        .merge(api::build_router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(request_timeout))
                .layer(CorsLayer::permissive()),
        )
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped, waiting for background jobs");
    let _ = shutdown_tx.send(true);
    for job in jobs {
        if tokio::time::timeout(Duration::from_secs(10), job).await.is_err() {
            tracing::warn!("background job did not stop in time");
        }
    }
    tracing::info!("shutdown complete");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Resolves on ctrl-c or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install ctrl-c handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
        () = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}

/// One club with a priced court, an admin and a member, for running without
/// a database. Tokens for both users are logged so the API can be tried.
async fn seed_demo(catalog: &InMemoryCatalog, tokens: &TokenVerifier) -> anyhow::Result<()> {
    let club_id = ClubId::new();
    let (Some(opening_time), Some(closing_time)) = (
        NaiveTime::from_hms_opt(8, 0, 0),
        NaiveTime::from_hms_opt(23, 0, 0),
    ) else {
        anyhow::bail!("invalid demo opening hours");
    };
    let facility = Facility {
        id: FacilityId::new(),
        club_id,
        name: "Court 1".to_string(),
        status: FacilityStatus::Active,
        capacity: 4,
        hourly_rate: Decimal::new(8000, 0),
        guest_fee: Decimal::new(2000, 0),
        opening_time,
        closing_time,
    };
    tracing::info!(%club_id, facility_id = %facility.id, "demo facility");
    catalog.put_facility(facility).await;

    let expires_at = Utc::now() + chrono::Duration::days(7);
    for (role, email) in [
        (Role::Admin, "admin@demo.club"),
        (Role::Member, "member@demo.club"),
    ] {
        let user = UserProfile {
            id: UserId::new(),
            club_id,
            email: email.to_string(),
            medical_cert_status: MedicalCertStatus::Valid,
            medical_cert_expiry: None,
        };
        let token = tokens.issue(&Principal::new(user.id, club_id, role), expires_at)?;
        tracing::info!(user_id = %user.id, role = ?role, %token, "demo user");
        catalog.put_user(user).await;
    }
    Ok(())
}
