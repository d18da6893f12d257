//! The conduit-server composition root: wires every `conduit-core` component behind one shared
//! [`EventBus`] and serves the Transport Edge plus Administrative REST (SPEC_FULL.md §4.7, §6).
//!
//! Grounded in the teacher's `krusty-server::{lib, main}` (`build_router`/`start_server` split,
//! CORS + trace layering, the embedded-PWA fallback dropped per DESIGN.md).

pub mod auth;
pub mod error;
pub mod routes;
pub mod subscribers;
pub mod ws;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use conduit_core::agent::{AgentServices, AgenticOrchestrator};
use conduit_core::ai::AiClient;
use conduit_core::approval::{ApprovalManager, ApprovalPolicy};
use conduit_core::bus::{EventBus, Selector};
use conduit_core::storage::{PersistenceMode, SessionStore};
use conduit_core::tools::{register_builtin_tools, ToolDispatcher, ToolRegistry};
use conduit_core::RuntimeConfig;

use subscribers::{AuditSubscriber, ContextSubscriber};

/// Everything a route handler or the WebSocket edge needs, shared behind `Arc`/cheap `Clone`.
#[derive(Clone)]
pub struct AppState {
    pub store: SessionStore,
    pub bus: EventBus,
    pub approvals: Arc<ApprovalManager>,
    pub dispatcher: Arc<ToolDispatcher>,
    pub orchestrator: Arc<AgenticOrchestrator>,
    pub working_dir: Arc<PathBuf>,
    pub config: Arc<RuntimeConfig>,
    pub audit: Arc<AuditSubscriber>,
}

/// Reads the LLM provider endpoint directly from the environment, mirroring the teacher's
/// `create_ai_client` (which also bypasses its own typed config struct for provider wiring).
/// `RuntimeConfig` stays provider-agnostic; `LLM_BASE_URL`/`LLM_API_KEY` are deployment details.
fn create_ai_client(request_timeout: Duration) -> anyhow::Result<AiClient> {
    let base_url = std::env::var("LLM_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
    let api_key = std::env::var("LLM_API_KEY").ok();
    Ok(AiClient::new(base_url, api_key, request_timeout)?)
}

/// Builds the composition root and the axum [`Router`] it serves. Does not bind a socket.
pub async fn build_router(config: RuntimeConfig) -> anyhow::Result<(Router, AppState)> {
    let config = Arc::new(config);
    let working_dir = Arc::new(std::env::current_dir()?);

    let bus = EventBus::new();

    let persistence_mode = if config.use_event_driven_persistence {
        PersistenceMode::Debounced
    } else {
        PersistenceMode::Immediate
    };
    let store = SessionStore::new(PathBuf::from(&config.db_url), bus.clone(), persistence_mode)?;

    let tool_registry = Arc::new(ToolRegistry::new());
    register_builtin_tools(&tool_registry).await;

    let approvals = Arc::new(ApprovalManager::new(
        store.clone(),
        bus.clone(),
        ApprovalPolicy::default(),
        config.approval_default_timeout,
    ));
    conduit_core::approval::spawn_periodic_sweep(approvals.clone());

    let dispatcher = Arc::new(ToolDispatcher::new(tool_registry, approvals.clone(), bus.clone()));

    let ai_client = Arc::new(create_ai_client(config.request_timeout)?);

    let services = AgentServices {
        store: store.clone(),
        bus: bus.clone(),
        dispatcher: dispatcher.clone(),
        ai_client,
    };
    let orchestrator = Arc::new(AgenticOrchestrator::new(
        services,
        config.llm_model.clone(),
        config.orchestrator_max_iterations,
    ));

    let context_subscriber = Arc::new(ContextSubscriber::new(store.clone()));
    bus.subscribe(
        Selector::ExactType(conduit_core::bus::EventType::AgentSwitched),
        100,
        context_subscriber,
    );
    let audit = Arc::new(AuditSubscriber::new());
    bus.subscribe(Selector::Wildcard, 0, audit.clone());

    let state = AppState {
        store,
        bus,
        approvals,
        dispatcher,
        orchestrator,
        working_dir,
        config,
        audit,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let router = Router::new()
        .route("/health", get(routes::health::health))
        .route("/ws/:session_id", get(ws::edge::upgrade))
        .nest("/api", routes::api_router(state.clone()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    Ok((router, state))
}

/// Binds `0.0.0.0:{PORT}` (default 8787) and serves until the process is killed.
pub async fn start_server(config: RuntimeConfig) -> anyhow::Result<()> {
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8787);
    let (router, _state) = build_router(config).await?;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "conduit-server listening");
    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
