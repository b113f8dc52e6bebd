use crate::config::Config;
use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use siteforge_core::{
    ApiClient, CloudflareAdapter, CredentialManager, CredentialRecord, DeploySiteOperation,
    DeploySiteRequest, DocumentStore, ForgeError, HttpTokenRefresher, MemoryStore, Page, Project,
    Provider, ProviderRegistryBuilder, ResolveContentOperation, ResolveContentOutcome,
    ResolveContentRequest, Result, SiteStatusOperation,
};
use std::sync::Arc;

pub struct ServerState {
    pub store: Arc<MemoryStore>,
    pub deploy: DeploySiteOperation,
    pub status: SiteStatusOperation,
    pub resolve: ResolveContentOperation,
    /// Used only for validating static tokens at credential-save time.
    pub cloudflare: CloudflareAdapter,
}

#[derive(Debug, Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<ApiError>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Structured error payload: human-readable message plus the machine
/// detail a dashboard needs for actionable suggestions. Never carries
/// credential material.
#[derive(Debug, Serialize)]
struct ApiError {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<String>,
}

fn error_response(error: ForgeError) -> Response {
    let status = match &error {
        ForgeError::Validation(_) => StatusCode::BAD_REQUEST,
        ForgeError::SubdomainTaken(_) => StatusCode::CONFLICT,
        ForgeError::AuthRequired(_) => StatusCode::FORBIDDEN,
        ForgeError::ProjectNotFound(_) => StatusCode::NOT_FOUND,
        ForgeError::Provider { .. } | ForgeError::ProviderShape(_) | ForgeError::Http(_) => {
            StatusCode::BAD_GATEWAY
        }
        ForgeError::Pipeline { source, .. } => {
            return error_response_with_stage(&error, source);
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let payload = ApiError {
        message: error.to_string(),
        provider_status: match &error {
            ForgeError::Provider { status, .. } => Some(*status),
            _ => None,
        },
        provider_body: match &error {
            ForgeError::Provider { body, .. } => Some(body.clone()),
            _ => None,
        },
        stage: None,
    };

    api_error_response(status, payload)
}

fn error_response_with_stage(outer: &ForgeError, source: &ForgeError) -> Response {
    let stage = match outer {
        ForgeError::Pipeline { stage, .. } => Some(stage.to_string()),
        _ => None,
    };
    let status = match source {
        ForgeError::AuthRequired(_) => StatusCode::FORBIDDEN,
        ForgeError::Validation(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::BAD_GATEWAY,
    };
    let payload = ApiError {
        message: outer.to_string(),
        provider_status: match source {
            ForgeError::Provider { status, .. } => Some(*status),
            _ => None,
        },
        provider_body: match source {
            ForgeError::Provider { body, .. } => Some(body.clone()),
            _ => None,
        },
        stage,
    };
    api_error_response(status, payload)
}

fn api_error_response(status: StatusCode, payload: ApiError) -> Response {
    let body: ApiResponse<()> = ApiResponse {
        success: false,
        data: None,
        error: Some(payload),
    };
    (status, axum::Json(body)).into_response()
}

pub async fn run_server(config: Config) -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let http = ApiClient::new(config.retry_policy())?;

    let refresher = Arc::new(HttpTokenRefresher::new(http.clone(), config.oauth_configs()));
    let credentials = Arc::new(CredentialManager::new(store.clone(), refresher));

    let mut registry_builder = ProviderRegistryBuilder::new()
        .store(store.clone())
        .http(http.clone())
        .base_domain(&config.base_domain);
    if let Some(vercel) = &config.providers.vercel {
        if let Some(base) = &vercel.api_base {
            registry_builder = registry_builder.vercel_api_base(base);
        }
        if let Some(team_id) = &vercel.team_id {
            registry_builder = registry_builder.vercel_team_id(team_id);
        }
    }
    if let Some(cloudflare) = &config.providers.cloudflare {
        if let Some(base) = &cloudflare.api_base {
            registry_builder = registry_builder.cloudflare_api_base(base);
        }
    }
    if let Some(firebase) = &config.providers.firebase {
        if let Some(base) = &firebase.api_base {
            registry_builder = registry_builder.firebase_hosting_api_base(base);
        }
        if let Some(channel) = &firebase.release_channel {
            registry_builder = registry_builder.firebase_release_channel(channel);
        }
    }
    let registry = Arc::new(registry_builder.build()?);

    let mut cloudflare = CloudflareAdapter::new(http);
    if let Some(base) = config
        .providers
        .cloudflare
        .as_ref()
        .and_then(|cf| cf.api_base.as_ref())
    {
        cloudflare = cloudflare.with_api_base(base);
    }

    let state = Arc::new(ServerState {
        store: store.clone(),
        deploy: DeploySiteOperation::new(store.clone(), credentials, registry),
        status: SiteStatusOperation::new(store.clone()),
        resolve: ResolveContentOperation::new(store),
        cloudflare,
    });

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/projects", post(create_project))
        .route("/projects/:id/pages/*name", put(upsert_page))
        .route("/projects/:id/credentials/:provider", post(save_credential))
        .route("/projects/:id/deploy/:provider", post(deploy_project))
        .route("/projects/:id/status", get(project_status))
        .route("/sites/:subdomain/content", get(serve_content_root))
        .route("/sites/:subdomain/content/*path", get(serve_content))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| ForgeError::Internal(e.to_string()))?;

    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        axum::Json(serde_json::json!({ "status": "ok" })),
    )
}

#[derive(Debug, Deserialize)]
struct CreateProjectBody {
    owner_id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    subdomain: Option<String>,
    #[serde(default)]
    custom_domain: Option<String>,
}

async fn create_project(
    State(state): State<Arc<ServerState>>,
    axum::Json(body): axum::Json<CreateProjectBody>,
) -> Response {
    let mut project = Project::new(body.owner_id, body.name);
    project.description = body.description.unwrap_or_default();
    project.subdomain = body.subdomain;
    project.custom_domain = body.custom_domain;

    match state.store.insert_project(&project).await {
        Ok(()) => (StatusCode::CREATED, axum::Json(ApiResponse::ok(project))).into_response(),
        Err(error) => error_response(error),
    }
}

#[derive(Debug, Deserialize)]
struct UpsertPageBody {
    content: String,
}

async fn upsert_page(
    State(state): State<Arc<ServerState>>,
    Path((project_id, name)): Path<(String, String)>,
    axum::Json(body): axum::Json<UpsertPageBody>,
) -> Response {
    let page = Page::new(project_id, name, body.content);
    match state.store.upsert_page(&page).await {
        Ok(()) => (StatusCode::OK, axum::Json(ApiResponse::ok(page))).into_response(),
        Err(error) => error_response(error),
    }
}

/// Credential intake: either a static token pair (Cloudflare, validated
/// against the provider before saving) or an OAuth grant result.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SaveCredentialBody {
    Static {
        api_token: String,
        account_id: String,
    },
    Oauth {
        access_token: String,
        #[serde(default)]
        refresh_token: Option<String>,
        #[serde(default)]
        expires_in: Option<i64>,
    },
}

async fn save_credential(
    State(state): State<Arc<ServerState>>,
    Path((project_id, provider)): Path<(String, String)>,
    axum::Json(body): axum::Json<SaveCredentialBody>,
) -> Response {
    let Some(provider) = Provider::parse(&provider) else {
        return error_response(ForgeError::Validation(format!(
            "unknown provider '{}'",
            provider
        )));
    };

    if state
        .store
        .get_project(&project_id)
        .await
        .ok()
        .flatten()
        .is_none()
    {
        return error_response(ForgeError::ProjectNotFound(project_id));
    }

    let record = match (provider, body) {
        (
            Provider::Cloudflare,
            SaveCredentialBody::Static {
                api_token,
                account_id,
            },
        ) => {
            // Validity is checked once here with a real API call, not
            // re-checked per deployment.
            if let Err(error) = state.cloudflare.verify_token(&api_token, &account_id).await {
                return error_response(error);
            }
            CredentialRecord::StaticToken {
                api_token,
                account_id,
            }
        }
        (
            Provider::Vercel | Provider::Firebase,
            SaveCredentialBody::Oauth {
                access_token,
                refresh_token,
                expires_in,
            },
        ) => CredentialRecord::OAuth {
            access_token,
            refresh_token,
            expires_at: expires_in.map(|secs| Utc::now() + ChronoDuration::seconds(secs)),
        },
        (Provider::Subdomain, _) => {
            return error_response(ForgeError::Validation(
                "the subdomain router does not take credentials".to_string(),
            ));
        }
        _ => {
            return error_response(ForgeError::Validation(format!(
                "credential body does not match provider {}",
                provider
            )));
        }
    };

    match state
        .store
        .put_credential(provider, &project_id, &record)
        .await
    {
        Ok(()) => (
            StatusCode::OK,
            axum::Json(ApiResponse::ok(serde_json::json!({ "provider": provider }))),
        )
            .into_response(),
        Err(error) => error_response(error),
    }
}

async fn deploy_project(
    State(state): State<Arc<ServerState>>,
    Path((project_id, provider)): Path<(String, String)>,
) -> Response {
    let Some(provider) = Provider::parse(&provider) else {
        return error_response(ForgeError::Validation(format!(
            "unknown provider '{}'",
            provider
        )));
    };

    match state
        .deploy
        .run(DeploySiteRequest {
            project_id,
            provider,
        })
        .await
    {
        Ok(report) => (
            StatusCode::OK,
            axum::Json(ApiResponse::ok(serde_json::json!({
                "provider": report.provider,
                "url": report.url,
                "deployment_id": report.deployment_id,
            }))),
        )
            .into_response(),
        Err(error) => error_response(error),
    }
}

async fn project_status(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
) -> Response {
    match state.status.run(&project_id).await {
        Ok(report) => (StatusCode::OK, axum::Json(ApiResponse::ok(report))).into_response(),
        Err(error) => error_response(error),
    }
}

async fn serve_content(
    State(state): State<Arc<ServerState>>,
    Path((subdomain, path)): Path<(String, String)>,
) -> Response {
    resolve_and_respond(&state, subdomain, path).await
}

async fn serve_content_root(
    State(state): State<Arc<ServerState>>,
    Path(subdomain): Path<String>,
) -> Response {
    resolve_and_respond(&state, subdomain, String::new()).await
}

async fn resolve_and_respond(state: &ServerState, subdomain: String, path: String) -> Response {
    match state
        .resolve
        .run(ResolveContentRequest { subdomain, path })
        .await
    {
        Ok(ResolveContentOutcome::Found {
            content,
            content_type,
        }) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, content_type)],
            content,
        )
            .into_response(),
        Ok(ResolveContentOutcome::SiteNotFound) => {
            (StatusCode::NOT_FOUND, "Site Not Found").into_response()
        }
        Ok(ResolveContentOutcome::PageNotFound) => {
            (StatusCode::NOT_FOUND, "File Not Found").into_response()
        }
        Err(error) => error_response(error),
    }
}
