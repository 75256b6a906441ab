use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "enlist API",
        version = "0.1.0",
        description = "Distributes member-add jobs across worker accounts with rate-limit backoff."
    ),
    paths(
        crate::routes::get_status,
        crate::routes::list_workers,
        crate::routes::register_worker,
        crate::routes::remove_worker,
        crate::routes::start_run,
        crate::routes::stop_run,
        crate::routes::stream_events,
        crate::routes::event_history,
        crate::routes::health,
    ),
    components(schemas(
        crate::dto::RegisterWorkerRequest,
        crate::dto::WorkerResponse,
        crate::dto::WorkerListResponse,
        crate::dto::MemberInput,
        crate::dto::StartRunRequest,
        crate::dto::StartRunResponse,
        crate::dto::StopRunResponse,
        crate::dto::RunStatsResponse,
        crate::dto::StatusResponse,
        crate::dto::EventResponse,
        crate::dto::HealthResponse,
        crate::dto::ErrorResponse,
    )),
    tags(
        (name = "workers", description = "Worker account registry"),
        (name = "runs", description = "Run lifecycle and status"),
        (name = "events", description = "Event history and live stream"),
        (name = "system", description = "Health and system status"),
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Adds Bearer token security scheme to the OpenAPI spec.
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("token")
                        .description(Some(
                            "Server API key. Set via ENLIST_SERVER_API_KEY environment variable.",
                        ))
                        .build(),
                ),
            );
        }
    }
}
