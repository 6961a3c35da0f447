//! The HTTP surface: the full route table, grounded on
//! the Go fireworq daemon's `web/application.go`'s `newServer` and the handler
//! bodies in `web/{job,queue,routing,misc}.go`. Router-building shape
//! (conditional metrics layer, `with_state`) follows
//! `cyclotron-janitor/src/http.rs`.

use crate::app_context::AppContext;
use crate::error::ApiError;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use fireworq_core::{FailedJobRecord, IncomingJob, PersistentJob, QueueDefinition, Routing, SortOrder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub fn app(context: Arc<AppContext>) -> Router {
    let metrics_enabled = context.metrics_enabled;

    let router = Router::new()
        .route("/", get(index))
        .route("/version", get(index))
        .route("/settings", get(settings))
        .route("/stats", get(stats))
        .route("/job/:category", axum::routing::post(push_job))
        .route("/queues", get(queue_list))
        .route("/queues/stats", get(queue_list_stats))
        .route("/queue/:queue", get(get_queue).put(put_queue).delete(delete_queue))
        .route("/queue/:queue/node", get(queue_node))
        .route("/queue/:queue/stats", get(queue_stats))
        .route("/queue/:queue/grabbed", get(queue_grabbed))
        .route("/queue/:queue/waiting", get(queue_waiting))
        .route("/queue/:queue/deferred", get(queue_deferred))
        .route("/queue/:queue/job/:id", get(queue_job).delete(delete_queue_job))
        .route("/queue/:queue/failed", get(queue_failed))
        .route("/queue/:queue/failed/:id", get(queue_failed_job).delete(delete_queue_failed_job))
        .route("/routings", get(routing_list))
        .route("/routing/:category", get(get_routing).put(put_routing).delete(delete_routing));

    let router = if metrics_enabled {
        fireworq_metrics::setup_metrics_routes(router)
    } else {
        router
    };

    router.with_state(context)
}

async fn index(State(context): State<Arc<AppContext>>) -> String {
    format!("{}\n", context.version)
}

async fn settings(State(context): State<Arc<AppContext>>) -> Json<BTreeMap<&'static str, String>> {
    Json(context.settings.clone())
}

async fn stats(State(context): State<Arc<AppContext>>) -> Response {
    context.health.get_status().into_response()
}

#[derive(Debug, Serialize)]
struct PushResult {
    id: i64,
    queue_name: String,
    #[serde(flatten)]
    job: IncomingJob,
}

async fn push_job(
    State(context): State<Arc<AppContext>>,
    Path(category): Path<String>,
    body: axum::body::Bytes,
) -> Result<Json<PushResult>, ApiError> {
    // Deserialized directly from the request bytes (not via a generic
    // `Value` round-trip) so the `payload` field keeps its exact
    // submitted formatting.
    let mut incoming: IncomingJob =
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    incoming.category = category;
    if incoming.url.is_empty() {
        return Err(ApiError::BadRequest("Missing field: url".to_string()));
    }

    let (id, queue_name) = context.service.service().push(incoming.clone()).await?;
    Ok(Json(PushResult { id, queue_name, job: incoming }))
}

async fn queue_list(State(context): State<Arc<AppContext>>) -> Result<Json<Vec<QueueDefinition>>, ApiError> {
    let queues = context.service.service().queue_repository().find_all().await?;
    Ok(Json(queues))
}

#[derive(Debug, Serialize)]
struct Stats {
    #[serde(flatten)]
    queue: fireworq_core::QueueStats,
    #[serde(flatten)]
    dispatcher: fireworq_dispatch::DispatcherStats,
    active_nodes: i64,
}

async fn queue_list_stats(
    State(context): State<Arc<AppContext>>,
) -> Result<Json<BTreeMap<String, Stats>>, ApiError> {
    let defs = context.service.service().queue_repository().find_all().await?;
    let mut out = BTreeMap::new();
    for def in defs {
        if let Some(handle) = context.service.service().get_job_queue(&def.name).await {
            let active_nodes = if handle.is_active().await { 1 } else { 0 };
            out.insert(
                def.name,
                Stats {
                    queue: handle.queue_stats(),
                    dispatcher: handle.worker_stats().await,
                    active_nodes,
                },
            );
        }
    }
    Ok(Json(out))
}

async fn get_queue(
    State(context): State<Arc<AppContext>>,
    Path(queue): Path<String>,
) -> Result<Json<QueueDefinition>, ApiError> {
    let def = context
        .service
        .service()
        .queue_repository()
        .find_by_name(&queue)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No such queue: {queue}")))?;
    Ok(Json(def))
}

async fn put_queue(
    State(context): State<Arc<AppContext>>,
    Path(queue): Path<String>,
    body: axum::body::Bytes,
) -> Result<Json<QueueDefinition>, ApiError> {
    let mut value: serde_json::Value = if body.is_empty() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?
    };
    match value {
        serde_json::Value::Object(ref mut map) => {
            map.insert("name".to_string(), serde_json::Value::String(queue.clone()));
        }
        _ => return Err(ApiError::BadRequest("request body must be a JSON object".to_string())),
    }
    let def: QueueDefinition = serde_json::from_value(value).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    context.service.service().add_job_queue(def.clone()).await?;
    Ok(Json(def))
}

async fn delete_queue(
    State(context): State<Arc<AppContext>>,
    Path(queue): Path<String>,
) -> Result<Json<QueueDefinition>, ApiError> {
    let def = context
        .service
        .service()
        .queue_repository()
        .find_by_name(&queue)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No such queue: {queue}")))?;
    context.service.service().delete_job_queue(&queue).await?;
    Ok(Json(def))
}

async fn queue_node(
    State(context): State<Arc<AppContext>>,
    Path(queue): Path<String>,
) -> Result<Json<fireworq_core::NodeInfo>, ApiError> {
    let handle = context
        .service
        .service()
        .get_job_queue(&queue)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("No such queue: {queue}")))?;
    let node = handle.node().await.ok_or_else(|| ApiError::NotFound("No node is active for this queue".to_string()))?;
    Ok(Json(node))
}

async fn queue_stats(
    State(context): State<Arc<AppContext>>,
    Path(queue): Path<String>,
) -> Result<Json<Stats>, ApiError> {
    let handle = context
        .service
        .service()
        .get_job_queue(&queue)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("No such queue: {queue}")))?;
    let active_nodes = if handle.is_active().await { 1 } else { 0 };
    Ok(Json(Stats {
        queue: handle.queue_stats(),
        dispatcher: handle.worker_stats().await,
        active_nodes,
    }))
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    limit: Option<usize>,
    cursor: Option<String>,
}

#[derive(Debug, Serialize)]
struct InspectedJobs {
    jobs: Vec<PersistentJob>,
    next_cursor: Option<String>,
}

async fn queue_grabbed(
    State(context): State<Arc<AppContext>>,
    Path(queue): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<InspectedJobs>, ApiError> {
    let handle = context
        .service
        .service()
        .get_job_queue(&queue)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("No such queue: {queue}")))?;
    let inspector = handle.inspector().ok_or(ApiError::NotImplemented)?;
    let limit = query.limit.unwrap_or(100);
    let (jobs, next_cursor) = inspector.find_all_grabbed(limit, query.cursor.as_deref()).await?;
    Ok(Json(InspectedJobs { jobs, next_cursor }))
}

async fn queue_waiting(
    State(context): State<Arc<AppContext>>,
    Path(queue): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<InspectedJobs>, ApiError> {
    let handle = context
        .service
        .service()
        .get_job_queue(&queue)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("No such queue: {queue}")))?;
    let inspector = handle.inspector().ok_or(ApiError::NotImplemented)?;
    let limit = query.limit.unwrap_or(100);
    let (jobs, next_cursor) = inspector.find_all_waiting(limit, query.cursor.as_deref()).await?;
    Ok(Json(InspectedJobs { jobs, next_cursor }))
}

async fn queue_deferred(
    State(context): State<Arc<AppContext>>,
    Path(queue): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<InspectedJobs>, ApiError> {
    let handle = context
        .service
        .service()
        .get_job_queue(&queue)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("No such queue: {queue}")))?;
    let inspector = handle.inspector().ok_or(ApiError::NotImplemented)?;
    let limit = query.limit.unwrap_or(100);
    let (jobs, next_cursor) = inspector.find_all_deferred(limit, query.cursor.as_deref()).await?;
    Ok(Json(InspectedJobs { jobs, next_cursor }))
}

async fn queue_job(
    State(context): State<Arc<AppContext>>,
    Path((queue, id)): Path<(String, String)>,
) -> Result<Json<PersistentJob>, ApiError> {
    let id: i64 = id.parse().map_err(|_| ApiError::BadRequest("invalid job id".to_string()))?;
    let handle = context
        .service
        .service()
        .get_job_queue(&queue)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("No such queue: {queue}")))?;
    let inspector = handle.inspector().ok_or(ApiError::NotImplemented)?;
    let job = inspector.find(id).await?.ok_or_else(|| ApiError::NotFound(format!("No such job: {id}")))?;
    Ok(Json(job))
}

async fn delete_queue_job(
    State(context): State<Arc<AppContext>>,
    Path((queue, id)): Path<(String, String)>,
) -> Result<Json<PersistentJob>, ApiError> {
    let id: i64 = id.parse().map_err(|_| ApiError::BadRequest("invalid job id".to_string()))?;
    let handle = context
        .service
        .service()
        .get_job_queue(&queue)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("No such queue: {queue}")))?;
    let inspector = handle.inspector().ok_or(ApiError::NotImplemented)?;
    let job = inspector.find(id).await?.ok_or_else(|| ApiError::NotFound(format!("No such job: {id}")))?;
    inspector.delete(id).await?;
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
struct FailedQuery {
    limit: Option<usize>,
    cursor: Option<String>,
    order: Option<String>,
}

#[derive(Debug, Serialize)]
struct FailedJobs {
    jobs: Vec<FailedJobRecord>,
    next_cursor: Option<String>,
}

async fn queue_failed(
    State(context): State<Arc<AppContext>>,
    Path(queue): Path<String>,
    Query(query): Query<FailedQuery>,
) -> Result<Json<FailedJobs>, ApiError> {
    let handle = context
        .service
        .service()
        .get_job_queue(&queue)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("No such queue: {queue}")))?;
    let failure_log = handle.failure_log().ok_or(ApiError::NotImplemented)?;
    let order = if query.order.as_deref() == Some("created") {
        SortOrder::Ascending
    } else {
        SortOrder::Descending
    };
    let limit = query.limit.unwrap_or(100);
    let (jobs, next_cursor) = failure_log.find_all(limit, query.cursor.as_deref(), order).await?;
    Ok(Json(FailedJobs { jobs, next_cursor }))
}

async fn queue_failed_job(
    State(context): State<Arc<AppContext>>,
    Path((queue, id)): Path<(String, String)>,
) -> Result<Json<FailedJobRecord>, ApiError> {
    let id: i64 = id.parse().map_err(|_| ApiError::BadRequest("invalid job id".to_string()))?;
    let handle = context
        .service
        .service()
        .get_job_queue(&queue)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("No such queue: {queue}")))?;
    let failure_log = handle.failure_log().ok_or(ApiError::NotImplemented)?;
    let job = failure_log.find(id).await?.ok_or_else(|| ApiError::NotFound(format!("No such failed job: {id}")))?;
    Ok(Json(job))
}

async fn delete_queue_failed_job(
    State(context): State<Arc<AppContext>>,
    Path((queue, id)): Path<(String, String)>,
) -> Result<Json<FailedJobRecord>, ApiError> {
    let id: i64 = id.parse().map_err(|_| ApiError::BadRequest("invalid job id".to_string()))?;
    let handle = context
        .service
        .service()
        .get_job_queue(&queue)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("No such queue: {queue}")))?;
    let failure_log = handle.failure_log().ok_or(ApiError::NotImplemented)?;
    let job = failure_log.find(id).await?.ok_or_else(|| ApiError::NotFound(format!("No such failed job: {id}")))?;
    failure_log.delete(id).await?;
    Ok(Json(job))
}

async fn routing_list(State(context): State<Arc<AppContext>>) -> Result<Json<Vec<Routing>>, ApiError> {
    let routings = context.service.service().routing_repository().find_all().await?;
    Ok(Json(routings))
}

async fn get_routing(
    State(context): State<Arc<AppContext>>,
    Path(category): Path<String>,
) -> Result<Json<Routing>, ApiError> {
    let queue_name = context
        .service
        .service()
        .routing_repository()
        .find_queue_name_by_job_category(&category)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("No routing for category: {category}")))?;
    Ok(Json(Routing { job_category: category, queue_name }))
}

#[derive(Debug, Deserialize)]
struct RoutingBody {
    queue_name: String,
}

async fn put_routing(
    State(context): State<Arc<AppContext>>,
    Path(category): Path<String>,
    Json(body): Json<RoutingBody>,
) -> Result<Json<Routing>, ApiError> {
    let service = context.service.service();
    if service.queue_repository().find_by_name(&body.queue_name).await?.is_none() {
        return Err(ApiError::NotFound(format!("No such queue: {}", body.queue_name)));
    }
    service.routing_repository().add(&category, &body.queue_name).await?;
    Ok(Json(Routing { job_category: category, queue_name: body.queue_name }))
}

async fn delete_routing(
    State(context): State<Arc<AppContext>>,
    Path(category): Path<String>,
) -> Result<Json<Routing>, ApiError> {
    let repo = context.service.service().routing_repository();
    let queue_name = repo
        .find_queue_name_by_job_category(&category)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("No routing for category: {category}")))?;
    repo.delete(&category).await?;
    Ok(Json(Routing { job_category: category, queue_name }))
}
