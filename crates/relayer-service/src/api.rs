//! HTTP API: report ingestion and feed administration.

use axum::{
	extract::{Path, State},
	http::StatusCode,
	response::{IntoResponse, Response},
	routing::{delete, get, post, put},
	Json, Router,
};
use relayer_core::{RelayerEngine, RelayerError};
use relayer_types::{Feed, FeedId};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

#[derive(Clone)]
struct AppState {
	engine: Arc<RelayerEngine>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportRequest {
	full_report: String,
}

#[derive(Debug, Deserialize)]
struct ScheduleRequest {
	interval: String,
}

pub async fn start_http_server(engine: Arc<RelayerEngine>, port: u16) -> anyhow::Result<()> {
	let app = router(engine);

	let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
	info!("API server listening on port {}", port);

	axum::serve(listener, app).await?;
	Ok(())
}

fn router(engine: Arc<RelayerEngine>) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/reports", post(ingest_report))
		.route("/feeds", get(list_feeds).post(add_feed))
		.route("/feeds/{feed_id}", delete(remove_feed))
		.route("/schedule", put(set_schedule))
		.with_state(AppState { engine })
		.layer(TraceLayer::new_for_http())
		.layer(CorsLayer::permissive())
}

fn error(status: StatusCode, message: impl ToString) -> Response {
	(
		status,
		Json(serde_json::json!({ "error": message.to_string() })),
	)
		.into_response()
}

fn relayer_error(e: RelayerError) -> Response {
	match e {
		RelayerError::Config(_) | RelayerError::Verifier(_) => error(StatusCode::BAD_REQUEST, e),
		other => {
			warn!(error = %other, "Request failed");
			error(StatusCode::INTERNAL_SERVER_ERROR, other)
		},
	}
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
	Json(serde_json::json!({
		"status": "ok",
		"name": state.engine.config().relayer.name,
	}))
}

async fn ingest_report(State(state): State<AppState>, Json(req): Json<ReportRequest>) -> Response {
	let bytes = match hex::decode(req.full_report.trim_start_matches("0x")) {
		Ok(bytes) => bytes,
		Err(e) => return error(StatusCode::BAD_REQUEST, format!("Invalid report hex: {}", e)),
	};

	match state.engine.ingest(&bytes).await {
		Ok(feed_id) => (
			StatusCode::ACCEPTED,
			Json(serde_json::json!({
				"feedId": feed_id,
				"cached": feed_id.is_some(),
			})),
		)
			.into_response(),
		Err(e) => relayer_error(e),
	}
}

async fn list_feeds(State(state): State<AppState>) -> Response {
	match state.engine.feeds().await {
		Ok(feeds) => Json(feeds).into_response(),
		Err(e) => relayer_error(e),
	}
}

async fn add_feed(State(state): State<AppState>, Json(feed): Json<Feed>) -> Response {
	match state.engine.add_feed(feed.clone()).await {
		Ok(true) => (StatusCode::CREATED, Json(feed)).into_response(),
		Ok(false) => (StatusCode::OK, Json(feed)).into_response(),
		Err(e) => relayer_error(e),
	}
}

async fn remove_feed(State(state): State<AppState>, Path(feed_id): Path<String>) -> Response {
	let feed_id: FeedId = match feed_id.parse() {
		Ok(id) => id,
		Err(e) => return error(StatusCode::BAD_REQUEST, e),
	};

	match state.engine.remove_feed(&feed_id).await {
		Ok(true) => StatusCode::NO_CONTENT.into_response(),
		Ok(false) => error(StatusCode::NOT_FOUND, format!("Feed {} is not registered", feed_id)),
		Err(e) => relayer_error(e),
	}
}

async fn set_schedule(State(state): State<AppState>, Json(req): Json<ScheduleRequest>) -> Response {
	match state.engine.set_interval(&req.interval).await {
		Ok(()) => Json(serde_json::json!({ "interval": req.interval })).into_response(),
		Err(e) => relayer_error(e),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::body::Body;
	use axum::http::Request;
	use relayer_account::AccountService;
	use relayer_core::RelayerBuilder;
	use relayer_storage::implementations::memory::MemoryStorage;
	use tower::ServiceExt;

	const FEED: &str = "0x000359843a543ee2fe414dc14c7e7920ef10f4372990b79d6361cdc0dd1ba782";

	fn app() -> Router {
		let config = relayer_config::parse("[relayer]\nname = \"api-test\"", "toml").unwrap();
		let engine = RelayerBuilder::new(config)
			.with_storage_factory(|_| Box::new(MemoryStorage::new()))
			.with_account_factory(|_| Ok(AccountService::default()))
			.build()
			.unwrap();
		router(Arc::new(engine))
	}

	fn json(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
		Request::builder()
			.method(method)
			.uri(uri)
			.header("content-type", "application/json")
			.body(Body::from(body.to_string()))
			.unwrap()
	}

	#[tokio::test]
	async fn test_health() {
		let response = app()
			.oneshot(Request::get("/health").body(Body::empty()).unwrap())
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::OK);
	}

	#[tokio::test]
	async fn test_feed_lifecycle() {
		let app = app();
		let feed = serde_json::json!({ "feedId": FEED, "name": "ETH/USD" });

		let created = app.clone().oneshot(json("POST", "/feeds", feed.clone())).await.unwrap();
		assert_eq!(created.status(), StatusCode::CREATED);

		let again = app.clone().oneshot(json("POST", "/feeds", feed)).await.unwrap();
		assert_eq!(again.status(), StatusCode::OK);

		let removed = app
			.clone()
			.oneshot(
				Request::delete(format!("/feeds/{}", FEED))
					.body(Body::empty())
					.unwrap(),
			)
			.await
			.unwrap();
		assert_eq!(removed.status(), StatusCode::NO_CONTENT);

		let missing = app
			.oneshot(
				Request::delete(format!("/feeds/{}", FEED))
					.body(Body::empty())
					.unwrap(),
			)
			.await
			.unwrap();
		assert_eq!(missing.status(), StatusCode::NOT_FOUND);
	}

	#[tokio::test]
	async fn test_rejects_bad_input() {
		let app = app();

		let report = app
			.clone()
			.oneshot(json("POST", "/reports", serde_json::json!({ "fullReport": "0xzz" })))
			.await
			.unwrap();
		assert_eq!(report.status(), StatusCode::BAD_REQUEST);

		let undecodable = app
			.clone()
			.oneshot(json("POST", "/reports", serde_json::json!({ "fullReport": "0x0102" })))
			.await
			.unwrap();
		assert_eq!(undecodable.status(), StatusCode::BAD_REQUEST);

		let schedule = app
			.oneshot(json("PUT", "/schedule", serde_json::json!({ "interval": "soon" })))
			.await
			.unwrap();
		assert_eq!(schedule.status(), StatusCode::BAD_REQUEST);
	}
}
