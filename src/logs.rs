//! Raw webhook log browser.

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::store::RawLogFilter;
use crate::AppState;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;
/// Keeps `(page - 1) * limit` inside `i64`.
const MAX_PAGE: i64 = i64::MAX / MAX_LIMIT;

pub fn router() -> Router<AppState> {
    Router::new().route("/logs", get(list_logs))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogQuery {
    imei: Option<String>,
    endpoint: Option<String>,
    start_time: Option<String>,
    end_time: Option<String>,
    page: Option<i64>,
    limit: Option<i64>,
}

fn parse_time(field: &str, value: Option<String>) -> ApiResult<Option<DateTime<Utc>>> {
    value
        .filter(|v| !v.is_empty())
        .map(|v| {
            DateTime::parse_from_rfc3339(&v)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|_| {
                    ApiError::bad_request(format!("{field} must be an RFC 3339 timestamp"))
                })
        })
        .transpose()
}

async fn list_logs(
    State(state): State<AppState>,
    Query(query): Query<LogQuery>,
) -> ApiResult<Json<Value>> {
    let filter = RawLogFilter {
        imei: query.imei.filter(|i| !i.is_empty()),
        endpoint: query.endpoint.filter(|e| !e.is_empty() && e != "all"),
        start: parse_time("startTime", query.start_time)?,
        end: parse_time("endTime", query.end_time)?,
        page: query.page.unwrap_or(1).clamp(1, MAX_PAGE),
        limit: query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
    };

    let page = state.store.query_raw_logs(&filter).await?;
    let total_pages = (page.total + filter.limit - 1) / filter.limit;

    Ok(Json(json!({
        "data": page.items,
        "pagination": {
            "total": page.total,
            "page": filter.page,
            "limit": filter.limit,
            "totalPages": total_pages,
        },
    })))
}
