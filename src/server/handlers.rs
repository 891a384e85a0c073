use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use super::AppState;
use super::auth::SignedRequest;
use super::dto::{
    CommitDetail, ListCommitsParams, PublishRequest, PublishResponse, RenameRepoRequest,
    RenameRepoResponse,
};
use super::response::{ApiError, ApiResponse, ResultExt};
use super::validation::validate_repo_name;

const DEFAULT_COMMIT_LIMIT: usize = 50;
const MAX_COMMIT_LIMIT: usize = 500;

pub async fn publish(
    State(state): State<Arc<AppState>>,
    request: SignedRequest,
) -> impl IntoResponse {
    state
        .gateway
        .authorize(&request.key_id, &request.signature, &request.payload)?;

    let req: PublishRequest = serde_json::from_slice(&request.body)
        .map_err(|e| ApiError::bad_request(format!("Invalid publish request: {e}")))?;
    req.packet
        .validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    validate_repo_name(&req.packet.repo_name)?;

    let channel = req
        .channel
        .unwrap_or_else(|| state.gateway.config().default_channel.clone());
    let bytes = req.packet.to_wire().map_err(ApiError::from)?.len() as i64;
    let repo_name = req.packet.repo_name.clone();

    // Posting blocks on the network
    let gateway = state.gateway.clone();
    let publish_channel = channel.clone();
    let accepted = tokio::task::spawn_blocking(move || {
        gateway.handle_publish(
            &request.key_id,
            &request.signature,
            &request.payload,
            &req.packet,
            Some(&publish_channel),
        )
    })
    .await
    .map_err(|e| ApiError::internal(format!("Publish task failed: {e}")))??;

    let status = if accepted {
        StatusCode::CREATED
    } else {
        StatusCode::BAD_GATEWAY
    };

    Ok::<_, ApiError>((
        status,
        Json(ApiResponse::success(PublishResponse {
            accepted,
            repo_name,
            channel,
            bytes,
        })),
    ))
}

pub async fn list_repos(
    State(state): State<Arc<AppState>>,
    request: SignedRequest,
) -> impl IntoResponse {
    let gateway = state.gateway.as_ref();
    gateway.authenticate(&request.key_id, &request.signature, &request.payload)?;

    let repos = gateway
        .list_owned_repos(&request.key_id)
        .api_err("Failed to list repos")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(repos)))
}

pub async fn release_repo(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    request: SignedRequest,
) -> impl IntoResponse {
    let gateway = state.gateway.as_ref();
    gateway.authenticate(&request.key_id, &request.signature, &request.payload)?;

    if !gateway
        .release_repo(&request.key_id, &name)
        .api_err("Failed to release repo")?
    {
        return Err(ApiError::not_found("Repository not owned by this key"));
    }

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

pub async fn rename_repo(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    request: SignedRequest,
) -> impl IntoResponse {
    let gateway = state.gateway.as_ref();
    gateway.authenticate(&request.key_id, &request.signature, &request.payload)?;

    let req: RenameRepoRequest = serde_json::from_slice(&request.body)
        .map_err(|e| ApiError::bad_request(format!("Invalid rename request: {e}")))?;
    validate_repo_name(&req.new_name)?;

    if !gateway.rename_repo(&request.key_id, &name, &req.new_name)? {
        return Err(ApiError::not_found("Repository not owned by this key"));
    }

    Ok::<_, ApiError>(Json(ApiResponse::success(RenameRepoResponse {
        old_name: name,
        new_name: req.new_name,
    })))
}

pub async fn list_commits(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListCommitsParams>,
) -> impl IntoResponse {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_COMMIT_LIMIT)
        .clamp(1, MAX_COMMIT_LIMIT);

    let mut commits = state
        .index
        .list_commits(params.repo.as_deref())
        .api_err("Failed to list commits")?;
    commits.truncate(limit);

    Ok::<_, ApiError>(Json(ApiResponse::success(commits)))
}

pub async fn get_commit(
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<String>,
) -> impl IntoResponse {
    let record = state
        .index
        .get_commit(&message_id)
        .api_err("Failed to get commit")?
        .ok_or_else(|| ApiError::not_found("Commit not found"))?;

    let packet = record.packet().api_err("Stored packet is unreadable")?;
    let files = packet.files.keys().cloned().collect();

    Ok::<_, ApiError>(Json(ApiResponse::success(CommitDetail { record, files })))
}
