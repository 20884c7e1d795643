use crate::api::model::{reject, ApiError, ApiSettings, ErrorBody, ListQuery};
use crate::repository::Repository;
use chrono::Utc;
use log::{info, warn};
use minewatchcore::http::DEFAULT_ACTOR;
use minewatchcore::model::{AssignmentRequest, NewDetection, NoteRequest, StatusUpdate};
use serde::de::DeserializeOwned;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use warp::http::StatusCode;
use warp::sse::Event;
use warp::{Filter, Rejection, Reply};

const MAX_BODY_BYTES: u64 = 16 * 1024;

/// Every endpoint of the detection service, with rejections rendered as
/// `{"error": ...}` bodies.
pub fn routes(
    repo: Arc<Repository>,
    settings: ApiSettings,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let repo_filter = warp::any().map(move || repo.clone());
    let settings_filter = warp::any().map(move || settings);

    let changes = warp::path!("detections" / "changes")
        .and(warp::get())
        .and(repo_filter.clone())
        .and(settings_filter.clone())
        .map(|repo: Arc<Repository>, settings: ApiSettings| {
            let stream = change_stream(&repo);
            info!(
                "change feed subscriber connected ({} active)",
                repo.subscriber_count()
            );
            warp::sse::reply(
                warp::sse::keep_alive()
                    .interval(settings.keep_alive)
                    .stream(stream),
            )
        });

    let list = warp::path!("detections")
        .and(warp::get())
        .and(warp::query::<ListQuery>())
        .and(repo_filter.clone())
        .and(settings_filter)
        .map(
            |query: ListQuery, repo: Arc<Repository>, settings: ApiSettings| {
                warp::reply::json(&repo.list(settings.effective_limit(query.limit)))
            },
        );

    let ingest = warp::path!("detections")
        .and(warp::post())
        .and(json_body::<NewDetection>())
        .and(repo_filter.clone())
        .and_then(ingest);

    let stats = warp::path!("detection_stats")
        .and(warp::get())
        .and(repo_filter.clone())
        .map(|repo: Arc<Repository>| warp::reply::json(&repo.stats(Utc::now())));

    let get_one = warp::path!("detections" / String)
        .and(warp::get())
        .and(repo_filter.clone())
        .and_then(|id: String, repo: Arc<Repository>| async move {
            let detection = repo.get(&id).map_err(reject)?;
            Ok::<_, Rejection>(warp::reply::json(&detection))
        });

    let delete = warp::path!("detections" / String)
        .and(warp::delete())
        .and(repo_filter.clone())
        .and_then(|id: String, repo: Arc<Repository>| async move {
            let removed = repo.delete(&id).map_err(reject)?;
            info!("deleted {}", removed.id);
            Ok::<_, Rejection>(warp::reply::json(&removed))
        });

    let status = warp::path!("detections" / String / "status")
        .and(warp::put())
        .and(json_body::<StatusUpdate>())
        .and(repo_filter.clone())
        .and_then(update_status);

    let add_note = warp::path!("detections" / String / "notes")
        .and(warp::post())
        .and(json_body::<NoteRequest>())
        .and(repo_filter.clone())
        .and_then(add_note);

    let notes = warp::path!("detections" / String / "notes")
        .and(warp::get())
        .and(repo_filter.clone())
        .and_then(|id: String, repo: Arc<Repository>| async move {
            let notes = repo.notes(&id).map_err(reject)?;
            Ok::<_, Rejection>(warp::reply::json(&notes))
        });

    let assign = warp::path!("detections" / String / "assignment")
        .and(warp::post())
        .and(json_body::<AssignmentRequest>())
        .and(repo_filter.clone())
        .and_then(assign);

    let timeline = warp::path!("detections" / String / "timeline")
        .and(warp::get())
        .and(repo_filter)
        .and_then(|id: String, repo: Arc<Repository>| async move {
            let timeline = repo.timeline(&id).map_err(reject)?;
            Ok::<_, Rejection>(warp::reply::json(&timeline))
        });

    changes
        .or(list)
        .or(ingest)
        .or(stats)
        .or(get_one)
        .or(delete)
        .or(status)
        .or(add_note)
        .or(notes)
        .or(assign)
        .or(timeline)
        .recover(handle_rejection)
}

fn json_body<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: DeserializeOwned + Send,
{
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

/// Change events as SSE frames named after their kind, with ids counting up
/// from 1 per subscriber. A lagging subscriber skips what it missed; its poll
/// loop catches up.
fn change_stream(repo: &Repository) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    let mut seq: u64 = 0;
    BroadcastStream::new(repo.subscribe()).filter_map(move |change| match change {
        Ok(change) => match Event::default().event(change.kind.as_str()).json_data(&change) {
            Ok(event) => {
                seq += 1;
                Some(Ok(event.id(seq.to_string())))
            }
            Err(err) => {
                warn!("dropping change {}: {}", change.id, err);
                None
            }
        },
        Err(BroadcastStreamRecvError::Lagged(missed)) => {
            warn!("change feed subscriber lagged, skipped {} events", missed);
            None
        }
    })
}

async fn ingest(new: NewDetection, repo: Arc<Repository>) -> Result<impl Reply, Rejection> {
    let detection = repo.insert(new).map_err(reject)?;
    info!("recorded {} at {}", detection.id, detection.location);
    Ok(warp::reply::with_status(
        warp::reply::json(&detection),
        StatusCode::CREATED,
    ))
}

async fn update_status(
    id: String,
    body: StatusUpdate,
    repo: Arc<Repository>,
) -> Result<impl Reply, Rejection> {
    let actor = body.actor.unwrap_or_else(|| DEFAULT_ACTOR.to_owned());
    let updated = repo
        .update_status(&id, body.status, &actor)
        .map_err(reject)?;
    Ok(warp::reply::json(&updated))
}

async fn add_note(
    id: String,
    body: NoteRequest,
    repo: Arc<Repository>,
) -> Result<impl Reply, Rejection> {
    let author = body.author.unwrap_or_else(|| DEFAULT_ACTOR.to_owned());
    let note = repo.add_note(&id, &body.content, &author).map_err(reject)?;
    Ok(warp::reply::with_status(
        warp::reply::json(&note),
        StatusCode::CREATED,
    ))
}

async fn assign(
    id: String,
    body: AssignmentRequest,
    repo: Arc<Repository>,
) -> Result<impl Reply, Rejection> {
    let actor = body.actor.unwrap_or_else(|| DEFAULT_ACTOR.to_owned());
    let updated = repo.assign(&id, &body.user_id, &actor).map_err(reject)?;
    Ok(warp::reply::json(&updated))
}

async fn handle_rejection(rejection: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if let Some(err) = rejection.find::<ApiError>() {
        (err.status(), err.0.to_string())
    } else if let Some(err) = rejection.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, err.to_string())
    } else if let Some(err) = rejection.find::<warp::reject::InvalidQuery>() {
        (StatusCode::BAD_REQUEST, err.to_string())
    } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "request body too large".to_owned())
    } else if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, "route not found".to_owned())
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_owned())
    } else {
        warn!("unhandled rejection: {:?}", rejection);
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_owned())
    };
    Ok(warp::reply::with_status(
        warp::reply::json(&ErrorBody { error: message }),
        status,
    ))
}
