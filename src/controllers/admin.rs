//! Maintenance endpoints: bot removal, bulk deletion and dummy-data
//! generation. Deliberately kept off the main route families.

use actix_web::{web, HttpResponse, Responder};
use serde::Serialize;

use crate::controllers::{bad_request, StatusResponse};
use crate::manager::BotRef;
use crate::AppState;

#[derive(Serialize)]
pub struct DeletedResponse {
    pub status: String,
    pub message: String,
    pub deleted: usize,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.route(
        "/api/do_not_use/delete_all_bots",
        web::delete().to(delete_all_bots),
    )
    .route(
        "/api/do_not_use/delete_all_messages",
        web::delete().to(delete_all_messages),
    )
    .route(
        "/api/private/gen_dummy_bots/{count}",
        web::post().to(gen_dummy_bots),
    )
    .route(
        "/api/private/gen_dummy_messages/{count}",
        web::post().to(gen_dummy_messages),
    )
    .route("/api/remove_bot_id/{botid}", web::delete().to(remove_bot_id))
    .route(
        "/api/remove_bot_id_cascade/{botid}",
        web::delete().to(remove_bot_id_cascade),
    )
    .route(
        "/api/remove_bot_uname/{username}",
        web::delete().to(remove_bot_uname),
    )
    .route(
        "/api/remove_bot_uname_cascade/{username}",
        web::delete().to(remove_bot_uname_cascade),
    );
}

async fn delete_all_bots(state: web::Data<AppState>) -> impl Responder {
    // Stop every worker first so no orphaned poller keeps logging.
    let stopped = state.manager.stop_all().await;
    log::warn!("delete_all_bots: stopped {} running bots", stopped.len());

    match state.db.delete_all_bots() {
        Ok(deleted) => HttpResponse::Ok().json(DeletedResponse {
            status: "success".to_string(),
            message: format!("Removed {} bots from database", deleted),
            deleted,
        }),
        Err(e) => {
            log::error!("Failed to delete all bots: {}", e);
            HttpResponse::InternalServerError().json(StatusResponse {
                status: "failure".to_string(),
                message: "Unable to delete bots.".to_string(),
            })
        }
    }
}

async fn delete_all_messages(state: web::Data<AppState>) -> impl Responder {
    match state.db.delete_all_messages() {
        Ok(deleted) => HttpResponse::Ok().json(DeletedResponse {
            status: "success".to_string(),
            message: format!("Removed {} messages from database", deleted),
            deleted,
        }),
        Err(e) => {
            log::error!("Failed to delete all messages: {}", e);
            HttpResponse::InternalServerError().json(StatusResponse {
                status: "failure".to_string(),
                message: "Unable to delete messages.".to_string(),
            })
        }
    }
}

async fn gen_dummy_bots(state: web::Data<AppState>, path: web::Path<usize>) -> impl Responder {
    let count = path.into_inner();
    let created = state.db.generate_dummy_bots(count);
    HttpResponse::Created().json(StatusResponse {
        status: "success".to_string(),
        message: format!("Generated {} dummy bots", created),
    })
}

async fn gen_dummy_messages(state: web::Data<AppState>, path: web::Path<usize>) -> impl Responder {
    let count = path.into_inner();
    let created = state.db.generate_dummy_messages(count);
    HttpResponse::Created().json(StatusResponse {
        status: "success".to_string(),
        message: format!("Generated {} dummy messages", created),
    })
}

async fn remove(state: web::Data<AppState>, bot_ref: BotRef, cascade: bool) -> HttpResponse {
    let label = bot_ref.to_string();
    match state.manager.delete_bot(bot_ref, cascade).await {
        Ok(Some((username, removed_messages))) => HttpResponse::Ok().json(DeletedResponse {
            status: "success".to_string(),
            message: format!("Removed bot {} from database", username),
            deleted: removed_messages,
        }),
        Ok(None) => bad_request(format!("No bot registered for {}", label)),
        Err(e) => {
            log::error!("Failed to remove bot {}: {}", label, e);
            HttpResponse::InternalServerError().json(StatusResponse {
                status: "failure".to_string(),
                message: format!("Unable to remove bot {}.", label),
            })
        }
    }
}

async fn remove_bot_id(state: web::Data<AppState>, path: web::Path<i64>) -> impl Responder {
    remove(state, BotRef::ById(path.into_inner()), false).await
}

async fn remove_bot_id_cascade(state: web::Data<AppState>, path: web::Path<i64>) -> impl Responder {
    remove(state, BotRef::ById(path.into_inner()), true).await
}

async fn remove_bot_uname(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    remove(state, BotRef::ByUsername(path.into_inner()), false).await
}

async fn remove_bot_uname_cascade(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    remove(state, BotRef::ByUsername(path.into_inner()), true).await
}
