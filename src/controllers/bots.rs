use actix_web::{web, HttpResponse, Responder};
use serde::Serialize;

use crate::controllers::{bad_request, BulkResponse, ResultResponse, StatusResponse};
use crate::manager::{BotRef, LifecycleError, StartOutcome, StopOutcome};
use crate::models::BotResponse;
use crate::AppState;

#[derive(Serialize)]
pub struct BotsListResponse {
    pub result: String,
    pub bots: Vec<BotResponse>,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/getAllBots", web::get().to(get_all_bots))
        .route("/api/addbot/{token}/{test}", web::post().to(add_bot))
        .route("/api/startbot/{botid}/{username}", web::put().to(start_bot))
        .route("/api/stopbot/{botid}/{username}", web::put().to(stop_bot))
        .route("/api/startall", web::put().to(start_all))
        .route("/api/stopall", web::put().to(stop_all));
}

/// Translate the legacy wildcard pair into a typed reference: a positive id
/// wins over the username, `'#'` means "not given".
fn parse_bot_ref(bot_id: i64, username: &str) -> Result<BotRef, HttpResponse> {
    if username != "#" && !username.is_empty() && username.chars().all(|c| c.is_ascii_digit()) {
        return Err(bad_request(
            "username must not be numeric; pass the id in the botid segment",
        ));
    }
    if bot_id > 0 {
        Ok(BotRef::ById(bot_id))
    } else if username != "#" && !username.is_empty() {
        Ok(BotRef::ByUsername(username.to_string()))
    } else {
        Err(bad_request("neither a bot id nor a username was provided"))
    }
}

/// Name used in human-readable responses: the username when given, the id
/// otherwise.
fn display_name(bot_id: i64, username: &str) -> String {
    if username != "#" && !username.is_empty() {
        username.to_string()
    } else {
        bot_id.to_string()
    }
}

async fn get_all_bots(state: web::Data<AppState>) -> impl Responder {
    match state.db.list_bots() {
        Ok(bots) => {
            let registry = state.manager.registry();
            let bots: Vec<BotResponse> = bots
                .into_iter()
                .map(|bot| {
                    let running = registry.is_running(bot.bot_id);
                    BotResponse::from(bot).with_running(running)
                })
                .collect();
            HttpResponse::Ok().json(BotsListResponse {
                result: "success".to_string(),
                bots,
            })
        }
        Err(e) => {
            log::error!("Failed to list bots: {}", e);
            HttpResponse::InternalServerError().json(BotsListResponse {
                result: "failure".to_string(),
                bots: Vec::new(),
            })
        }
    }
}

async fn add_bot(state: web::Data<AppState>, path: web::Path<(String, i32)>) -> impl Responder {
    let (token, test) = path.into_inner();

    if token.chars().all(|c| c.is_ascii_digit()) {
        return bad_request("the provided token is not a valid bot token");
    }
    let testing = test > 0;

    match state.manager.add_bot(&token, testing).await {
        Ok(added) => {
            let status = if added.started { "success" } else { "ok" };
            HttpResponse::Created().json(StatusResponse {
                status: status.to_string(),
                message: format!("Bot {} added to database", added.username),
            })
        }
        Err(
            e @ (LifecycleError::InvalidArgument(_)
            | LifecycleError::InvalidToken(_)
            | LifecycleError::AlreadyExists),
        ) => bad_request(format!("Unable to add Bot. Reason:{}", e)),
        Err(LifecycleError::Database(e)) => {
            log::error!("Failed to add bot: {}", e);
            HttpResponse::InternalServerError().json(StatusResponse {
                status: "failure".to_string(),
                message: "Unable to add Bot.".to_string(),
            })
        }
    }
}

async fn start_bot(state: web::Data<AppState>, path: web::Path<(i64, String)>) -> impl Responder {
    let (bot_id, username) = path.into_inner();
    let bot_ref = match parse_bot_ref(bot_id, &username) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let name = display_name(bot_id, &username);

    match state.manager.start_bot(bot_ref).await {
        Ok(outcome @ StartOutcome::Started) => HttpResponse::Ok().json(ResultResponse {
            result: outcome.code(),
            message: format!("Bot {} started polling.", name),
        }),
        Ok(StartOutcome::NotFound) => {
            bad_request(format!("Unable to find bot {} in database.", name))
        }
        Ok(StartOutcome::TestBot) => {
            bad_request(format!("Testbot bot:{} can not start polling", name))
        }
        Ok(outcome @ StartOutcome::Internal) => HttpResponse::NotModified().json(ResultResponse {
            result: outcome.code(),
            message: format!("Unable to start polling for bot {}.", name),
        }),
        Err(e @ LifecycleError::InvalidToken(_)) => {
            bad_request(format!("Unable to start polling for bot {}. Reason:{}", name, e))
        }
        Err(e) => {
            log::error!("Failed to start bot {}: {}", name, e);
            HttpResponse::InternalServerError().json(StatusResponse {
                status: "failure".to_string(),
                message: format!("Unable to start polling for bot {}.", name),
            })
        }
    }
}

async fn stop_bot(state: web::Data<AppState>, path: web::Path<(i64, String)>) -> impl Responder {
    let (bot_id, username) = path.into_inner();
    let bot_ref = match parse_bot_ref(bot_id, &username) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let name = display_name(bot_id, &username);

    match state.manager.stop_bot(bot_ref).await {
        Ok(outcome @ StopOutcome::Stopped) => HttpResponse::Ok().json(ResultResponse {
            result: outcome.code(),
            message: format!("Bot {} stopped polling.", name),
        }),
        Ok(StopOutcome::NotFound) => {
            bad_request(format!("Unable to find bot {} in database.", name))
        }
        Ok(StopOutcome::NeverStarted { .. }) => {
            bad_request(format!("Bot {} has never started for polling.", name))
        }
        Ok(outcome @ StopOutcome::Internal) => HttpResponse::NotModified().json(ResultResponse {
            result: outcome.code(),
            message: format!("Unable to stop polling for bot {}.", name),
        }),
        Err(e) => {
            log::error!("Failed to stop bot {}: {}", name, e);
            HttpResponse::InternalServerError().json(StatusResponse {
                status: "failure".to_string(),
                message: format!("Unable to stop polling for bot {}.", name),
            })
        }
    }
}

async fn start_all(state: web::Data<AppState>) -> impl Responder {
    let ids = state.manager.start_all().await;
    HttpResponse::Ok().json(BulkResponse {
        result: "ok".to_string(),
        message: format!("Started polling for {} bots", ids.len()),
        ids,
    })
}

async fn stop_all(state: web::Data<AppState>) -> impl Responder {
    let ids = state.manager.stop_all().await;
    if ids.is_empty() {
        return HttpResponse::InternalServerError().json(BulkResponse {
            result: "failure".to_string(),
            message: "No bots were stopped".to_string(),
            ids,
        });
    }
    HttpResponse::Ok().json(BulkResponse {
        result: "success".to_string(),
        message: format!("Stopped polling for {} bots", ids.len()),
        ids,
    })
}
