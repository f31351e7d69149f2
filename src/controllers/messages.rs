use actix_web::{web, HttpResponse, Responder};
use serde::Serialize;

use crate::models::{Message, MessageFilter, MessageView};
use crate::AppState;

#[derive(Serialize)]
pub struct MessagesResponse {
    pub result: String,
    pub messages: Vec<MessageView>,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.route(
        "/api/{bot_id}/getBotMessages",
        web::get().to(get_bot_messages),
    )
    .route(
        "/api/{username}/getUserMessages",
        web::get().to(get_user_messages),
    )
    .route("/api/{chatid}/getMessages", web::get().to(get_chat_messages))
    .route(
        "/api/filterMessages/{botid}/{time_off}/{text}/{username}/{name}",
        web::get().to(filter_messages),
    );
}

fn render(messages: Vec<Message>) -> HttpResponse {
    HttpResponse::Ok().json(MessagesResponse {
        result: "success".to_string(),
        messages: messages.into_iter().map(MessageView::from).collect(),
    })
}

fn db_failure(context: &str, e: rusqlite::Error) -> HttpResponse {
    log::error!("Failed to {}: {}", context, e);
    HttpResponse::InternalServerError().json(MessagesResponse {
        result: "failure".to_string(),
        messages: Vec::new(),
    })
}

/// Legacy wildcard: `'#'` and the empty string mean "not given".
fn non_wildcard(value: &str) -> Option<String> {
    if value.is_empty() || value == "#" {
        None
    } else {
        Some(value.to_string())
    }
}

async fn get_bot_messages(state: web::Data<AppState>, path: web::Path<i64>) -> impl Responder {
    let bot_id = path.into_inner();
    match state.db.messages_by_bot(bot_id) {
        Ok(messages) => render(messages),
        Err(e) => db_failure("fetch bot messages", e),
    }
}

async fn get_user_messages(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let username = path.into_inner();
    match state.db.messages_by_sender(&username) {
        Ok(messages) => render(messages),
        Err(e) => db_failure("fetch user messages", e),
    }
}

async fn get_chat_messages(state: web::Data<AppState>, path: web::Path<i64>) -> impl Responder {
    let chat_id = path.into_inner();
    match state.db.messages_by_chat(chat_id) {
        Ok(messages) => render(messages),
        Err(e) => db_failure("fetch chat messages", e),
    }
}

async fn filter_messages(
    state: web::Data<AppState>,
    path: web::Path<(i64, i64, String, String, String)>,
) -> impl Responder {
    let (bot_id, time_window_min, text, username, name) = path.into_inner();

    let filter = MessageFilter {
        time_window_min,
        bot_id: (bot_id > 0).then_some(bot_id),
        text: non_wildcard(&text),
        username: non_wildcard(&username),
        name: non_wildcard(&name),
    };

    match state.db.filter_messages(&filter) {
        Ok(messages) => render(messages),
        Err(e) => db_failure("filter messages", e),
    }
}
