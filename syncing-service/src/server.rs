use std::net::TcpListener;

use actix_web::{guard, middleware, web, App, HttpRequest, HttpResponse, HttpServer};
use serde::Deserialize;
use tokio::sync::mpsc::UnboundedSender;

const HEADER_TOKEN: &str = "X-Token";

/// Work the service loop is asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassRequest {
    Sync { until: Option<u64> },
    VerifyEvents,
}

#[derive(Debug, Default, Deserialize)]
pub struct SyncRequest {
    pub sync_to: Option<u64>,
}

fn authorized(request: &HttpRequest, secret: &str) -> bool {
    request
        .headers()
        .get(HEADER_TOKEN)
        .and_then(|h| h.to_str().ok())
        .map(|t| t == secret)
        .unwrap_or(false)
}

fn enqueue(channel: &UnboundedSender<PassRequest>, pass: PassRequest) -> HttpResponse {
    match channel.send(pass) {
        Ok(()) => HttpResponse::Ok().finish(),
        Err(e) => {
            log::error!("Unable to schedule {pass:?}: {e:?}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

async fn sync(
    request: HttpRequest,
    body: Option<web::Json<SyncRequest>>,
    secret: web::Data<String>,
    channel: web::Data<UnboundedSender<PassRequest>>,
) -> HttpResponse {
    if !authorized(&request, secret.get_ref()) {
        return HttpResponse::Unauthorized().finish();
    }

    let until = body.and_then(|body| body.into_inner().sync_to);

    enqueue(channel.get_ref(), PassRequest::Sync { until })
}

async fn verify_events(
    request: HttpRequest,
    secret: web::Data<String>,
    channel: web::Data<UnboundedSender<PassRequest>>,
) -> HttpResponse {
    if !authorized(&request, secret.get_ref()) {
        return HttpResponse::Unauthorized().finish();
    }

    enqueue(channel.get_ref(), PassRequest::VerifyEvents)
}

pub fn create(
    tcp_listener: TcpListener,
    secret: String,
    channel: UnboundedSender<PassRequest>,
) -> std::io::Result<actix_web::dev::Server> {
    let channel = web::Data::new(channel);
    let secret = web::Data::new(secret);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(secret.clone())
            .app_data(channel.clone())
            .wrap(middleware::Logger::default())
            .app_data(web::JsonConfig::default().limit(4_096))
            .service(
                web::resource("/sync")
                    .route(web::post().to(sync))
                    .route(web::route().guard(guard::Get()).to(HttpResponse::Unauthorized)),
            )
            .service(
                web::resource("/verify_events")
                    .route(web::post().to(verify_events))
                    .route(web::route().guard(guard::Get()).to(HttpResponse::Unauthorized)),
            )
    });

    let server = server.listen(tcp_listener);

    Ok(server?.disable_signals().run())
}
