use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use std::net::TcpListener;

use crate::logger::LoggerMiddleware;
use crate::middleware::SessionMiddleware;
use crate::routes::{delete_user, health_check, login, logout, refresh_token, signup};
use crate::session::SessionService;

pub fn run(
    listener: TcpListener,
    sessions: web::Data<SessionService>,
) -> Result<Server, std::io::Error> {
    let server = HttpServer::new(move || {
        App::new()
            .wrap(LoggerMiddleware)
            .app_data(sessions.clone())
            .route("/health_check", web::get().to(health_check))
            .service(
                web::scope("/api/v1/auth")
                    // Public routes
                    .route("/signup", web::post().to(signup))
                    .route("/login", web::post().to(login))
                    .route("/refresh_token", web::post().to(refresh_token))
                    // Protected routes; the session check runs only once the method matched
                    .route(
                        "/logout",
                        web::post()
                            .to(logout)
                            .wrap(SessionMiddleware::new(sessions.clone())),
                    )
                    .route(
                        "/delete_user",
                        web::delete()
                            .to(delete_user)
                            .wrap(SessionMiddleware::new(sessions.clone())),
                    ),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
