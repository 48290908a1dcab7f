/// Session Authentication Middleware
///
/// Runs `SessionService::authenticate` on every request of a protected route
/// and injects the validated `SessionPayload` into request extensions for the
/// route handlers.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::AUTHORIZATION,
    web, Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;

use crate::session::SessionService;

/// Middleware for protecting routes
///
/// Requests without a valid `Authorization: Bearer <token>` header never
/// reach the wrapped service.
pub struct SessionMiddleware {
    sessions: web::Data<SessionService>,
}

impl SessionMiddleware {
    pub fn new(sessions: web::Data<SessionService>) -> Self {
        Self { sessions }
    }
}

impl<S, B> Transform<S, ServiceRequest> for SessionMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = SessionMiddlewareService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(SessionMiddlewareService {
            service: Rc::new(service),
            sessions: self.sessions.clone(),
        }))
    }
}

pub struct SessionMiddlewareService<S> {
    service: Rc<S>,
    sessions: web::Data<SessionService>,
}

impl<S, B> Service<ServiceRequest> for SessionMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let authorization = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .map(str::to_owned);

        let sessions = self.sessions.clone();
        let service = self.service.clone();

        Box::pin(async move {
            let deadline = sessions.deadline();
            match sessions.authenticate(&deadline, authorization.as_deref()).await {
                Ok(payload) => {
                    tracing::debug!(
                        user_id = payload.user_id,
                        token_id = %payload.id,
                        "Session validated"
                    );
                    req.extensions_mut().insert(payload);
                    service.call(req).await
                }
                Err(e) => {
                    tracing::warn!(path = %req.path(), error = %e, "Authentication failed");
                    Err(e.into())
                }
            }
        })
    }
}
