/// Middleware module
///
/// Session authentication for protected routes.

mod session_middleware;

pub use session_middleware::SessionMiddleware;
