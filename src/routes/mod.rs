mod auth;
mod health_check;

pub use auth::{delete_user, login, logout, refresh_token, signup};
pub use health_check::health_check;
