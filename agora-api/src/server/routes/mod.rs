use crate::server::ServerRouter;
use agora_db::Store;
use axum::Router;

mod moderation;

pub fn routes<S: Store>() -> ServerRouter<S> {
    Router::new().merge(moderation::routes())
}
