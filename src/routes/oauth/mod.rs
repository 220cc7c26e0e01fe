use actix_web::web;

use self::{
    api::{init_handshake, token_endpoint},
    ui::{get_authorization_page, submit_authorization},
};

pub mod api;
pub mod ui;

pub fn oauth_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("oauth")
            .service(get_authorization_page)
            .service(submit_authorization)
            .service(token_endpoint)
            .service(init_handshake),
    );
}
