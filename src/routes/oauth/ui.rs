use actix_web::{get, http::header, post, web, Error, HttpResponse};
use log::error;
use url::Url;

use crate::{
    auth::{
        identity::IdentityProvider,
        schemas::{AuthorizeForm, AuthorizeQuery},
    },
    database::models::UserType,
    errors::{ApiError, ErrorBody},
    oauth::{ClientRegistry, NewAuthorizationCode, OAuthServer},
};

/// Values echoed back into the login form.
#[derive(Default)]
struct LoginPage<'a> {
    client_id: &'a str,
    redirect_uri: &'a str,
    scope: Option<&'a str>,
    state: Option<&'a str>,
    client_name: Option<&'a str>,
    error: Option<&'a str>,
}

fn render_login(tmpl: &tera::Tera, page: LoginPage<'_>) -> Result<String, Error> {
    let mut ctx = tera::Context::new();
    ctx.insert("client_id", page.client_id);
    ctx.insert("redirect_uri", page.redirect_uri);
    ctx.insert("scope", &page.scope.unwrap_or_default());
    ctx.insert("state", &page.state.unwrap_or_default());
    ctx.insert("client_name", &page.client_name);
    ctx.insert("error", &page.error);

    tmpl.render("login.html", &ctx)
        .map_err(|_| actix_web::error::ErrorInternalServerError("Template error"))
}

/// A submitted field, treating empty strings as missing.
fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn oauth_error(err: ApiError) -> HttpResponse {
    HttpResponse::BadRequest().json(ErrorBody::from(&err))
}

#[get("/authorize")]
pub async fn get_authorization_page(
    tmpl: web::Data<tera::Tera>,
    server: web::Data<OAuthServer>,
    query: web::Query<AuthorizeQuery>,
) -> Result<HttpResponse, Error> {
    let query = query.into_inner();

    let (client_id, redirect_uri, response_type) =
        match (&query.client_id, &query.redirect_uri, &query.response_type) {
            (Some(c), Some(r), Some(t)) if !c.is_empty() && !r.is_empty() && !t.is_empty() => {
                (c, r, t)
            }
            _ => {
                return Ok(oauth_error(ApiError::InvalidRequest(
                    "Missing required parameters: client_id, redirect_uri, response_type"
                        .to_string(),
                )))
            }
        };

    if response_type != "code" {
        return Ok(oauth_error(ApiError::UnsupportedResponseType(
            "Only response_type=code is supported".to_string(),
        )));
    }

    let client = match server.clients.validate_client_by_id(client_id).await? {
        Some(client) => client,
        None => {
            return Ok(oauth_error(ApiError::InvalidClient(
                "Unknown client_id".to_string(),
            )))
        }
    };

    if !ClientRegistry::validate_redirect_uri(&client, redirect_uri) {
        return Ok(oauth_error(ApiError::InvalidRequest(
            "Invalid redirect_uri".to_string(),
        )));
    }

    let rendered_html = render_login(
        &tmpl,
        LoginPage {
            client_id,
            redirect_uri,
            scope: query.scope.as_deref(),
            state: query.state.as_deref(),
            client_name: Some(&client.name),
            error: None,
        },
    )?;

    Ok(HttpResponse::Ok()
        .content_type("text/html")
        .body(rendered_html))
}

#[post("/authorize")]
pub async fn submit_authorization(
    tmpl: web::Data<tera::Tera>,
    server: web::Data<OAuthServer>,
    identity: web::Data<dyn IdentityProvider>,
    form: web::Form<AuthorizeForm>,
) -> Result<HttpResponse, Error> {
    let form = form.into_inner();

    let rerender = |message: &str| -> Result<HttpResponse, Error> {
        let rendered_html = render_login(
            &tmpl,
            LoginPage {
                client_id: form.client_id.as_deref().unwrap_or_default(),
                redirect_uri: form.redirect_uri.as_deref().unwrap_or_default(),
                scope: form.scope.as_deref(),
                state: form.state.as_deref(),
                error: Some(message),
                ..LoginPage::default()
            },
        )?;

        Ok(HttpResponse::BadRequest()
            .content_type("text/html")
            .body(rendered_html))
    };

    let (client_id, redirect_uri, email, password) = match (
        present(&form.client_id),
        present(&form.redirect_uri),
        present(&form.email),
        present(&form.password),
    ) {
        (Some(c), Some(r), Some(e), Some(p)) if present(&form.response_type).is_some() => {
            (c, r, e, p)
        }
        _ => return rerender("Missing required fields"),
    };

    if form.response_type.as_deref() != Some("code") {
        return rerender("Only response_type=code is supported");
    }

    let user_type = match form.user_type.as_deref().map(str::parse::<UserType>) {
        Some(Ok(user_type)) => user_type,
        _ => return rerender("Invalid user type"),
    };

    let client = match server.clients.validate_client_by_id(client_id).await? {
        Some(client) => client,
        None => return rerender("Invalid client"),
    };

    if !ClientRegistry::validate_redirect_uri(&client, redirect_uri) {
        return rerender("Invalid redirect URI");
    }

    let user = match identity.authenticate(email, password, user_type).await {
        Ok(Some(user)) => user,
        Ok(None) => return rerender("Invalid email or password"),
        Err(e) => {
            error!("Identity check failed: {}", e);
            return rerender("Authentication failed");
        }
    };

    let code = server
        .codes
        .create_authorization_code(NewAuthorizationCode {
            client_id: client_id.to_string(),
            user_id: user.user_id,
            user_type: user.user_type,
            redirect_uri: redirect_uri.to_string(),
            scope: form.scope.clone(),
            state: form.state.clone(),
        })
        .await?;

    let mut location = match Url::parse(redirect_uri) {
        Ok(url) => url,
        Err(_) => return rerender("Invalid redirect URI"),
    };
    {
        let mut pairs = location.query_pairs_mut();
        pairs.append_pair("code", &code);
        if let Some(state) = present(&form.state) {
            pairs.append_pair("state", state);
        }
    }

    Ok(HttpResponse::Found()
        .insert_header((header::LOCATION, location.to_string()))
        .finish())
}
