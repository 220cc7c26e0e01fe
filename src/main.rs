use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use env_logger::Env;
use log::info;
use std::sync::Arc;
use std::time::Duration;
use tera::Tera;

use marketlink::auth::identity::{IdentityProvider, PgIdentityProvider};
use marketlink::auth::middleware::AdminKey;
use marketlink::auth::token::{OsRandom, RandomSource};
use marketlink::configuration::get_configuration;
use marketlink::database::{connect, run_migrations, PgStore};
use marketlink::oauth::OAuthServer;
use marketlink::tasks::{process_webhook_retries, purge_expired_credentials, TaskRunner};
use marketlink::utilities::{Clock, SystemClock};
use marketlink::webhook::{HttpSender, ReqwestSender, WebhookService};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();

    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let configuration = get_configuration().expect("Failed to read configuration.");

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );

    let pool = connect(&configuration.database)
        .await
        .expect("Error creating database connection");

    run_migrations(&pool)
        .await
        .expect("An error occurred while running migrations.");

    let store = Arc::new(PgStore::new(pool.clone()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let random: Arc<dyn RandomSource> = Arc::new(OsRandom);

    let sender: Arc<dyn HttpSender> = Arc::new(
        ReqwestSender::new(configuration.webhook.delivery_timeout())
            .expect("Failed to build the webhook HTTP client"),
    );

    let oauth = web::Data::new(OAuthServer::new(
        store.clone(),
        clock.clone(),
        random.clone(),
        &configuration.oauth,
    ));

    let webhooks = WebhookService::new(
        store.clone(),
        sender,
        clock.clone(),
        random,
        configuration.webhook.clone(),
    );
    let registry = web::Data::from(webhooks.registry.clone());
    let engine = web::Data::from(webhooks.engine.clone());

    let identity: Arc<dyn IdentityProvider> = Arc::new(PgIdentityProvider::new(pool.clone()));
    let identity: web::Data<dyn IdentityProvider> = web::Data::from(identity);

    let admin_key = web::Data::new(AdminKey(configuration.admin.api_key.clone()));

    let runner = TaskRunner::new();

    let retry_engine = webhooks.engine.clone();
    runner.run_task(
        "webhook retries",
        Duration::from_secs(configuration.webhook.retry_interval_secs),
        move || {
            let inner_engine = retry_engine.clone();

            async move {
                process_webhook_retries(&inner_engine).await;
            }
        },
    );

    let cleanup_store = store.clone();
    let cleanup_clock = clock.clone();
    runner.run_task(
        "credential cleanup",
        Duration::from_secs(configuration.tasks.credential_cleanup_interval_secs),
        move || {
            let inner_store = cleanup_store.clone();
            let inner_clock = cleanup_clock.clone();

            async move {
                purge_expired_credentials(inner_store.as_ref(), inner_clock.as_ref()).await;
            }
        },
    );

    info!("Starting the marketlink HTTP Server at {}", address);

    HttpServer::new(move || {
        let tera = match Tera::new("templates/**/*.html") {
            Ok(t) => t,
            Err(e) => {
                println!("Parsing error(s): {}", e);
                ::std::process::exit(1);
            }
        };

        App::new()
            .wrap(Logger::default())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header()
                    .max_age(3600),
            )
            .app_data(marketlink::routes::json_config())
            .app_data(web::Data::new(tera))
            .app_data(web::Data::new(configuration.clone()))
            .app_data(oauth.clone())
            .app_data(registry.clone())
            .app_data(engine.clone())
            .app_data(identity.clone())
            .app_data(admin_key.clone())
            .configure(marketlink::routes::oauth_config)
            .configure(marketlink::routes::webhooks_config)
            .configure(marketlink::routes::admin_config)
    })
    .bind(address)?
    .run()
    .await
}
