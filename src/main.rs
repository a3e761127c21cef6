use axum::{routing::get, Router};
use std::env;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{trace::TraceLayer, cors::{Any, CorsLayer}};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use axum::extract::DefaultBodyLimit;

use coursecat::blob::{BlobStore, HttpBlobStore, LocalBlobStore};
use coursecat::config::{BlobBackend, Settings};
use coursecat::notify::{LogMailer, Mailer, Notifier, SmtpMailer};
use coursecat::quiz::QuizDefaults;
use coursecat::state::AppState;
use coursecat::store::PgStore;
use coursecat::{db, routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            env::var("RUST_LOG").unwrap_or_else(|_| "coursecat=info,axum=info".into())
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;

    let pool = db::connect(&settings).await?;
    db::migrate(&pool).await?;

    let mailer: Arc<dyn Mailer> = match &settings.smtp {
        Some(smtp) => {
            tracing::info!(host = %smtp.host, "smtp notifications enabled");
            Arc::new(SmtpMailer::new(smtp)?)
        }
        None => {
            tracing::warn!("SMTP_HOST not set, emails are only logged");
            Arc::new(LogMailer)
        }
    };

    let (blobs, media_dir) = match &settings.blob {
        BlobBackend::Local => {
            let local = LocalBlobStore::new(settings.data_dir.clone(), settings.public_base_url.clone());
            let root = local.root().clone();
            tokio::fs::create_dir_all(&root).await?;
            (Arc::new(local) as Arc<dyn BlobStore>, Some(root))
        }
        BlobBackend::Http { endpoint, bucket, token } => (
            Arc::new(HttpBlobStore::new(endpoint.clone(), bucket.clone(), token.clone())) as Arc<dyn BlobStore>,
            None,
        ),
    };

    let state = AppState::new(
        Arc::new(PgStore::new(pool)),
        Notifier::new(mailer),
        blobs,
        QuizDefaults {
            pass_threshold: settings.default_pass_threshold,
            certificate_threshold: settings.default_certificate_threshold,
        },
    );

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(routes::router(state, media_dir))
        .layer(DefaultBodyLimit::max(settings.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    let addr = format!("0.0.0.0:{}", settings.port);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("listening on http://0.0.0.0:{}", settings.port);

    axum::serve(listener, app).await?;
    Ok(())
}
