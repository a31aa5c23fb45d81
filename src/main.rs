use libeufin_bank::config::Config;
use libeufin_bank::conversion::ConversionConfig;
use libeufin_bank::gc::Gc;
use libeufin_bank::http::{self, AppState};
use libeufin_bank::store::Store;

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    init_logging();

    tracing::info!("Starting LibEuFin-Bank");

    let config = Config::load()?;
    tracing::info!(
        bank = %config.bank.base_url,
        regional_currency = %config.bank.regional_currency,
        fiat_currency = %config.bank.fiat_currency,
        "Configuration loaded"
    );

    let store = Store::connect(&config.database.url).await?;
    tracing::info!("Database connected");

    store.run_migrations().await?;
    tracing::info!("Database migrations complete");

    libeufin_bank::metrics::init();

    let conversion = ConversionConfig::load_from_env(&config.bank.regional_currency, &config.bank.fiat_currency);
    if conversion.is_none() {
        tracing::warn!("no conversion rate table configured; cashin/cashout endpoints will answer NOT_IMPLEMENTED");
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    let (shutdown_tx2, shutdown_rx2) = tokio::sync::mpsc::channel::<()>(1);

    let shutdown_tx_signal = shutdown_tx.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx_signal.send(()).await;
        let _ = shutdown_tx2.send(()).await;
    });

    let gc = Gc::new(store.clone(), config.gc.clone());
    let gc_handle = tokio::spawn(async move {
        if let Err(e) = gc.run(shutdown_rx2).await {
            tracing::error!(error = %e, "GC loop error");
        }
    });

    let bind_address = config.server.bind_address.clone();
    let port = config.server.port;
    let state = AppState { store, config, conversion };
    let app = http::router(state);

    let listener = tokio::net::TcpListener::bind((bind_address.as_str(), port)).await?;
    tracing::info!(address = %bind_address, port, "Listening");

    let mut shutdown_rx = shutdown_rx;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.recv().await;
            tracing::info!("Shutting down HTTP server");
        })
        .await?;

    let _ = gc_handle.await;

    tracing::info!("LibEuFin-Bank stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,libeufin_bank=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(filter)
        .init();
}

async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
