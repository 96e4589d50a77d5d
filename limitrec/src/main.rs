mod cli;

use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use limitrec::browser::{BrowserBackend, ChromiumBackend};
use limitrec::classifier::UrlClassifier;
use limitrec::config::{AppConfig, Credentials};
use limitrec::logging::{self, Verbosity};
use limitrec::recorder::{
    Quality, RecordingOptions, RecordingSession, RecordingSessionController, RecordingStatus,
};
use limitrec::{deps, Error};

use crate::cli::{Args, Commands};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    match run(args).await {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            error!("Application error: {e:#}");
            eprintln!("Error: {e:#}");
            process::exit(1);
        }
    }
}

/// Returns `Ok(false)` when the command ran but did not succeed.
async fn run(args: Args) -> anyhow::Result<bool> {
    let config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    let verbosity = Verbosity::from_flags(args.verbose, args.quiet);
    let env_filter = std::env::var("RUST_LOG").ok();
    let directive = logging::initial_directive(verbosity, env_filter.as_deref(), config.log_filter.as_deref());
    let (log_config, _guard) = logging::init_logging(&config.logs_dir, &directive, config.log_retention_days)
        .context("Failed to initialize logging")?;
    let background = CancellationToken::new();
    log_config.start_retention_cleanup(background.clone());

    let result = match args.command {
        Commands::Config { show } => {
            if show {
                print!("{}", config.show()?);
            } else {
                println!("Configuration is valid. Use --show to print it.");
            }
            Ok(true)
        }
        Commands::Classify { url, json } => classify(&config, &url, json),
        Commands::Doctor { json } => doctor(&config, json).await,
        Commands::Login { headless } => login(config, headless).await,
        Commands::Record {
            url,
            password,
            headless,
            yes,
            max_retries,
            no_retry,
            timeout_minutes,
            quality,
            name,
            no_degraded,
        } => {
            let options = RecordingOptions {
                confirmed_by_user: yes,
                password,
                headless,
                timeout_minutes: timeout_minutes.unwrap_or(config.recording_timeout_minutes),
                quality: Quality::parse_lenient(&quality),
                session_name: name,
                auto_retry: !no_retry,
                max_retries: max_retries.unwrap_or(config.retry_attempts),
                retry_base_delay: Duration::from_secs(config.retry_delay_seconds),
                allow_degraded: !no_degraded,
            };
            record(config, &url, options).await
        }
    };

    background.cancel();
    result
}

fn classify(config: &AppConfig, url: &str, json: bool) -> anyhow::Result<bool> {
    let classifier = UrlClassifier::new(&config.site_base_url)?;
    let classification = classifier.classify(url);

    if json {
        println!("{}", serde_json::to_string_pretty(&classification)?);
    } else {
        println!("URL:          {}", classification.normalized_url);
        println!("Kind:         {}", classification.kind);
        println!(
            "Channel:      {}",
            classification.channel.as_deref().unwrap_or("-")
        );
        println!("Restrictions: {}", classification.restrictions);
        if let Some(error) = &classification.error {
            println!("Problem:      {error}");
        }
    }
    Ok(classification.is_recordable())
}

async fn doctor(config: &AppConfig, json: bool) -> anyhow::Result<bool> {
    let statuses = deps::probe_all(config).await;
    let healthy = statuses.iter().all(|s| s.is_available() || !s.required);

    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
    } else {
        for status in &statuses {
            let marker = match (status.is_available(), status.required) {
                (true, _) => "ok",
                (false, true) => "MISSING",
                (false, false) => "missing (optional)",
            };
            let detail = status
                .version
                .as_deref()
                .or(status.error.as_deref())
                .unwrap_or_default();
            println!("{:<10} {:<20} {} [{}]", status.name, marker, detail, status.program);
        }
    }
    Ok(healthy)
}

fn build_controller(config: AppConfig) -> anyhow::Result<RecordingSessionController> {
    let backend: Arc<dyn BrowserBackend> = Arc::new(ChromiumBackend::new(config.chrome_executable.clone()));
    let webdriver_url = config.webdriver_url.clone();
    let mut builder = RecordingSessionController::builder(config, backend).credentials(Credentials::from_env());

    match webdriver_url {
        #[cfg(feature = "webdriver")]
        Some(url) => {
            builder = builder.fallback(Arc::new(limitrec::browser::WebDriverBackend::new(url)));
        }
        #[cfg(not(feature = "webdriver"))]
        Some(url) => warn!(url, "WebDriver fallback configured but this build lacks the webdriver feature"),
        None => {}
    }

    Ok(builder.build()?)
}

async fn login(config: AppConfig, headless: bool) -> anyhow::Result<bool> {
    let controller = build_controller(config)?;
    let credentials = controller.credential_session();
    match credentials.login(headless).await {
        Ok(snapshot) => {
            info!(cookies = snapshot.len(), path = %credentials.netscape_path().display(), "Login succeeded");
            println!("Logged in, {} cookies cached.", snapshot.len());
            Ok(true)
        }
        Err(e) => {
            error!(error = %e, "Login failed");
            eprintln!("Login failed: {e}");
            Ok(false)
        }
    }
}

async fn confirm(url: &str) -> anyhow::Result<bool> {
    let prompt = format!("Record {url}? Only record streams you are entitled to access. [y/N] ");
    tokio::task::spawn_blocking(move || {
        use std::io::Write;
        print!("{prompt}");
        std::io::stdout().flush()?;
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        Ok::<_, std::io::Error>(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
    })
    .await?
    .context("Failed to read confirmation")
}

async fn record(config: AppConfig, url: &str, mut options: RecordingOptions) -> anyhow::Result<bool> {
    config.ensure_directories()?;
    let version = deps::ensure_capture_tool(&config).await?;
    info!(binary = %config.capture_binary, version = %version, "Capture tool available");

    if !options.confirmed_by_user {
        options.confirmed_by_user = confirm(url).await?;
    }

    let controller = build_controller(config)?;
    let id = match controller.start(url, options) {
        Ok(id) => id,
        Err(Error::ConfirmationRequired(_)) => {
            println!("Recording not confirmed.");
            return Ok(false);
        }
        Err(e) => return Err(e.into()),
    };

    let stopper = controller.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, stopping recording");
            if let Err(e) = stopper.stop(id) {
                warn!(error = %e, "Stop request failed");
            }
        }
    });

    let session = controller.wait(id).await?;
    ctrl_c.abort();
    controller.shutdown().await;

    print_summary(&session);
    Ok(matches!(
        session.status,
        RecordingStatus::Completed | RecordingStatus::Stopped
    ))
}

fn print_summary(session: &RecordingSession) {
    println!("Session:  {}", session.id);
    println!("Channel:  {}", session.channel);
    println!("Status:   {}", session.status);
    println!("Attempts: {}", session.attempt);
    println!("Duration: {}s", session.duration().num_seconds());
    if session.degraded {
        println!("Mode:     degraded (page URL passed to the capture tool)");
    }
    if let Some(path) = &session.final_path {
        println!("Output:   {}", path.display());
    }
    if let Some(error) = &session.last_error {
        println!("Error:    {error}");
    }
}
