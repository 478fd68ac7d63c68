mod cli;

use crate::cli::{Command, LogFormatArg, StorageBackendArg, CLI};
use clap::Parser;
use snip_core::{BatchItem, Repository, ShortCode, Shortener};
use snip_generator::RandomGenerator;
use snip_shortener::{DeleteDispatcher, DispatcherSettings, ShortenerService};
use snip_storage::{InMemoryRepository, PgRepository};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

type BoxError = Box<dyn std::error::Error>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = CLI::try_parse()?;
    init_tracing(config.log_format);

    let generator = RandomGenerator::new(config.id_length)?;

    info!(
        storage_backend = %config.storage,
        id_length = generator.length(),
        user = %config.user,
        "starting snip"
    );

    match config.storage {
        StorageBackendArg::Memory => {
            run(InMemoryRepository::new(), generator, &config).await?;
        }
        StorageBackendArg::File => {
            let path = config
                .file_storage_path
                .as_ref()
                .ok_or("file storage path is required when storage backend is file")?;
            let repository = Arc::new(InMemoryRepository::open(path).await?);
            let result = run(Arc::clone(&repository), generator, &config).await;
            repository.close().await?;
            result?;
        }
        StorageBackendArg::Postgres => {
            let dsn = config
                .database_dsn
                .as_deref()
                .ok_or("database dsn is required when storage backend is postgres")?;
            let repository = PgRepository::connect(dsn).await?;
            run(repository, generator, &config).await?;
        }
    }

    Ok(())
}

fn init_tracing(format: LogFormatArg) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter);

    match format {
        LogFormatArg::Text => builder.init(),
        LogFormatArg::Json => builder.json().init(),
    }
}

async fn run<R: Repository>(
    repository: R,
    generator: RandomGenerator,
    config: &CLI,
) -> Result<(), BoxError> {
    let service = Arc::new(ShortenerService::new(repository, generator));
    let owner = config.user.as_str();

    match &config.command {
        Command::Shorten { urls } => {
            let items = urls
                .iter()
                .enumerate()
                .map(|(i, url)| BatchItem {
                    correlation_id: i.to_string(),
                    original_url: url.clone(),
                })
                .collect();

            for shortened in service.shorten_batch(items, owner).await? {
                let marker = if shortened.inserted { "" } else { " (existing)" };
                println!("{}{}", shortened.code.to_url(&config.base_url), marker);
            }
        }
        Command::Resolve { code } => {
            let code = ShortCode::new(code.as_str())?;
            println!("{}", service.resolve(&code).await?);
        }
        Command::List => {
            let mut links: Vec<_> = service.list_user(owner).await.into_iter().collect();
            links.sort_unstable();
            for (code, url) in links {
                println!("{} {}", code.to_url(&config.base_url), url);
            }
        }
        Command::Delete { codes } => {
            let codes = codes
                .iter()
                .map(|c| ShortCode::new(c.as_str()))
                .collect::<Result<Vec<_>, _>>()?;

            let dispatcher = DeleteDispatcher::new(service.clone(), DispatcherSettings::default());
            let chunks = dispatcher.dispatch(codes, owner)?;
            let aborted = dispatcher
                .shutdown(dispatcher.settings().chunk_timeout)
                .await;
            info!(chunks, aborted, "delete finished");
        }
        Command::Ping => {
            if !service.ping().await {
                return Err("storage backend is unreachable".into());
            }
            println!("ok");
        }
    }

    Ok(())
}
