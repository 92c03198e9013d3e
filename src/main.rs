/// idstream - resolve persistent identifiers from the command line
///
/// Prints one JSON record per argument. Unrecognized identifiers are logged
/// and make the process exit non-zero.
use idstream::{detect, Config, Context, IdResult};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> IdResult<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(config.logging.env_filter()?)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        eprintln!("usage: idstream <identifier>...");
        std::process::exit(2);
    }

    let ctx = Arc::new(Context::new(&config)?);
    info!("resolving {} identifiers", args.len());

    let mut failed = false;
    for raw in &args {
        let mut stream = match detect(ctx.clone(), raw) {
            Ok(stream) => stream,
            Err(e) => {
                error!("{}", e);
                failed = true;
                continue;
            }
        };

        let record = stream.as_record(true).await;
        println!("{}", serde_json::to_string(&record)?);
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}
