use std::panic;

use tracing_subscriber::EnvFilter;

use codeexec::{CodeExecutor, ExecutorConfig};

const USAGE: &str = "usage: codeexec <language> <source-file> [stdin-file]";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    set_panic_hook();

    let mut args = std::env::args().skip(1);
    let (Some(language), Some(source_path)) = (args.next(), args.next()) else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };
    let code = tokio::fs::read_to_string(&source_path).await?;
    let stdin = match args.next() {
        Some(path) => Some(tokio::fs::read_to_string(path).await?),
        None => None,
    };

    let config = ExecutorConfig::from_env()?;
    let executor = CodeExecutor::new(config);
    if language.eq_ignore_ascii_case("python") {
        executor.initialize_managed_runtime().await;
    }

    tracing::info!(%language, source = %source_path, "running program");
    let result = executor
        .run_single(&language, &code, stdin.as_deref(), None)
        .await;
    executor.dispose();

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}

fn set_panic_hook() {
    panic::set_hook(Box::new(|panic_info| {
        tracing::error!(
            message = "panic occurred",
            panic = %panic_info
        );
    }));
}
