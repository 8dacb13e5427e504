use fintech_agent_router::{Orchestrator, RouterConfig};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Interactive session on stdin; `/reset` clears the thread, `/quit` exits
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let config = RouterConfig::load()?;
    let api_key = std::env::var("GEMINI_API_KEY").unwrap_or_default();
    let orchestrator = Orchestrator::from_config(&config, api_key)?;

    let thread_id = std::env::args().nth(1).unwrap_or_else(|| "cli".to_string());
    info!(thread_id = %thread_id, "Router CLI starting");

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();

        match query {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                orchestrator.end_session(&thread_id).await?;
                println!("Session cleared.");
                continue;
            }
            _ => {}
        }

        match orchestrator.handle_turn(&thread_id, query).await {
            Ok(outcome) => {
                println!("{}", outcome.response);
                println!("  [trace: {}]", outcome.trace.join(" → "));
            }
            Err(e) => eprintln!("Turn failed: {}", e),
        }
    }

    Ok(())
}
