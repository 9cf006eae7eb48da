use clap::Parser;
use log::{error, info};
use tokio::io::{AsyncBufReadExt, BufReader};

use blaster::{Blaster, ChatMessage, RequestOptions};

#[derive(Parser)]
#[command(name = "llm-blaster")]
#[command(about = "Fan chat completions out over a pool of deployments")]
struct Cli
{   /// JSON config listing the deployments
    #[arg(short, long)]
    config: String

  , /// Worker count; overrides the config file
    #[arg(short, long)]
    workers: Option<usize>

  , /// Optional system prompt sent before every line
    #[arg(long)]
    system: Option<String>

  , /// Request streamed responses
    #[arg(long)]
    stream: bool
}

/// Reads one prompt per stdin line and prints one response per line,
/// in input order.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>>
{   env_logger::init();
    let cli = Cli::parse();

    let blaster = Blaster::from_config_file(&cli.config, cli.workers)?;
    let options = RequestOptions
    {   stream: cli.stream
      , ..RequestOptions::default()
    };

    let mut handles = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await?
    {   if line.trim().is_empty()
        {   continue;
        }
        let mut messages = Vec::new();
        if let Some(system) = &cli.system
        {   messages.push(ChatMessage::system(system.clone()));
        }
        messages.push(ChatMessage::user(line));
        handles.push(
          blaster.submit_chat_completion(messages, options.clone())?
        );
    }
    info!("Submitted {} prompts", handles.len());

    let mut failures = 0usize;
    for handle in handles
    {   match handle.await
        {   Ok(text) => println!("{}", text.replace('\n', " "))
          , Err(e) => {
              failures += 1;
              error!("Request failed: {}", e);
              println!();
            }
        }
    }

    for report in blaster.report()
    {   info!("{}", serde_json::to_string(&report)?);
    }
    blaster.close(true).await;

    if failures > 0
    {   error!("{} requests failed", failures);
    }
    Ok(())
}
