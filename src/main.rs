use anyhow::Result;
use bat::PrettyPrinter;
use clap::Parser;
use cliclack::{input, spinner};
use console::style;
use std::path::PathBuf;

use tern::config::{self, Config};
use tern::conversation::ConversationLoop;
use tern::tools::ToolHandler;
use tern::transport::{Session, WebClient};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// One-shot message; omit for an interactive session
    #[arg(short, long)]
    message: Option<String>,

    /// Files to attach to the first turn (pdf, docx, txt, md)
    #[arg(short, long)]
    attach: Vec<PathBuf>,

    /// Start a fresh conversation instead of resuming a pinned one
    #[arg(long)]
    reset: bool,

    /// Comma-separated tool allow-list, overriding TERN_ALLOWED_TOOLS
    #[arg(long)]
    allow: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(allow) = &cli.allow {
        config.allowed_tools = Some(config::parse_allowed_tools(allow));
    }

    let mut session = match (&config.conversation_id, cli.reset) {
        (Some(id), false) => Session::pinned(id),
        _ => Session::new(),
    };

    let tools = ToolHandler::new(&config)?;
    let transport = WebClient::new(config)?;
    let conversation = ConversationLoop::new(transport, tools);

    if let Some(message) = &cli.message {
        let reply = conversation.run(&mut session, message, &cli.attach).await?;
        render(&reply);
        return Ok(());
    }

    println!("tern {}", style("- type \"exit\" to end the session").dim());
    println!();

    let mut attachments = cli.attach.clone();
    loop {
        let message: String = input("Message:").placeholder("").multiline().interact()?;
        if message.trim().eq_ignore_ascii_case("exit") {
            break;
        }

        let spin = spinner();
        spin.start("awaiting reply");
        let result = conversation.run(&mut session, &message, &attachments).await;
        spin.stop("");
        attachments.clear();

        match result {
            Ok(reply) => render(&reply),
            Err(err) => println!("{}", style(format!("error: {err}")).red()),
        }
        println!();
    }
    Ok(())
}

fn render(content: &str) {
    let printed = PrettyPrinter::new()
        .input_from_bytes(content.as_bytes())
        .language("markdown")
        .print();
    if printed.is_err() {
        println!("{content}");
    }
}
