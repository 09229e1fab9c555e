use std::path::PathBuf;

use clap::{Parser, Subcommand};

use sitehost::control::{Command, Reply};

#[derive(Parser)]
#[command(name = "sitehost-cli")]
#[command(about = "Management CLI for sitehost", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "/tmp/sitehost.sock")]
    socket: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List applications
    List,
    /// List routed domains and their applications
    Domains,
    /// First domain routed to an application
    FirstDomain { app: String },
    /// Serve an application again
    Enable { app: String },
    /// Answer 503 for an application
    Disable { app: String },
    /// Reload one application's manifest, or all of them
    Reload { app: Option<String> },
    /// Assign a random preview domain
    TempDomain { app: String },
    /// Server status
    Info,
}

impl From<Commands> for Command {
    fn from(command: Commands) -> Self {
        match command {
            Commands::List => Command::List,
            Commands::Domains => Command::ListDomains,
            Commands::FirstDomain { app } => Command::FirstDomain(app),
            Commands::Enable { app } => Command::Enable(app),
            Commands::Disable { app } => Command::Disable(app),
            Commands::Reload { app } => Command::Reload(app),
            Commands::TempDomain { app } => Command::TempDomain(app),
            Commands::Info => Command::Info,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let command = Command::from(cli.command);
    let reply = send(&cli.socket, &command).await?;
    print_reply(reply)
}

#[cfg(unix)]
async fn send(socket: &std::path::Path, command: &Command) -> Result<Reply, Box<dyn std::error::Error>> {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::UnixStream;

    let stream = UnixStream::connect(socket)
        .await
        .map_err(|e| format!("cannot connect to {}: {e}", socket.display()))?;
    let (reader, mut writer) = stream.into_split();

    let id = std::process::id().to_string();
    writer.write_all(format!("{id} {command}\n").as_bytes()).await?;
    writer.shutdown().await?;

    let line = BufReader::new(reader)
        .lines()
        .next_line()
        .await?
        .ok_or("server closed the connection without a reply")?;
    let reply: Reply = serde_json::from_str(&line)?;
    if reply.id != id {
        return Err(format!("reply for request '{}', expected '{id}'", reply.id).into());
    }
    Ok(reply)
}

#[cfg(not(unix))]
async fn send(_socket: &std::path::Path, _command: &Command) -> Result<Reply, Box<dyn std::error::Error>> {
    Err("the control socket is only available on unix".into())
}

fn print_reply(reply: Reply) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(error) = reply.error {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
    println!("{}", serde_json::to_string_pretty(&reply.data)?);
    Ok(())
}
