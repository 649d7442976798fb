use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::BufReader;

use secure_echo::client::{compose_client_options, HttpPinger, RpcConnection};
use secure_echo::config::{ClientArgs, LogFormat, ServerArgs};
use secure_echo::lifecycle::LifecycleController;
use secure_echo::observability::init_logging;
use secure_echo::server::{compose_server_options, EchoServer};
use secure_echo::shell::Exerciser;
use secure_echo::version;

#[derive(Parser, Debug)]
#[command(name = "secure-echo")]
#[command(about = "Sample echo service with TLS, authentication and an HTTP gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the echo server
    Server(ServerArgs),
    /// Open an interactive client session
    Client(ClientArgs),
    /// Show build information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Server(args) => {
            init_logging(args.log_format());
            run_server(args).await
        }
        Command::Client(args) => {
            init_logging(LogFormat::Plain);
            run_client(args).await
        }
        Command::Version => {
            println!("{}", version::describe());
            Ok(())
        }
    }
}

async fn run_server(args: ServerArgs) -> Result<()> {
    let config = args.resolve().context("invalid server configuration")?;
    tracing::info!("starting echo server: {}", config.server_name);

    let options = compose_server_options(config).context("failed to compose server options")?;
    let server = EchoServer::new(options).context("failed to build server")?;

    LifecycleController::new(server)
        .run()
        .await
        .context("server terminated with an error")?;
    Ok(())
}

async fn run_client(args: ClientArgs) -> Result<()> {
    let config = args.resolve().context("invalid client configuration")?;
    let options = compose_client_options(&config)?;

    let connection = RpcConnection::connect(&config.endpoint, &options)
        .await
        .context("failed to reach the server")?;
    let pinger = HttpPinger::compose(&config)?;

    let shell = Exerciser::new(connection, pinger);
    let mut stdout = std::io::stdout();
    shell.run(BufReader::new(tokio::io::stdin()), &mut stdout).await?;

    tracing::info!("closing client");
    Ok(())
}
