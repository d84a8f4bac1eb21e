use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use snap_core::api::{ActiveSnapAction, ApiClient, Tool};
use snap_core::auth::{
    browser, AccountStatus, AuthError, AuthFlow, Identity, LoginResult, Provisioner,
};
use snap_core::config::{ConfigStore, Environment, FileConfigStore, SessionConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "snap", author, version, about = "SnapMaster command line interface")]
struct Cli {
    /// Config file (defaults to $HOME/.config/snap/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
    /// Enable debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize the snap CLI environment
    Init(InitArgs),
    /// Login to a SnapMaster deployment
    Login(LoginArgs),
    /// Log out of a SnapMaster deployment
    Logout,
    /// Show the active user
    User(UserArgs),
    /// Get and set config information
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommand>,
    },
    /// Manage snaps
    #[command(subcommand)]
    Snaps(SnapsCommand),
    /// Manage active snaps
    #[command(subcommand)]
    Active(ActiveCommand),
    /// Show logs of all active snaps
    Logs,
    /// List the tools snaps can use
    #[command(subcommand)]
    Tools(ToolsCommand),
    /// Manage connections to tools
    #[command(subcommand)]
    Connections(ConnectionsCommand),
    /// Browse the snap gallery
    #[command(subcommand)]
    Gallery(GalleryCommand),
    /// Show the current version
    Version,
}

#[derive(Subcommand, Debug)]
enum SnapsCommand {
    /// List the user's snaps
    List,
    /// Show a snap definition
    Get {
        /// Snap ID (e.g. account/name)
        snap_id: String,
    },
}

#[derive(Subcommand, Debug)]
enum ActiveCommand {
    /// List active snaps
    List,
    /// Show an active snap
    Get {
        /// Active snap ID
        active_id: String,
    },
    /// Pause an active snap
    Pause {
        /// Active snap ID
        active_id: String,
    },
    /// Resume an active snap
    Resume {
        /// Active snap ID
        active_id: String,
    },
    /// Deactivate a snap; its logs are deleted
    Deactivate {
        /// Active snap ID
        active_id: String,
    },
    /// Show the logs of an active snap, or one log entry
    Logs {
        /// Active snap ID
        active_id: String,
        /// Log entry ID
        log_id: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum ToolsCommand {
    /// List available tools and whether they are connected
    List,
}

#[derive(Subcommand, Debug)]
enum ConnectionsCommand {
    /// List the user's connections
    List,
    /// Show the credential sets of a connection
    Get {
        /// Tool name
        tool: String,
    },
    /// Disconnect a tool and remove its credential sets
    Disconnect {
        /// Tool name
        tool: String,
    },
}

#[derive(Subcommand, Debug)]
enum GalleryCommand {
    /// List snaps in the gallery
    List,
}

#[derive(Args, Debug)]
struct InitArgs {
    /// API server URL
    api_url: Option<String>,
    /// Auth0 client ID
    client_id: Option<String>,
    /// Auth0 domain
    auth_domain: Option<String>,
}

#[derive(Args, Debug)]
struct LoginArgs {
    /// Print the authorization URL without launching a browser
    #[arg(long = "no-browser")]
    no_browser: bool,
    /// Seconds to wait for the browser to redirect back
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,
}

#[derive(Args, Debug)]
struct UserArgs {
    /// Fetch the profile stored by the SnapMaster service
    #[arg(long)]
    remote: bool,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print out config information
    Get,
    /// Set config information based on the flags provided
    Set(ConfigSetArgs),
}

#[derive(Args, Debug)]
#[command(args_conflicts_with_subcommands = true)]
struct ConfigSetArgs {
    /// API URL
    #[arg(long = "api-url")]
    api_url: Option<String>,
    /// Auth0 client ID (required for any non-default API URL)
    #[arg(long = "client-id")]
    client_id: Option<String>,
    /// Auth0 domain
    #[arg(long = "auth-domain")]
    auth_domain: Option<String>,
    #[command(subcommand)]
    preset: Option<ConfigPreset>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum ConfigPreset {
    /// Set config information to the dev environment
    Dev,
    /// Set config information to the production environment
    Prod,
}

impl From<ConfigPreset> for Environment {
    fn from(preset: ConfigPreset) -> Self {
        match preset {
            ConfigPreset::Dev => Environment::Dev,
            ConfigPreset::Prod => Environment::Prod,
        }
    }
}

/// Loaded configuration plus where to write it back.
struct CliContext {
    store: FileConfigStore,
    config: SessionConfig,
    format: OutputFormat,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("snap: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        "snap=debug,snap_core=debug"
    } else {
        "snap=warn,snap_core=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    if matches!(cli.command, Commands::Version) {
        println!("snap: version <{}>", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let ctx = load_context(cli.config, cli.format)?;
    match cli.command {
        Commands::Init(args) => init(ctx, args),
        Commands::Login(args) => login(ctx, args).await,
        Commands::Logout => logout(ctx),
        Commands::User(args) => user(ctx, args).await,
        Commands::Config { command } => match command {
            None | Some(ConfigCommand::Get) => {
                print_config(&ctx.config, ctx.format)?;
                Ok(())
            }
            Some(ConfigCommand::Set(args)) => config_set(ctx, args),
        },
        Commands::Snaps(command) => {
            let api = api_client(&ctx)?;
            let response = match command {
                SnapsCommand::List => api.list_snaps().await,
                SnapsCommand::Get { snap_id } => api.get_snap(&snap_id).await,
            };
            print_response(response)
        }
        Commands::Active(command) => {
            let api = api_client(&ctx)?;
            let response = match command {
                ActiveCommand::List => api.list_active_snaps().await,
                ActiveCommand::Get { active_id } => api.get_active_snap(&active_id).await,
                ActiveCommand::Pause { active_id } => {
                    api.act_on_active_snap(&active_id, ActiveSnapAction::Pause)
                        .await
                }
                ActiveCommand::Resume { active_id } => {
                    api.act_on_active_snap(&active_id, ActiveSnapAction::Resume)
                        .await
                }
                ActiveCommand::Deactivate { active_id } => {
                    api.act_on_active_snap(&active_id, ActiveSnapAction::Deactivate)
                        .await
                }
                ActiveCommand::Logs { active_id, log_id } => {
                    api.active_snap_logs(&active_id, log_id.as_deref()).await
                }
            };
            print_response(response)
        }
        Commands::Logs => print_response(api_client(&ctx)?.list_logs().await),
        Commands::Tools(ToolsCommand::List) => {
            let tools = api_client(&ctx)?
                .list_tools()
                .await
                .context("could not retrieve data")?;
            print_tools(&tools, ctx.format)
        }
        Commands::Connections(command) => {
            let api = api_client(&ctx)?;
            match command {
                ConnectionsCommand::List => {
                    let connections = api
                        .list_connections()
                        .await
                        .context("could not retrieve data")?;
                    print_tools(&connections, ctx.format)
                }
                ConnectionsCommand::Get { tool } => print_response(api.get_connection(&tool).await),
                ConnectionsCommand::Disconnect { tool } => {
                    print_response(api.disconnect_tool(&tool).await)
                }
            }
        }
        Commands::Gallery(GalleryCommand::List) => {
            print_response(api_client(&ctx)?.list_gallery().await)
        }
        Commands::Version => Ok(()),
    }
}

fn load_context(path: Option<PathBuf>, format: OutputFormat) -> Result<CliContext> {
    let store = match path {
        Some(path) => FileConfigStore::new(path),
        None => FileConfigStore::with_default_locator()
            .context("unable to locate the snap config directory")?,
    };
    let mut config = store
        .load()
        .with_context(|| format!("could not read config file {}", store.path().display()))?;
    config.apply_env_overrides(|key| env::var(key).ok());
    Ok(CliContext {
        store,
        config,
        format,
    })
}

fn init(mut ctx: CliContext, args: InitArgs) -> Result<()> {
    if let Some(api_url) = args.api_url {
        ctx.config.api_url = api_url;
    }
    if let Some(client_id) = args.client_id {
        ctx.config.client_id = client_id;
    }
    if let Some(auth_domain) = args.auth_domain {
        ctx.config.auth_domain = auth_domain;
    }

    ctx.store
        .save(&ctx.config)
        .context("could not write config file")?;
    println!("snap: created config file in {}", ctx.store.path().display());
    Ok(())
}

async fn login(ctx: CliContext, args: LoginArgs) -> Result<()> {
    let open_browser = !args.no_browser && browser::browser_available();
    if !args.no_browser && !open_browser {
        tracing::info!("no display detected; not launching a browser");
    }

    let mut flow = AuthFlow::new(ctx.store, ctx.config)
        .with_browser(open_browser)
        .with_callback_timeout(args.timeout.map(Duration::from_secs));
    let login = match flow.login(print_authorization_url).await {
        Ok(login) => login,
        Err(AuthError::BrowserLaunch { url, reason }) => {
            bail!("could not launch a browser ({reason}); rerun with --no-browser and open {url}")
        }
        Err(err) => return Err(err).context("login failed"),
    };
    println!("{}", login_banner(&login.identity));

    let status = provision_account(&login, io::stdin().lock(), io::stdout()).await?;
    if let AccountStatus::Existing(account) = status {
        tracing::debug!(%account, "using existing account");
    }
    Ok(())
}

fn login_banner(identity: &Identity) -> String {
    let mut banner = String::from("Successfully logged into snapmaster API.");
    if let Some(expires_at) = identity.expires_at {
        banner.push_str(&format!(
            "\nToken expires at {} (UTC).",
            expires_at.format("%Y-%m-%d %H:%M:%S")
        ));
    }
    banner
}

/// Make sure the freshly logged-in user owns an account, using the persisted session.
async fn provision_account<R, W>(login: &LoginResult, input: R, output: W) -> Result<AccountStatus>
where
    R: BufRead,
    W: Write,
{
    let api = ApiClient::from_config(&login.session).context("failed to build API client")?;
    Provisioner::new(&api, input, output, login.session.api_url.clone())
        .ensure_account(&login.identity)
        .await
        .context("account setup failed")
}

fn print_authorization_url(url: &Url) -> Result<(), AuthError> {
    println!("\nAuthorize the snap CLI by visiting:\n  {}\n", url);
    Ok(())
}

fn logout(ctx: CliContext) -> Result<()> {
    AuthFlow::new(ctx.store, ctx.config)
        .logout()
        .context("could not write config file")?;
    println!("snap: no logged in user.");
    Ok(())
}

async fn user(ctx: CliContext, args: UserArgs) -> Result<()> {
    if !ctx.config.is_logged_in() {
        bail!("no logged in user.  To login, use the command 'snap login'.");
    }

    if args.remote {
        let api = ApiClient::from_config(&ctx.config).context("failed to build API client")?;
        let profile = api.get_profile().await.context("could not retrieve profile")?;
        match ctx.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&profile)?),
            OutputFormat::Table => {
                println!("Account : {}", profile.account.as_deref().unwrap_or("-"));
                println!("Name    : {}", profile.name.as_deref().unwrap_or("-"));
                println!("Email   : {}", profile.email.as_deref().unwrap_or("-"));
            }
        }
        return Ok(());
    }

    match ctx.format {
        OutputFormat::Json => {
            let user = json!({ "name": ctx.config.name, "email": ctx.config.email });
            println!("{}", serde_json::to_string_pretty(&user)?);
        }
        OutputFormat::Table => {
            println!("snap: current user is {} <{}>", ctx.config.name, ctx.config.email)
        }
    }
    Ok(())
}

fn config_set(mut ctx: CliContext, args: ConfigSetArgs) -> Result<()> {
    match args.preset {
        Some(preset) => ctx.config.apply_environment(preset.into()),
        None => {
            if let Some(api_url) = args.api_url {
                ctx.config.api_url = api_url;
            }
            if let Some(client_id) = args.client_id {
                ctx.config.client_id = client_id;
            }
            if let Some(auth_domain) = args.auth_domain {
                ctx.config.auth_domain = auth_domain;
            }
        }
    }

    ctx.store
        .save(&ctx.config)
        .context("could not write config file")?;
    println!("snap: updated config");
    print_config(&ctx.config, ctx.format)
}

fn api_client(ctx: &CliContext) -> Result<ApiClient> {
    ApiClient::from_config(&ctx.config).context("failed to build API client")
}

/// Responses without a dedicated renderer are printed as pretty JSON in every format.
fn print_response(response: snap_core::api::ApiResult<Value>) -> Result<()> {
    let value = response.context("could not retrieve data")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn print_tools(tools: &[Tool], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(tools)?),
        OutputFormat::Table => {
            println!("{:<20} {:<12} {:<9}", "TOOL", "TYPE", "CONNECTED");
            println!("{}", "-".repeat(43));
            for tool in tools {
                println!(
                    "{:<20} {:<12} {:<9}",
                    tool.provider,
                    tool.kind,
                    if tool.is_connected() { "yes" } else { "no" }
                );
            }
        }
    }
    Ok(())
}

fn print_config(config: &SessionConfig, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let values = json!({
                "APIURL": config.api_url,
                "ClientID": config.client_id,
                "AuthDomain": config.auth_domain,
            });
            println!("{}", serde_json::to_string_pretty(&values)?);
        }
        OutputFormat::Table => {
            println!("{:<12} {}", "FIELD", "VALUE");
            println!("{:<12} {}", "API URL", config.api_url);
            println!("{:<12} {}", "Client ID", config.client_id);
            println!("{:<12} {}", "Auth Domain", config.auth_domain);
        }
    }
    Ok(())
}
