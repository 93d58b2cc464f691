use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "inboxlink", version, about = "Gmail mailbox integration for merchants")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output structured JSON
    #[arg(long, global = true)]
    json: bool,

    /// Integration database path (defaults to ~/.inboxlink/inboxlink.db)
    #[arg(long, global = true, env = "INBOXLINK_DB")]
    db: Option<PathBuf>,

    /// Merchant whose integration to operate on
    #[arg(long, global = true, env = "INBOXLINK_MERCHANT")]
    merchant: Option<String>,

    #[command(flatten)]
    oauth: OAuthArgs,
}

#[derive(Debug, Args)]
struct OAuthArgs {
    #[arg(long, global = true, env = "INBOXLINK_CLIENT_ID", hide_env_values = true)]
    client_id: Option<String>,

    #[arg(long, global = true, env = "INBOXLINK_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    #[arg(long, global = true, env = "INBOXLINK_REDIRECT_URI")]
    redirect_uri: Option<String>,

    /// 64 hex characters; seals stored tokens with AES-256-GCM
    #[arg(long, global = true, env = "INBOXLINK_TOKEN_KEY", hide_env_values = true)]
    token_key: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the consent URL that starts the OAuth flow
    AuthUrl {
        #[arg(long)]
        login_hint: Option<String>,
    },
    /// Exchange an authorization code and store the integration
    Connect {
        #[arg(long)]
        code: String,
    },
    /// Show integration health without calling the provider
    Status,
    /// Print a valid access token, refreshing it if expired
    Token,
    /// Resolve the mailbox email address
    Email {
        /// Report every resolver tier attempted
        #[arg(long, default_value_t = false)]
        diagnostics: bool,
    },
    /// Override the cached mailbox email address
    SetEmail { email: String },
    /// Drop the cached email address so it is resolved again
    ForgetEmail,
    /// List messages with metadata
    List(ListArgs),
    /// Show one message with decoded body and attachments
    Show { id: String },
    /// List merchants with a stored integration
    Merchants,
}

#[derive(Debug, Args)]
struct ListArgs {
    /// Label filter; repeat for several labels
    #[arg(long = "label")]
    labels: Vec<String>,
    #[arg(long, default_value_t = 20)]
    max: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    commands::dispatch(cli).await
}

mod commands {
    use std::sync::Arc;

    use anyhow::{anyhow, Context, Result};

    use inboxlink::db::seal::SealingKey;
    use inboxlink::db::Database;
    use inboxlink::mailbox::{IntegrationStatus, ListOptions, Mailbox};
    use inboxlink::output::{self, OutputFormat};
    use inboxlink::store::SqliteIntegrationStore;
    use inboxlink::{MailboxError, OAuthConfig, UserAction};

    use super::{Cli, Commands};

    pub async fn dispatch(cli: Cli) -> Result<()> {
        let format = OutputFormat::from_json_flag(cli.json);
        let store = Arc::new(open_store(&cli)?);

        let result = match &cli.command {
            Commands::Status => handle_status(&cli, &store, format).await,
            Commands::Merchants => handle_merchants(&store, format),
            _ => {
                let mailbox = open_mailbox(&cli, store.clone())?;
                run_mailbox_command(&cli, &mailbox, format).await
            }
        };

        result.map_err(with_user_hint)
    }

    async fn run_mailbox_command(cli: &Cli, mailbox: &Mailbox, format: OutputFormat) -> Result<()> {
        let merchant_id = require_merchant(cli)?;
        match &cli.command {
            Commands::AuthUrl { login_hint } => {
                let url = mailbox.authorization_url(merchant_id, login_hint.as_deref())?;
                println!("{url}");
            }
            Commands::Connect { code } => {
                mailbox.complete_authorization(merchant_id, code).await?;
                let status = mailbox.status(merchant_id).await?;
                println!("{}", output::format_status(format, &status)?);
            }
            Commands::Token => {
                let token = mailbox.ensure_valid_access_token(merchant_id).await?;
                println!("{token}");
            }
            Commands::Email { diagnostics } => {
                let resolution = mailbox.resolve_with_diagnostics(merchant_id).await?;
                if *diagnostics || cli.json {
                    println!("{}", output::format_resolution(format, &resolution)?);
                } else {
                    match resolution.email {
                        Some(email) => println!("{email}"),
                        None => println!("(unresolved)"),
                    }
                }
            }
            Commands::SetEmail { email } => {
                mailbox.set_email(merchant_id, email).await?;
                println!("Email address set to {}", email.trim());
            }
            Commands::ForgetEmail => {
                mailbox.invalidate_email(merchant_id).await?;
                println!("Cached email address cleared for {merchant_id}");
            }
            Commands::List(args) => {
                let options = ListOptions {
                    label_ids: args.labels.clone(),
                    max_results: args.max,
                };
                let messages = mailbox.list_messages(merchant_id, &options).await?;
                println!("{}", output::format_message_list(format, &messages)?);
            }
            Commands::Show { id } => {
                let message = mailbox.fetch_full_message(merchant_id, id).await?;
                println!("{}", output::format_full_message(format, &message)?);
            }
            Commands::Status | Commands::Merchants => {}
        }
        Ok(())
    }

    async fn handle_status(
        cli: &Cli,
        store: &SqliteIntegrationStore,
        format: OutputFormat,
    ) -> Result<()> {
        let merchant_id = require_merchant(cli)?;
        let status = IntegrationStatus::load(store, merchant_id).await?;
        println!("{}", output::format_status(format, &status)?);
        Ok(())
    }

    fn handle_merchants(store: &SqliteIntegrationStore, format: OutputFormat) -> Result<()> {
        let integrations = store.with_db(|db| db.list_integrations(store.provider()))?;
        println!("{}", output::format_integrations(format, &integrations)?);
        Ok(())
    }

    fn open_store(cli: &Cli) -> Result<SqliteIntegrationStore> {
        let db_path = match &cli.db {
            Some(path) => path.clone(),
            None => Database::default_db_path().context("resolve default inboxlink database path")?,
        };
        let sealing_key = cli
            .oauth
            .token_key
            .as_deref()
            .map(SealingKey::from_hex)
            .transpose()
            .context("parse INBOXLINK_TOKEN_KEY")?;

        let db = Database::open(&db_path)
            .with_context(|| format!("open inboxlink database at {}", db_path.display()))?
            .with_sealing_key(sealing_key);
        Ok(SqliteIntegrationStore::new(db))
    }

    fn open_mailbox(cli: &Cli, store: Arc<SqliteIntegrationStore>) -> Result<Mailbox> {
        let config = OAuthConfig::new(
            cli.oauth.client_id.clone().unwrap_or_default(),
            cli.oauth.client_secret.clone().unwrap_or_default(),
            cli.oauth.redirect_uri.clone().unwrap_or_default(),
        )
        .with_env_overrides()?;

        Mailbox::connect(config, store).context("configure mailbox integration")
    }

    fn require_merchant(cli: &Cli) -> Result<&str> {
        cli.merchant
            .as_deref()
            .map(str::trim)
            .filter(|merchant| !merchant.is_empty())
            .ok_or_else(|| anyhow!("--merchant (or INBOXLINK_MERCHANT) is required"))
    }

    fn with_user_hint(err: anyhow::Error) -> anyhow::Error {
        let action = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<MailboxError>())
            .map(MailboxError::user_action);
        match action {
            Some(UserAction::Reconnect) => err.context("reconnect your mailbox: run `inboxlink auth-url`"),
            Some(UserAction::TryAgain) => err.context("temporary failure talking to the provider; try again"),
            _ => err,
        }
    }
}
