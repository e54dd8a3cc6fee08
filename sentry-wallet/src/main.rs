use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use secrecy::SecretString;

use sentry_wallet_lib::api::types::{DashboardResponse, LocalWalletSummary, LocalWalletsResponse};
use sentry_wallet_lib::app_state::{AppState, NoticeLevel, SentryContext};
use sentry_wallet_lib::controller::{Controller, Intent};
use sentry_wallet_lib::crypto::SigningKey;
use sentry_wallet_lib::errors::{WalletError, WalletResult};
use sentry_wallet_lib::nominee::NomineeDraft;
use sentry_wallet_lib::storage::LocalWalletRecord;
use sentry_wallet_lib::validation::InputValidator;

/// SentryWallet: encrypted wallet, transfers and inheritance nominees.
#[derive(Debug, Parser)]
#[command(name = "sentry-wallet")]
#[command(author, version, about = "SentryWallet command-line client")]
#[command(propagate_version = true)]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Directory holding the configuration and the local store
    #[arg(long, global = true, env = "SENTRY_WALLET_DATA_DIR", value_name = "PATH")]
    data_dir: Option<PathBuf>,

    /// Print the resulting state as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create an account with the auth provider
    Signup {
        #[arg(long)]
        email: String,
        #[arg(long)]
        full_name: String,
        #[command(flatten)]
        password: AccountPassword,
    },

    /// Sign in with email and password
    Login {
        #[arg(long)]
        email: String,
        #[command(flatten)]
        password: AccountPassword,
    },

    /// Print the URL that starts an OAuth sign-in
    OauthUrl {
        #[arg(long, default_value = "google")]
        provider: String,
        #[arg(long)]
        redirect_to: String,
    },

    /// Finish an OAuth sign-in from the redirect URL
    CompleteOauth {
        /// Full callback URL or just its `#fragment`
        callback: String,
    },

    /// Sign out and forget the stored session
    Logout,

    /// Show the session, wallet and balance
    Status,

    /// Encrypted signing key stored with the account
    Wallet {
        #[command(subcommand)]
        command: WalletCommands,
    },

    /// Show the wallet balance
    Balance,

    /// Send coins to another address
    Send {
        #[arg(long)]
        to: String,
        /// Amount in whole coins, e.g. 0.5
        #[arg(long)]
        amount: String,
        #[command(flatten)]
        password: WalletPassword,
    },

    /// Inheritance nominees
    Nominee {
        #[command(subcommand)]
        command: NomineeCommands,
    },

    /// Wallets kept only on this device
    Local {
        #[command(subcommand)]
        command: LocalCommands,
    },

    /// Show or change configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Debug, Subcommand)]
enum WalletCommands {
    /// Generate and store a new encrypted key
    Create {
        #[command(flatten)]
        password: WalletPassword,
        /// Repeat the password
        #[arg(
            long,
            env = "SENTRY_WALLET_PASSWORD_CONFIRM",
            hide_env_values = true
        )]
        confirm: Option<String>,
    },
    /// Check the password against the stored key
    Unlock {
        #[command(flatten)]
        password: WalletPassword,
    },
    /// Whether a wallet exists and its address
    Status,
}

#[derive(Debug, Subcommand)]
enum NomineeCommands {
    List,
    Add {
        #[arg(long)]
        email: String,
        /// Nominee's BlockDAG address
        #[arg(long)]
        address: String,
        /// Share in percent, 1 to 100
        #[arg(long)]
        share: String,
        /// Wallet password, needed to also record the nominee on-chain
        #[arg(long, env = "SENTRY_WALLET_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Remove the nominee at a 1-based position from `nominee list`
    Remove {
        #[arg(value_parser = clap::value_parser!(u64).range(1..))]
        position: u64,
    },
    /// Convert legacy nominee data to the current format
    Migrate,
}

#[derive(Debug, Subcommand)]
enum LocalCommands {
    /// Generate a wallet and add it to the encrypted local list
    Create {
        #[arg(long)]
        name: String,
        #[command(flatten)]
        password: WalletPassword,
        #[arg(long)]
        hint: Option<String>,
    },
    List {
        #[command(flatten)]
        password: WalletPassword,
    },
    /// Delete all local wallets (a backup is kept)
    Clear,
    /// Show the password hint
    Hint,
    /// Update preferences
    Prefs {
        #[arg(long)]
        currency: Option<String>,
        #[arg(long)]
        theme: Option<String>,
        #[arg(long)]
        default_wallet: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommands {
    Show,
    Path,
    Set {
        #[arg(long)]
        backend_url: Option<String>,
        #[arg(long)]
        anon_key: Option<String>,
        #[arg(long)]
        rpc_url: Option<String>,
        #[arg(long)]
        chain_id: Option<u64>,
        #[arg(long)]
        inheritance_contract: Option<String>,
        #[arg(long)]
        activity_contract: Option<String>,
        #[arg(long)]
        mirror_on_chain: Option<bool>,
        #[arg(long)]
        auto_lock_minutes: Option<u32>,
    },
}

#[derive(Debug, Args)]
struct AccountPassword {
    /// Account password
    #[arg(long = "password", env = "SENTRY_ACCOUNT_PASSWORD", hide_env_values = true)]
    value: Option<String>,
}

#[derive(Debug, Args)]
struct WalletPassword {
    /// Wallet encryption password
    #[arg(long = "password", env = "SENTRY_WALLET_PASSWORD", hide_env_values = true)]
    value: Option<String>,
}

fn require_password(value: Option<String>, source: &str) -> WalletResult<SecretString> {
    value.map(SecretString::from).ok_or_else(|| {
        WalletError::ValidationError(format!("A password is required (--password or {}).", source))
    })
}

impl AccountPassword {
    fn secret(self) -> WalletResult<SecretString> {
        require_password(self.value, "SENTRY_ACCOUNT_PASSWORD")
    }
}

impl WalletPassword {
    fn secret(self) -> WalletResult<SecretString> {
        require_password(self.value, "SENTRY_WALLET_PASSWORD")
    }
}

fn create_wallet_intent(password: WalletPassword, confirm: Option<String>) -> WalletResult<Intent> {
    let confirmation = confirm.map(SecretString::from).ok_or_else(|| {
        WalletError::ValidationError(
            "Repeat the password with --confirm or SENTRY_WALLET_PASSWORD_CONFIRM.".to_string(),
        )
    })?;
    Ok(Intent::CreateWallet {
        password: password.secret()?,
        confirmation,
    })
}

/// `nominee list` numbers from 1.
fn nominee_index(position: u64) -> WalletResult<usize> {
    position
        .checked_sub(1)
        .and_then(|index| usize::try_from(index).ok())
        .ok_or_else(|| {
            WalletError::ValidationError(format!("No nominee at position {}", position))
        })
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();
}

fn default_data_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".sentry-wallet")
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> WalletResult<ExitCode> {
    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);
    let mut context = SentryContext::initialize(&data_dir)?;

    let intents = match cli.command {
        Commands::Local { command } => return run_local(&context, command, cli.json),
        Commands::Config { command } => return run_config(&mut context, command),
        Commands::OauthUrl {
            provider,
            redirect_to,
        } => {
            let controller = context.connect()?;
            println!("{}", controller.oauth_url(&provider, &redirect_to)?);
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Signup {
            email,
            full_name,
            password,
        } => vec![Intent::SignUp {
            email,
            password: password.secret()?,
            full_name,
        }],
        Commands::Login { email, password } => vec![Intent::SignIn {
            email,
            password: password.secret()?,
        }],
        Commands::CompleteOauth { callback } => vec![Intent::CompleteOAuth { callback }],
        Commands::Logout => vec![Intent::SignOut],
        Commands::Status | Commands::Wallet { command: WalletCommands::Status } => {
            vec![Intent::RefreshWallet]
        }
        Commands::Wallet {
            command: WalletCommands::Create { password, confirm },
        } => vec![create_wallet_intent(password, confirm)?],
        Commands::Wallet {
            command: WalletCommands::Unlock { password },
        } => vec![Intent::UnlockWallet {
            password: password.secret()?,
        }],
        Commands::Balance => vec![Intent::RefreshBalance],
        Commands::Send {
            to,
            amount,
            password,
        } => vec![
            Intent::UnlockWallet {
                password: password.secret()?,
            },
            Intent::SendTransfer { to, amount },
        ],
        Commands::Nominee { command } => match command {
            NomineeCommands::List => vec![Intent::LoadNominees],
            NomineeCommands::Add {
                email,
                address,
                share,
                password,
            } => {
                let mut intents = Vec::new();
                if let Some(password) = password {
                    intents.push(Intent::UnlockWallet {
                        password: SecretString::from(password),
                    });
                }
                intents.push(Intent::LoadNominees);
                intents.push(Intent::AddNominee(NomineeDraft {
                    email,
                    address,
                    share,
                }));
                intents
            }
            NomineeCommands::Remove { position } => vec![
                Intent::LoadNominees,
                Intent::RemoveNominee {
                    index: nominee_index(position)?,
                },
            ],
            NomineeCommands::Migrate => vec![Intent::MigrateNominees],
        },
    };

    let mut controller = context.connect()?;
    controller.dispatch(Intent::Start).await;
    for intent in intents {
        controller.dispatch(intent).await;
    }
    context.persist_session(controller.state())?;
    Ok(render(&mut controller, cli.json))
}

fn render(controller: &mut Controller, json: bool) -> ExitCode {
    let state = controller.state_mut();
    let failed = state
        .notices
        .iter()
        .any(|notice| notice.level == NoticeLevel::Error);

    if json {
        match serde_json::to_string_pretty(&DashboardResponse::from(&*state)) {
            Ok(body) => println!("{}", body),
            Err(err) => eprintln!("Error: {}", err),
        }
    } else {
        print_state(state);
    }
    state.take_notices();

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn print_state(state: &AppState) {
    match state.user() {
        Some(user) => println!("Signed in as {}", user.display_name()),
        None => println!("Not signed in"),
    }
    if let Some(address) = state.address {
        println!("Wallet:  {} ({:?})", address, state.wallet);
    }
    if let Some(balance) = &state.balance {
        println!("Balance: {} BDAG", balance);
    }
    for (position, nominee) in state.nominees.iter().enumerate() {
        let address = if nominee.address.is_empty() {
            "(no address)"
        } else {
            nominee.address.as_str()
        };
        println!(
            "  {}. {} {} {}%",
            position + 1,
            nominee.email,
            address,
            nominee.share
        );
    }
    if let Some(email) = &state.pending_nominee {
        println!(
            "  (legacy) {} needs an address and share; add it again to complete it",
            email
        );
    }
    if let Some(share) = state.on_chain_share {
        println!("On-chain nominee share: {}%", share);
    }
    for notice in &state.notices {
        match notice.level {
            NoticeLevel::Info => println!("{}", notice.message),
            NoticeLevel::Error => eprintln!("{}", notice.message),
        }
    }
}

fn run_local(context: &SentryContext, command: LocalCommands, json: bool) -> WalletResult<ExitCode> {
    let store = context.local_store();
    match command {
        LocalCommands::Create {
            name,
            password,
            hint,
        } => {
            InputValidator::shared()?.validate_wallet_name(&name)?;
            let password = password.secret()?;
            let mut wallets = store.load_wallets(&password)?;
            let record = LocalWalletRecord::from_key(name, &SigningKey::generate());
            println!("Created {} ({})", record.address, record.id);

            let mut preferences = store.load_preferences();
            if preferences.default_wallet.is_none() {
                preferences.default_wallet = Some(record.id.clone());
                store.save_preferences(&preferences)?;
            }
            wallets.push(record);
            store.save_wallets(&wallets, &password)?;
            if let Some(hint) = hint {
                store.save_password_hint(&hint)?;
            }
        }
        LocalCommands::List { password } => {
            let wallets = store.load_wallets(&password.secret()?)?;
            let response = LocalWalletsResponse {
                wallets: wallets.iter().map(LocalWalletSummary::from).collect(),
                preferences: store.load_preferences(),
                password_hint: store.password_hint()?,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                for wallet in &response.wallets {
                    let marker = if response.preferences.default_wallet.as_deref()
                        == Some(wallet.id.as_str())
                    {
                        "*"
                    } else {
                        " "
                    };
                    println!("{} {} {} {}", marker, wallet.name, wallet.address, wallet.id);
                }
            }
        }
        LocalCommands::Clear => {
            store.clear_wallets()?;
            store.clear_password_hint()?;
            let mut preferences = store.load_preferences();
            preferences.default_wallet = None;
            store.save_preferences(&preferences)?;
            println!("Local wallets cleared");
        }
        LocalCommands::Hint => match store.password_hint()? {
            Some(hint) => println!("{}", hint),
            None => println!("No password hint set"),
        },
        LocalCommands::Prefs {
            currency,
            theme,
            default_wallet,
        } => {
            let mut preferences = store.load_preferences();
            if let Some(currency) = currency {
                preferences.currency = currency;
            }
            if let Some(theme) = theme {
                preferences.theme = theme;
            }
            if let Some(default_wallet) = default_wallet {
                preferences.default_wallet = Some(default_wallet);
            }
            store.save_preferences(&preferences)?;
            println!("{}", serde_json::to_string_pretty(&preferences)?);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_config(context: &mut SentryContext, command: ConfigCommands) -> WalletResult<ExitCode> {
    match command {
        ConfigCommands::Show => {
            println!("{}", serde_json::to_string_pretty(context.config())?);
        }
        ConfigCommands::Path => println!("{}", context.config_store().path().display()),
        ConfigCommands::Set {
            backend_url,
            anon_key,
            rpc_url,
            chain_id,
            inheritance_contract,
            activity_contract,
            mirror_on_chain,
            auto_lock_minutes,
        } => {
            let updated = context.update_config(|config| {
                if let Some(url) = backend_url {
                    config.backend.url = url;
                }
                if let Some(key) = anon_key {
                    config.backend.anon_key = key;
                }
                if let Some(url) = rpc_url {
                    config.network.rpc_url = url;
                }
                if chain_id.is_some() {
                    config.network.chain_id = chain_id;
                }
                if let Some(contract) = inheritance_contract {
                    config.contracts.inheritance = Some(contract.parse()?);
                }
                if let Some(contract) = activity_contract {
                    config.contracts.activity = Some(contract.parse()?);
                }
                if let Some(mirror) = mirror_on_chain {
                    config.contracts.mirror_nominees_on_chain = mirror;
                }
                if let Some(minutes) = auto_lock_minutes {
                    config.session.auto_lock_minutes = minutes;
                }
                Ok(())
            })?;
            println!("{}", serde_json::to_string_pretty(updated)?);
        }
    }
    Ok(ExitCode::SUCCESS)
}
