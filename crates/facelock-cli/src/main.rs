use anyhow::{bail, Context, Result};
use base64::Engine as _;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "facelock", about = "Facelock authentication CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new user; prints the enrollment token for `enroll`
    Register {
        user: String,
        password: String,
    },
    /// Enroll a face capture for a pending registration
    Enroll {
        /// Enrollment token printed by `register`
        token: String,
        /// Image file with the captured face
        #[arg(short, long)]
        image: std::path::PathBuf,
    },
    /// Skip face enrollment; the account stays password-only
    SkipEnrollment {
        token: String,
    },
    /// Log in with a password or a face capture
    Login {
        user: String,
        /// Password for the conventional path
        #[arg(short, long)]
        password: Option<String>,
        /// Image file for the biometric path
        #[arg(short, long)]
        image: Option<std::path::PathBuf>,
    },
    /// Close a session
    Logout {
        session: String,
    },
    /// List registered users and their enrollment state
    Users,
    /// Show daemon status
    Status,
}

// `#[zbus::proxy]` generates the async `FacelockProxy` used below.
#[zbus::proxy(
    interface = "org.facelock.Facelock1",
    default_service = "org.facelock.Facelock1",
    default_path = "/org/facelock/Facelock1"
)]
trait Facelock {
    async fn register(&self, user: &str, password: &str) -> zbus::Result<String>;
    async fn enroll_face(&self, token: &str, image_b64: &str) -> zbus::Result<String>;
    async fn skip_enrollment(&self, token: &str) -> zbus::Result<bool>;
    async fn login_password(&self, user: &str, password: &str) -> zbus::Result<String>;
    async fn login_face(&self, user: &str, image_b64: &str) -> zbus::Result<String>;
    async fn logout(&self, session: &str) -> zbus::Result<bool>;
    async fn list_users(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

fn encode_capture(path: &std::path::Path) -> Result<String> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read capture {}", path.display()))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let connection = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus; is facelockd running?")?;
    let proxy = FacelockProxy::new(&connection).await?;

    match cli.command {
        Commands::Register { user, password } => {
            let token = proxy.register(&user, &password).await?;
            println!("registered '{user}'");
            println!("enrollment token: {token}");
            println!("run `facelock enroll {token} --image <capture>` to add face login");
        }
        Commands::Enroll { token, image } => {
            let capture = encode_capture(&image)?;
            let result = proxy.enroll_face(&token, &capture).await?;
            println!("{result}");
        }
        Commands::SkipEnrollment { token } => {
            if proxy.skip_enrollment(&token).await? {
                println!("face enrollment skipped");
            } else {
                println!("no pending enrollment for that token");
            }
        }
        Commands::Login {
            user,
            password,
            image,
        } => {
            let result = match (password, image) {
                (Some(password), None) => proxy.login_password(&user, &password).await?,
                (None, Some(image)) => {
                    let capture = encode_capture(&image)?;
                    proxy.login_face(&user, &capture).await?
                }
                _ => bail!("pass exactly one of --password or --image"),
            };
            println!("{result}");
        }
        Commands::Logout { session } => {
            if proxy.logout(&session).await? {
                println!("session closed");
            } else {
                println!("no such session");
            }
        }
        Commands::Users => {
            println!("{}", proxy.list_users().await?);
        }
        Commands::Status => {
            println!("{}", proxy.status().await?);
        }
    }

    Ok(())
}
