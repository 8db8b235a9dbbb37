use std::path::{Path, PathBuf};

use {
    anyhow::{Context, Result, bail},
    clap::Subcommand,
    tollgate_auth::{Claims, JwtSecret},
    tollgate_config::{constants::JWT_SECRET_FILENAME, data_dir},
};

#[derive(Subcommand)]
pub enum JwtAction {
    /// Write a new random secret, hex-encoded.
    Generate {
        /// Destination file (defaults to `~/.tollgate/jwt.hex`).
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print a bearer token signed with the secret, issued now.
    Token {
        /// Secret file (defaults to `~/.tollgate/jwt.hex`).
        #[arg(long)]
        secret: Option<PathBuf>,
    },
}

pub fn handle_jwt(action: JwtAction) -> Result<()> {
    match action {
        JwtAction::Generate { out } => {
            let path = out.unwrap_or_else(default_secret_path);
            generate(&path)?;
            println!("Wrote JWT secret to {}", path.display());
            Ok(())
        },
        JwtAction::Token { secret } => {
            let path = secret.unwrap_or_else(default_secret_path);
            println!("{}", token(&path)?);
            Ok(())
        },
    }
}

pub fn default_secret_path() -> PathBuf {
    data_dir().join(JWT_SECRET_FILENAME)
}

fn generate(path: &Path) -> Result<JwtSecret> {
    if path.exists() {
        bail!("{} already exists, refusing to overwrite it", path.display());
    }
    JwtSecret::try_create(path).with_context(|| format!("creating {}", path.display()))
}

fn token(path: &Path) -> Result<String> {
    let secret =
        JwtSecret::from_file(path).with_context(|| format!("loading {}", path.display()))?;
    Ok(secret.encode(&Claims::now())?)
}
