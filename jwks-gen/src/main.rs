use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use ndi_rp::services::jwks_gen::{PrivateKeySet, RpJwksGenerator};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Generate the RP key set (one ES256 signing key, one ECDH-ES+A256KW encryption key).
///
/// - Prints the public JWKS for the RP discovery endpoint on stdout, everything else on stderr
/// - Optionally writes the private scalars (`d`) to a file for the secret store
/// - The signing key's `d` is what the relying party reads as RP_PRIVATE_KEY
#[derive(Parser, Debug)]
#[command(name = "jwks-gen", version, about)]
struct Args {
    /// Pretty-print the JWKS
    #[arg(long, default_value_t = false)]
    pretty: bool,

    /// Write private scalars as {"keys":[{"kid","use","d"}]} to this file
    #[arg(long, value_name = "FILE")]
    private_out: Option<PathBuf>,

    /// Print only the JWKS (no extra lines)
    #[arg(long, default_value_t = false)]
    quiet: bool,
}

fn init_tracing() {
    // stdout carries only the JWKS document.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn write_private(path: &Path, keys: &PrivateKeySet) -> Result<()> {
    let json = serde_json::to_string_pretty(keys)?;

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    // `mode` only applies on create; tighten a pre-existing file before writing.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to restrict permissions on {}", path.display()))?;
    }

    file.write_all(json.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;

    info!(path = %path.display(), "private keys written");
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    if !args.quiet {
        init_tracing();
    }

    let (jwks, private) = RpJwksGenerator::generate_with_private();

    let rendered = if args.pretty {
        serde_json::to_string_pretty(&jwks)?
    } else {
        serde_json::to_string(&jwks)?
    };

    if let Some(path) = &args.private_out {
        write_private(path, &private)?;
    }

    println!("{}", rendered);
    if args.quiet {
        return Ok(());
    }

    for key in &jwks.keys {
        eprintln!(
            "{} kid: {}",
            key.use_.as_deref().unwrap_or("?"),
            key.kid.as_deref().unwrap_or("(none)")
        );
    }
    match &args.private_out {
        Some(path) => eprintln!("private keys: {}", path.display()),
        None => eprintln!("private keys: (not written, use --private-out FILE)"),
    }

    Ok(())
}
