//! certpin CLI - fetch server fingerprints and make pinned requests.
//!
//! ## Usage
//!
//! ```bash
//! # Print the SHA-1 fingerprint a server presents
//! certpin fingerprint https://www.example.com
//!
//! # Pin it
//! certpin fingerprint www.example.com > pins/www.example.com
//!
//! # Pinned GET using a directory of pins
//! certpin get https://www.example.com --pins pins/
//!
//! # Inspect a pin directory
//! certpin pins pins/
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use certpin_core::fingerprint;
use certpin_core::{FingerprintRegistry, PinConfig, PinError, PinnedClient, PinnedRequest};
use clap::{Parser, Subcommand};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Certificate pinning for outbound HTTPS requests.
///
/// Requests made through certpin succeed only when the server's certificate
/// matches the SHA-1 fingerprint pinned for its domain.
#[derive(Parser)]
#[command(name = "certpin")]
#[command(version = VERSION)]
#[command(about = "TLS certificate pinning for outbound HTTPS requests")]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the certificate fingerprint a server presents
    Fingerprint {
        /// URL or bare host name
        url: String,

        /// Request timeout in seconds
        #[arg(long, default_value = "10")]
        timeout: u64,
    },

    /// Perform a pinned GET request
    Get {
        /// HTTPS URL to fetch
        url: String,

        /// Directory of pin files (file name = domain, contents = fingerprint)
        #[arg(short, long)]
        pins: Option<PathBuf>,

        /// Additional pin as PATTERN=FINGERPRINT (repeatable)
        #[arg(long = "pin", value_name = "PATTERN=FINGERPRINT")]
        extra_pins: Vec<String>,

        /// Pin this request to a fingerprint, ignoring the registry
        #[arg(long)]
        fingerprint: Option<String>,

        /// Maximum redirects to follow
        #[arg(long, default_value = "10")]
        max_redirects: usize,

        /// Request timeout in seconds
        #[arg(long, default_value = "30")]
        timeout: u64,

        /// Print the response body
        #[arg(long)]
        body: bool,
    },

    /// List the pins in a directory and check their format
    Pins {
        /// Directory of pin files
        dir: PathBuf,
    },
}

fn config_with_timeout(timeout_secs: u64) -> PinConfig {
    PinConfig {
        timeout: Duration::from_secs(timeout_secs),
        ..PinConfig::default()
    }
}

fn report_failure(err: &PinError, json: bool) {
    if json {
        let output = serde_json::json!({
            "ok": false,
            "code": err.code(),
            "host": err.host(),
            "error": err.to_string(),
        });
        println!("{}", output);
    } else {
        eprintln!("FAILED: {}", err);
        if let Some(code) = err.code() {
            eprintln!("  code: {}", code);
        }
    }
}

async fn run_fingerprint(url: &str, timeout: u64, json: bool) -> anyhow::Result<bool> {
    let client = PinnedClient::new(config_with_timeout(timeout))?;

    match client.fingerprint_for_url(url).await {
        Ok(fp) => {
            if json {
                println!("{}", serde_json::json!({ "ok": true, "url": url, "fingerprint": fp }));
            } else {
                println!("{}", fp);
            }
            Ok(true)
        },
        Err(e) => {
            report_failure(&e, json);
            Ok(false)
        },
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_get(
    url: &str,
    pins: Option<PathBuf>,
    extra_pins: &[String],
    fingerprint: Option<String>,
    max_redirects: usize,
    timeout: u64,
    print_body: bool,
    json: bool,
) -> anyhow::Result<bool> {
    let config = PinConfig {
        max_redirects,
        fingerprint_dir: pins,
        ..config_with_timeout(timeout)
    };
    let client = PinnedClient::new(config)?;

    for pin in extra_pins {
        let (pattern, fp) = pin
            .split_once('=')
            .with_context(|| format!("--pin expects PATTERN=FINGERPRINT, got {:?}", pin))?;
        client.registry().register(pattern, fp)?;
    }

    let mut request = PinnedRequest::get(url)?;
    if let Some(fp) = fingerprint {
        request = request.with_fingerprint(fp);
    }

    match client.execute(request).await {
        Ok(response) => {
            if json {
                let output = serde_json::json!({
                    "ok": true,
                    "status": response.status.as_u16(),
                    "url": response.url.as_str(),
                    "pinned_url": client.last_url(),
                    "bytes": response.body.len(),
                    "body": print_body.then(|| response.text()),
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("PINNED OK");
                println!("  Status:     {}", response.status);
                println!("  Final URL:  {}", response.url);
                if let Some(pinned) = client.last_url() {
                    println!("  Pinned URL: {}", pinned);
                }
                println!("  Body:       {} bytes", response.body.len());
                if print_body {
                    println!();
                    println!("{}", response.text());
                }
            }
            Ok(true)
        },
        Err(e) => {
            report_failure(&e, json);
            Ok(false)
        },
    }
}

fn run_pins(dir: &PathBuf, json: bool) -> anyhow::Result<bool> {
    let registry = FingerprintRegistry::new();
    registry
        .load_directory(dir)
        .with_context(|| format!("loading pins from {}", dir.display()))?;

    let entries: Vec<(String, String, bool)> = registry
        .patterns()
        .into_iter()
        .filter_map(|pattern| {
            let fp = registry.lookup(pattern.as_str())?;
            let valid = fingerprint::is_well_formed(&fp);
            Some((pattern, fp, valid))
        })
        .collect();
    let all_valid = entries.iter().all(|(_, _, valid)| *valid);

    if json {
        let pins: Vec<_> = entries
            .iter()
            .map(|(pattern, fp, valid)| {
                serde_json::json!({ "pattern": pattern, "fingerprint": fp, "well_formed": valid })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({ "ok": all_valid, "pins": pins }))?
        );
    } else {
        println!("{} pin(s) in {}", entries.len(), dir.display());
        for (pattern, fp, valid) in &entries {
            let mark = if *valid { "ok " } else { "BAD" };
            println!("  [{}] {:<40} {}", mark, pattern, fp);
        }
    }
    Ok(all_valid)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let json_output = cli.format == "json";

    // Initialize logging (quiet for JSON output)
    if json_output {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::ERROR)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    } else if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    let ok = match cli.command {
        Commands::Fingerprint { url, timeout } => run_fingerprint(&url, timeout, json_output).await?,
        Commands::Get {
            url,
            pins,
            extra_pins,
            fingerprint,
            max_redirects,
            timeout,
            body,
        } => {
            run_get(
                &url,
                pins,
                &extra_pins,
                fingerprint,
                max_redirects,
                timeout,
                body,
                json_output,
            )
            .await?
        },
        Commands::Pins { dir } => run_pins(&dir, json_output)?,
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
