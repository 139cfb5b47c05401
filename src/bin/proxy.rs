// Copyright 2025 Daniel Gehriger
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Signing Proxy Server
//!
//! A lightweight HTTP(S) server that holds a PKCS#12 signing key and serves
//! the remote signing operation protocol, so build agents can sign through
//! it as if it were a remote HSM.

#![allow(clippy::missing_errors_doc)]

use batch_signer::adapters::local_store::{LocalKeyMaterial, LocalSigningOperation};
use batch_signer::adapters::remote::server::{routes, ProxyServerConfig, ProxyState};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "signing-proxy")]
#[command(about = "Remote signing proxy for batch-signer")]
#[command(version)]
struct Cli {
    /// Address to bind to (e.g., "0.0.0.0:8443")
    #[arg(short, long, default_value = "127.0.0.1:8443")]
    bind: String,

    /// Authentication token for clients (or set `SIGNING_PROXY_TOKEN` env var)
    #[arg(short, long, env = "SIGNING_PROXY_TOKEN")]
    token: String,

    /// PKCS#12 bundle holding the signing key
    #[arg(long)]
    pfx: PathBuf,

    /// Name clients use for the key
    #[arg(long, default_value = "default")]
    key_name: String,

    /// TLS certificate file (PEM format)
    #[arg(long)]
    tls_cert: Option<String>,

    /// TLS private key file (PEM format)
    #[arg(long)]
    tls_key: Option<String>,

    /// Report operations as running for this many polls
    #[arg(long, default_value = "0")]
    pending_polls: u32,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let password = std::env::var("SIGNING_PROXY_PFX_PASSWORD").unwrap_or_default();

    let mut config = ProxyServerConfig::new(&cli.bind, &cli.token, &cli.key_name)
        .with_pending_polls(cli.pending_polls);
    if let (Some(cert), Some(key)) = (&cli.tls_cert, &cli.tls_key) {
        config = config.with_tls(cert, key);
    }

    println!("🔐 Loading signing key from {}...", cli.pfx.display());
    let signer = match LocalSigningOperation::load(&LocalKeyMaterial::Pkcs12 {
        path: cli.pfx.clone(),
        password,
    }) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            eprintln!("❌ Failed to load key: {e}");
            std::process::exit(1);
        }
    };
    println!("   Certificate: {}", signer.chain().leaf().subject());

    let addr: SocketAddr = match cli.bind.parse() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("❌ Invalid bind address: {e}");
            std::process::exit(1);
        }
    };

    let state = Arc::new(ProxyState::new(signer, &config));
    let routes = routes(state);

    println!("🚀 Signing proxy listening on {addr}");
    println!("   Endpoints:");
    println!("     GET  /api/v1/status           - Server status");
    println!("     POST /api/v1/operations       - Submit a certificate or sign operation");
    println!("     GET  /api/v1/operations/{{id}}  - Poll an operation");
    println!();
    println!("   Use Ctrl+C to stop the server");

    match (&config.tls_cert_path, &config.tls_key_path) {
        (Some(cert), Some(key)) => {
            warp::serve(routes)
                .tls()
                .cert_path(cert)
                .key_path(key)
                .run(addr)
                .await;
        }
        _ => {
            println!("⚠️  Running without TLS - use only behind a TLS-terminating proxy!");
            warp::serve(routes).run(addr).await;
        }
    }
}
