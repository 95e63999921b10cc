use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tracing::info;

use sage_crypto::keys::{IdentityKeyPair, PublicKeyBytes};
use sage_proto::api::WireRecord;
use sage_transport::{
    FileKeyStore, KeyFormat, KeyStore, StaticResolver, Transport, TransportConfig,
};

mod client;
mod http;

use crate::client::ShimClient;
use crate::http::AppState;

#[derive(Parser, Debug)]
#[command(author, version, about = "SAGE agent transport service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KeyFormatArg {
    Pem,
    Jwk,
}

impl From<KeyFormatArg> for KeyFormat {
    fn from(arg: KeyFormatArg) -> Self {
        match arg {
            KeyFormatArg::Pem => KeyFormat::Pem,
            KeyFormatArg::Jwk => KeyFormat::Jwk,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a new identity key and write it to disk
    Keygen {
        #[arg(long)]
        out: PathBuf,
        #[arg(long, value_enum, default_value_t = KeyFormatArg::Pem)]
        format: KeyFormatArg,
        /// DID this key will serve, used for the printed key id
        #[arg(long)]
        did: Option<String>,
    },
    /// Run the agent: bind the HTTP shim and serve handshakes + messages
    Run {
        #[arg(long)]
        did: String,
        /// Identity key file (PEM or JWK)
        #[arg(long)]
        key: PathBuf,
        #[arg(long, default_value = "127.0.0.1:7540")]
        bind: SocketAddr,
        /// Peer verification keys, `<did>=<public-jwk-path>` (repeatable)
        #[arg(long = "peer-key")]
        peer_keys: Vec<String>,
        /// Dial a peer at startup, `<did>=<base-url>`
        #[arg(long)]
        connect: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Keygen { out, format, did } => keygen_command(&out, format.into(), did),
        Commands::Run {
            did,
            key,
            bind,
            peer_keys,
            connect,
        } => run_command(&did, &key, bind, peer_keys, connect).await,
    }
}

fn keygen_command(out: &Path, format: KeyFormat, did: Option<String>) -> Result<()> {
    if out.exists() {
        bail!("refusing to overwrite {}", out.display());
    }
    let store = FileKeyStore::new();
    let pair = IdentityKeyPair::generate();
    store.save(&pair, out, format)?;
    println!("identity key written to {}", out.display());
    println!("fingerprint: {}", pair.public.fingerprint());
    if let Some(did) = did {
        println!("key id: {did}#key-1");
    }
    println!("public JWK:\n{}", store.export_public(&pair)?);
    Ok(())
}

async fn run_command(
    did: &str,
    key_path: &Path,
    bind: SocketAddr,
    peer_keys: Vec<String>,
    connect: Option<String>,
) -> Result<()> {
    let store = FileKeyStore::new();
    let identity = store.load(key_path)?;
    info!(did, fingerprint = %identity.public.fingerprint(), "identity loaded");

    let transport = Arc::new(Transport::new(did, identity, TransportConfig::default()));
    let resolver = Arc::new(StaticResolver::new());
    for entry in &peer_keys {
        let (peer_did, path) = split_pair(entry)?;
        let key = load_public_jwk(Path::new(path))?;
        resolver.register(peer_did, key);
        info!(peer_did, "peer key registered");
    }

    transport.set_message_handler(|inbound| {
        info!(
            from_did = %inbound.from_did,
            session_id = %inbound.session_id,
            payload = %inbound.payload,
            "application message received"
        );
    });

    let state = AppState {
        transport: transport.clone(),
        resolver: resolver.clone(),
    };
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(%bind, "shim listening");

    if let Some(target) = connect {
        let (peer_did, base_url) = split_pair(&target)?;
        dial_peer(&transport, &resolver, peer_did, base_url).await?;
    }

    axum::serve(listener, http::router(state))
        .with_graceful_shutdown(async {
            let _ = signal::ctrl_c().await;
        })
        .await?;

    info!("service stopping");
    transport.close();
    Ok(())
}

/// Drive the four-phase handshake against a peer's shim.
async fn dial_peer(
    transport: &Transport,
    resolver: &StaticResolver,
    peer_did: &str,
    base_url: &str,
) -> Result<()> {
    use sage_transport::DidResolver as _;

    let client = ShimClient::new(base_url);
    let key = resolver.resolve_ed25519(peer_did)?;

    let health = client.health().await?;
    if health.did != peer_did {
        bail!("peer at {base_url} identifies as {}, not {peer_did}", health.did);
    }

    let invitation = transport.connect(peer_did)?;
    let reply = client
        .post_record(&WireRecord::Invitation(invitation))
        .await?;
    let Some(WireRecord::Request(request)) = reply.reply else {
        bail!("peer did not answer the invitation with a request");
    };

    let response = transport.handle_request(&request, &key)?;
    let reply = client.post_record(&WireRecord::Response(response)).await?;
    let Some(WireRecord::Complete(complete)) = reply.reply else {
        bail!("peer did not answer the response with a complete");
    };

    transport.handle_complete(&complete, &key)?;
    info!(peer_did, "session established");
    Ok(())
}

fn split_pair(entry: &str) -> Result<(&str, &str)> {
    entry
        .split_once('=')
        .ok_or_else(|| anyhow!("expected <did>=<value>, got {entry}"))
}

/// Read the `x` component of a public OKP JWK.
fn load_public_jwk(path: &Path) -> Result<PublicKeyBytes> {
    let content = std::fs::read_to_string(path)?;
    let jwk: serde_json::Value = serde_json::from_str(&content)?;
    if jwk["kty"] != "OKP" || jwk["crv"] != "Ed25519" {
        bail!("{} is not an Ed25519 OKP JWK", path.display());
    }
    let x = jwk["x"]
        .as_str()
        .ok_or_else(|| anyhow!("{} has no x component", path.display()))?;
    Ok(PublicKeyBytes::from_b64(x)?)
}
