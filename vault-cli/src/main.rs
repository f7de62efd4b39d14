//! vault — operational tooling for the per-user encrypted secrets store
//!
//! Usage:
//!   vault store   --user <id> --name <name> --type <type> [--provider <p>] [--expires <rfc3339>]
//!   vault get     --user <id> --id <secret-id>
//!   vault list    --user <id>
//!   vault update  --user <id> --id <secret-id> [--name <name>] [--value] [--clear-expiry]
//!   vault delete  --user <id> --id <secret-id>
//!   vault rotate  --user <id> --old-key <hex>
//!   vault rotation-info --user <id>
//!   vault maintenance
//!
//! Secret values are always read from stdin, never from an argument.

use std::io::{self, Read};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use vault_crypto::MasterKey;
use vault_store::{
    KeyRotationInfo, SecretId, SecretMetadata, SecretsStore, SecretType, SqliteBackend,
    StorageBackend, StoreSecretRequest, UpdateSecretRequest,
};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        return ExitCode::from(1);
    }

    let result = match args[1].as_str() {
        "store" => cmd_store(&args[2..]).await,
        "get" => cmd_get(&args[2..]).await,
        "list" => cmd_list(&args[2..]).await,
        "update" => cmd_update(&args[2..]).await,
        "delete" => cmd_delete(&args[2..]).await,
        "rotate" => cmd_rotate(&args[2..]).await,
        "rotation-info" => cmd_rotation_info(&args[2..]).await,
        "maintenance" => cmd_maintenance().await,
        "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        "--version" | "-V" => {
            println!("vault {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        cmd => {
            eprintln!("error: unknown command '{cmd}'");
            print_usage();
            Err(anyhow::anyhow!("unknown command"))
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("VAULT_LOG").unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn print_usage() {
    eprintln!(
        r#"vault — per-user encrypted secrets store

USAGE:
    vault <COMMAND> [OPTIONS]

COMMANDS:
    store           Store a new secret (value read from stdin)
    get             Fetch and decrypt a secret
    list            List a user's active secrets
    update          Patch an existing secret
    delete          Soft-delete a secret
    rotate          Rotate a user's secrets to the current master key
    rotation-info   Show rotation state for a user
    maintenance     Run one expiry/tombstone sweep

ENVIRONMENT:
    VAULT_MASTER_KEY   64-character hex deployment master key (required)
    VAULT_DB_PATH      SQLite file path (default: ./vault.db)
    VAULT_LOG          tracing-subscriber env filter (default: info)

EXAMPLES:
    echo -n "ghp_abc123" | vault store --user alice --name gh-token --type api_key
    vault get --user alice --id <secret-id>
    vault rotate --user alice --old-key <64-hex-chars>

OPTIONS:
    -h, --help       Print help
    -V, --version    Print version
"#
    );
}

// ---------------------------------------------------------------------------
// Shared setup
// ---------------------------------------------------------------------------

async fn open_store() -> Result<SecretsStore> {
    let key_hex = std::env::var("VAULT_MASTER_KEY")
        .context("VAULT_MASTER_KEY must be set to a 64-character hex string")?;
    let master = MasterKey::from_hex(&key_hex).map_err(|_| anyhow::anyhow!("invalid VAULT_MASTER_KEY"))?;

    let db_path = std::env::var("VAULT_DB_PATH").unwrap_or_else(|_| "./vault.db".to_string());
    let url = format!("sqlite:{db_path}?mode=rwc");
    let backend = SqliteBackend::connect(&url).await.context("connecting to VAULT_DB_PATH")?;

    SecretsStore::new(master, Arc::new(backend))
        .await
        .context("initializing store schema")
}

fn read_stdin_value() -> Result<String> {
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    let trimmed = buf.trim_end_matches(['\n', '\r']);
    if trimmed.is_empty() {
        bail!("no secret value provided on stdin");
    }
    Ok(trimmed.to_string())
}

fn find_flag<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

fn required<'a>(args: &'a [String], flag: &str) -> Result<&'a str> {
    find_flag(args, flag).ok_or_else(|| anyhow::anyhow!("missing {flag}"))
}

fn print_metadata(m: &SecretMetadata) {
    println!("id:            {}", m.id);
    println!("name:          {}", m.name);
    println!("type:          {}", m.secret_type);
    println!("provider:      {}", m.provider.as_deref().unwrap_or("-"));
    println!("preview:       {}", m.key_preview);
    println!("expires_at:    {}", m.expires_at.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".into()));
    println!("access_count:  {}", m.access_count);
    println!("is_active:     {}", m.is_active);
}

fn print_rotation_info(info: &KeyRotationInfo) {
    println!("current_key_fingerprint:  {}", info.current_key_fingerprint);
    println!("last_rotation_at:         {}", info.last_rotation_at.to_rfc3339());
    println!("rotation_count:           {}", info.rotation_count);
    println!("total_secrets:            {}", info.total_secrets);
    println!("secrets_rotated:          {}", info.secrets_rotated);
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_store(args: &[String]) -> Result<()> {
    let user_id = required(args, "--user")?;
    let name = required(args, "--name")?;
    let secret_type = SecretType::parse(required(args, "--type")?)
        .context("--type must be one of api_key, token, password, config, custom")?;
    let provider = find_flag(args, "--provider").map(str::to_string);
    let expires_at = find_flag(args, "--expires")
        .map(|s| chrono::DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&chrono::Utc)))
        .transpose()
        .context("--expires must be RFC 3339")?;

    let value = read_stdin_value()?;
    let store = open_store().await?;
    let saved = store
        .store(
            user_id,
            StoreSecretRequest {
                name: name.to_string(),
                secret_type,
                provider,
                value,
                metadata: None,
                expires_at,
            },
        )
        .await?;

    println!("stored secret {}", saved.id);
    print_metadata(&saved);
    Ok(())
}

async fn cmd_get(args: &[String]) -> Result<()> {
    let user_id = required(args, "--user")?;
    let id = SecretId::parse(required(args, "--id")?).context("invalid --id")?;

    let store = open_store().await?;
    let result = store.get(user_id, id).await?;
    println!("{}", result.value);
    Ok(())
}

async fn cmd_list(args: &[String]) -> Result<()> {
    let user_id = required(args, "--user")?;
    let store = open_store().await?;
    let secrets = store.list(user_id).await?;
    if secrets.is_empty() {
        println!("(no active secrets)");
    }
    for m in &secrets {
        print_metadata(m);
        println!("---");
    }
    Ok(())
}

async fn cmd_update(args: &[String]) -> Result<()> {
    let user_id = required(args, "--user")?;
    let id = SecretId::parse(required(args, "--id")?).context("invalid --id")?;

    let value = if has_flag(args, "--value") {
        Some(read_stdin_value()?)
    } else {
        None
    };

    let patch = UpdateSecretRequest {
        name: find_flag(args, "--name").map(str::to_string),
        value,
        metadata: None,
        expires_at: if has_flag(args, "--clear-expiry") {
            Some(None)
        } else {
            None
        },
    };

    let store = open_store().await?;
    let updated = store.update(user_id, id, patch).await?;
    print_metadata(&updated);
    Ok(())
}

async fn cmd_delete(args: &[String]) -> Result<()> {
    let user_id = required(args, "--user")?;
    let id = SecretId::parse(required(args, "--id")?).context("invalid --id")?;

    let store = open_store().await?;
    store.delete(user_id, id).await?;
    println!("deleted {id}");
    Ok(())
}

async fn cmd_rotate(args: &[String]) -> Result<()> {
    let user_id = required(args, "--user")?;
    let old_key = required(args, "--old-key")?;

    let store = open_store().await?;
    let info = store.rotate_keys(user_id, old_key).await?;
    print_rotation_info(&info);
    Ok(())
}

async fn cmd_rotation_info(args: &[String]) -> Result<()> {
    let user_id = required(args, "--user")?;
    let store = open_store().await?;
    let info = store.key_rotation_info(user_id).await?;
    print_rotation_info(&info);
    Ok(())
}

async fn cmd_maintenance() -> Result<()> {
    let key_hex = std::env::var("VAULT_MASTER_KEY").context("VAULT_MASTER_KEY must be set")?;
    let _ = MasterKey::from_hex(&key_hex).map_err(|_| anyhow::anyhow!("invalid VAULT_MASTER_KEY"))?;
    let db_path = std::env::var("VAULT_DB_PATH").unwrap_or_else(|_| "./vault.db".to_string());
    let url = format!("sqlite:{db_path}?mode=rwc");
    let backend = SqliteBackend::connect(&url).await.context("connecting to VAULT_DB_PATH")?;
    backend.init_schema().await?;

    let report = vault_store::advance_maintenance(
        &backend,
        chrono::Utc::now(),
        vault_store::constants::DEFAULT_TOMBSTONE_RETENTION,
        vault_store::constants::REAPER_INTERVAL,
    )
    .await?;

    println!("expired: {}", report.expired);
    println!("reaped:  {}", report.reaped);
    Ok(())
}
