//! Scripted claim lifecycle against the in-memory chain

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use futures::StreamExt;
use poe_core::{AccountId, ClaimSchema, ContentDigest, MockChain, TxStatus};
use poe_sync::{AccountClaims, ClaimAction, ClaimState, ClaimSync, ClaimView, SyncConfig};
use tokio::sync::watch;
use tracing::info;

use crate::display;

/// Upper bound on any single step
const STEP_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SimulateArgs {
    pub file: PathBuf,
    pub owner: AccountId,
    pub viewer: AccountId,
    pub note: Option<String>,
    pub price: Option<u128>,
    pub schema: Option<ClaimSchema>,
    pub config: Option<PathBuf>,
}

fn load_config(args: &SimulateArgs) -> Result<SyncConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            SyncConfig::from_json(&json)?
        }
        None => SyncConfig::default(),
    };
    if let Some(schema) = args.schema {
        config = config.with_schema(schema);
    }
    Ok(config)
}

async fn wait_for<T, F>(rx: &mut watch::Receiver<T>, what: &str, mut pred: F) -> Result<T>
where
    T: Clone,
    F: FnMut(&T) -> bool,
{
    let value = tokio::time::timeout(STEP_TIMEOUT, rx.wait_for(|v| pred(v)))
        .await
        .map_err(|_| anyhow!("timed out waiting for {what}"))?
        .map_err(|_| anyhow!("sync engine stopped while waiting for {what}"))?;
    Ok((*value).clone())
}

async fn wait_state(view: &mut watch::Receiver<ClaimView>, state: ClaimState) -> Result<()> {
    let reached = wait_for(view, &state.to_string(), |v| v.state == state || v.error.is_some()).await?;
    display::claim_view(&reached);
    match reached.error {
        Some(error) if reached.state != state => Err(error.into()),
        _ => Ok(()),
    }
}

/// Wait until the list reflects `owned`, or the index is unavailable
async fn show_claims(
    claims: &mut watch::Receiver<AccountClaims>,
    account: &AccountId,
    digest: ContentDigest,
    owned: bool,
) -> Result<()> {
    let list = wait_for(claims, "account claims", |c| {
        c.account.as_ref() == Some(account)
            && (c.error.is_some() || c.entries.iter().any(|e| e.digest == digest) == owned)
    })
    .await?;
    display::claim_list(&list);
    Ok(())
}

async fn submit(sync: &ClaimSync, action: ClaimAction) -> Result<()> {
    let name = action.to_string();
    let mut statuses = sync.submit(action).await?;
    while let Some(status) = statuses.next().await {
        display::tx_status(&status);
        if let TxStatus::Error(reason) = status {
            bail!("{name} failed: {reason}");
        }
    }
    Ok(())
}

pub async fn run(args: SimulateArgs) -> Result<()> {
    if args.owner == args.viewer {
        bail!("owner and viewer must be different accounts");
    }
    let config = load_config(&args)?;
    let schema = config.schema;
    let bytes = fs::read(&args.file).with_context(|| format!("reading {}", args.file.display()))?;

    let chain = MockChain::new(schema);
    let sync = ClaimSync::from_chain(chain.clone(), config)?;
    let digest = sync.compute_digest(&bytes);
    display::digest_line(&args.file.display().to_string(), &digest);
    info!(digest = %digest, schema = %schema, "Simulation started");

    let mut events = sync.events();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            display::event(&event);
        }
    });

    let owner = args.owner.clone();
    sync.select_account(Some(owner.clone())).await?;
    let mut view = sync.watch_claim(Some(digest)).await?;
    let mut claims = sync.watch_account_claims(Some(owner.clone())).await?;

    display::step(&format!("{owner} watches the digest"));
    wait_state(&mut view, ClaimState::Unclaimed).await?;

    display::step(&format!("{owner} creates the claim"));
    submit(
        &sync,
        ClaimAction::Create {
            digest,
            note: args.note.clone(),
            price: args.price,
        },
    )
    .await?;
    wait_state(&mut view, ClaimState::ClaimedByViewer).await?;
    show_claims(&mut claims, &owner, digest, true).await?;

    display::step(&format!("{owner} transfers the claim to {}", args.viewer));
    submit(
        &sync,
        ClaimAction::Transfer {
            digest,
            to: args.viewer.clone(),
        },
    )
    .await?;
    wait_state(&mut view, ClaimState::ClaimedByOther).await?;
    let mut current = args.viewer.clone();
    show_claims(&mut claims, &owner, digest, false).await?;

    if let Some(price) = args.price.filter(|_| schema.calls().purchase.is_some()) {
        display::step(&format!("{owner} buys the claim back for {price}"));
        chain.fund(&owner, price).await;
        submit(&sync, ClaimAction::Purchase { digest, amount: price }).await?;
        wait_state(&mut view, ClaimState::ClaimedByViewer).await?;
        current = owner.clone();
        show_claims(&mut claims, &owner, digest, true).await?;
    }

    display::step(&format!("{current} revokes the claim"));
    sync.select_account(Some(current.clone())).await?;
    submit(&sync, ClaimAction::Revoke { digest }).await?;
    wait_state(&mut view, ClaimState::Revoked).await?;

    sync.shutdown().await?;
    printer.abort();
    info!(digest = %digest, "Simulation finished");
    Ok(())
}
