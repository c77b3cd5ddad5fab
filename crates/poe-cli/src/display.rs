//! Terminal rendering for the poe CLI

use colored::Colorize;
use poe_core::{ClaimInfo, ClaimLookup, ClaimRecord, ContentDigest, TxStatus};
use poe_sync::{AccountClaims, ClaimState, ClaimView, SyncEvent};

pub fn step(title: &str) {
    println!();
    println!("{} {}", "==>".blue().bold(), title.bold());
}

pub fn digest_line(name: &str, digest: &ContentDigest) {
    println!("{}  {}", digest.to_string().cyan(), name);
}

pub fn tx_status(status: &TxStatus) {
    let text = status.to_string();
    let text = match status {
        TxStatus::Finalized(_) => text.green(),
        TxStatus::Error(_) => text.red(),
        _ => text.dimmed(),
    };
    println!("    tx: {text}");
}

fn state_label(state: &ClaimState) -> colored::ColoredString {
    let label = state.to_string();
    match state {
        ClaimState::ClaimedByViewer => label.green(),
        ClaimState::ClaimedByOther => label.yellow(),
        ClaimState::Revoked => label.red(),
        ClaimState::TransferPending | ClaimState::PurchasePending => label.magenta(),
        ClaimState::Unclaimed => label.normal(),
    }
}

fn info_line(info: &ClaimInfo) -> String {
    let mut line = format!("owner {} at block {}", info.owner, info.created_at_block);
    if let Some(price) = info.price {
        line.push_str(&format!(", price {price}"));
    }
    if let Some(note) = &info.note {
        line.push_str(&format!(", note {note:?}"));
    }
    line
}

pub fn claim_view(view: &ClaimView) {
    print!("    claim: {}", state_label(&view.state));
    if let Some(ClaimRecord::Present(info)) = &view.record {
        print!(" ({})", info_line(info));
    }
    println!();
    if let Some(error) = &view.error {
        println!("    {} {error}", "error:".red());
    }
}

pub fn claim_list(claims: &AccountClaims) {
    let Some(account) = &claims.account else {
        println!("    no account selected");
        return;
    };
    println!("    {} owns {} claim(s)", account.to_string().bold(), claims.entries.len());
    for entry in &claims.entries {
        let detail = match &entry.lookup {
            ClaimLookup::Found(ClaimRecord::Present(info)) => info_line(info),
            ClaimLookup::Found(ClaimRecord::Absent) => "absent".dimmed().to_string(),
            ClaimLookup::LookupFailed { cause } => format!("lookup failed: {cause}").red().to_string(),
        };
        println!("      {} {detail}", entry.digest.short_hex());
    }
    if let Some(error) = &claims.error {
        println!("    {} {error}", "error:".red());
    }
}

pub fn event(event: &SyncEvent) {
    match event {
        SyncEvent::Confirmed { digest, expectation } => {
            println!("    {} {} {expectation:?}", "confirmed".green(), digest.short_hex());
        }
        SyncEvent::Contradicted {
            digest,
            expectation,
            reason,
        } => {
            println!(
                "    {} {} {expectation:?}: {reason}",
                "contradicted".red(),
                digest.short_hex()
            );
        }
        SyncEvent::ConfirmationTimeout { digest, waited, .. } => {
            println!(
                "    {} {} after {waited:?}",
                "unconfirmed".yellow(),
                digest.short_hex()
            );
        }
        SyncEvent::Error(error) => println!("    {} {error}", "error:".red()),
        // Rendered from the views and status streams
        SyncEvent::ClaimStateChanged { .. }
        | SyncEvent::TxStatus { .. }
        | SyncEvent::AccountClaimsUpdated { .. } => {}
    }
}
