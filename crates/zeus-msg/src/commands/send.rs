//! Send command implementation.

use std::io::Read;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Args;

use zeus_core::BusConfig;
use zeus_core::ids::sanitize_agent_id;
use zeus_core::schema::{AgentRole, DeliverAs, TargetExpr};
use zeus_dispatch::{EnqueueRequest, enqueue, queue};

use crate::util::file_policy::read_payload_under;
use crate::util::wait::wait_for_removal;

/// Queue one outbound message from text, stdin, or a payload file.
#[derive(Args, Debug)]
pub struct SendArgs {
    /// Target: polemarch | phalanx | hoplite:<id> | agent:<id> |
    /// name:<display-name> | <display-name>
    #[arg(long)]
    to: String,

    /// Message text
    #[arg(long, conflicts_with_all = ["stdin", "file"])]
    text: Option<String>,

    /// Read message from stdin
    #[arg(long, conflicts_with = "file")]
    stdin: bool,

    /// Payload file path (must live under the configured message_tmp_dir)
    #[arg(long)]
    file: Option<PathBuf>,

    /// Override the sender display name (defaults to the sender agent id)
    #[arg(long)]
    from: Option<String>,

    /// Block until the envelope has been delivered to all recipients
    #[arg(long)]
    wait_delivery: bool,

    /// Timeout in seconds for --wait-delivery
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

/// Execute the send command.
///
/// Exit is zero once the envelope is durably enqueued; with
/// `--wait-delivery`, zero only if the envelope left the queue within the
/// timeout.
pub fn execute(args: SendArgs) -> Result<()> {
    let cfg = BusConfig::resolve().context("failed to resolve state directory")?;

    let sender_agent_id =
        sanitize_agent_id(&std::env::var("ZEUS_AGENT_ID").unwrap_or_default());
    if sender_agent_id.is_empty() {
        bail!("ZEUS_AGENT_ID is required");
    }
    let sender_role = AgentRole::from(std::env::var("ZEUS_ROLE").unwrap_or_default());

    TargetExpr::parse(&args.to).map_err(|e| anyhow::anyhow!("invalid --to target: {e}"))?;

    let message = message_text(&args, &cfg)?;
    if message.trim().is_empty() {
        bail!("message is empty");
    }

    let source_name = args
        .from
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(&sender_agent_id)
        .to_string();

    let id = enqueue(
        &cfg,
        &EnqueueRequest {
            source_agent_id: sender_agent_id,
            source_name,
            source_role: sender_role,
            target: args.to.clone(),
            message,
            deliver_as: DeliverAs::FollowUp,
        },
    )?;

    println!("ZEUS_MSG_ENQUEUED={id}");

    if args.wait_delivery {
        let deadline = Instant::now() + Duration::from_secs(args.timeout);
        let file_name = format!("{id}.json");
        if !wait_for_removal(&cfg, &file_name, deadline)? {
            bail!("timed out waiting for delivery of {id} after {}s", args.timeout);
        }
        // Delivered: every resolved recipient wrote a receipt.
        debug_assert!(!queue::is_pending(&cfg, &file_name));
    }

    Ok(())
}

fn message_text(args: &SendArgs, cfg: &BusConfig) -> Result<String> {
    if let Some(text) = &args.text {
        return Ok(text.clone());
    }
    if args.stdin {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read message from stdin")?;
        return Ok(buf);
    }
    if let Some(path) = &args.file {
        return read_payload_under(path, cfg.message_tmp_dir());
    }
    bail!("one of --text, --stdin, or --file is required");
}
